//! OpenAI-compatible Chat Completions API driver.
//!
//! This module implements the [`LlmDriver`] trait for the Chat Completions
//! API (`/chat/completions`), both as a single completion and as a
//! server-sent-event stream of text deltas.

use futures::{Stream, StreamExt};

use super::{LlmDriver, LlmError, LlmRequest, LlmSettings, Provider, TextStream};

/// Driver for OpenAI-compatible Chat Completions endpoints.
#[derive(Clone)]
pub struct ChatCompletionsDriver {
    http: reqwest::Client,
    settings: LlmSettings,
    url: String,
}

impl std::fmt::Debug for ChatCompletionsDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatCompletionsDriver")
            .field("settings", &self.settings)
            .field("url", &self.url)
            .finish()
    }
}

impl ChatCompletionsDriver {
    /// Create a new Chat Completions driver with the given settings.
    #[must_use]
    pub fn new(settings: LlmSettings) -> Self {
        let url = settings.provider.build_chat_url(&settings.base_url);
        Self {
            http: reqwest::Client::new(),
            settings,
            url,
        }
    }

    fn body(&self, req: &LlmRequest, stream: bool) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": req.model.as_deref().unwrap_or(&self.settings.model),
            "stream": stream,
            "messages": req.messages,
        });
        if let Some(t) = req.temperature {
            body["temperature"] = serde_json::json!(t);
        }
        if let Some(n) = req.max_tokens {
            body["max_tokens"] = serde_json::json!(n);
        }
        if let Some(rf) = &req.response_format {
            body["response_format"] = rf.clone();
        }
        body
    }

    async fn send(&self, req: &LlmRequest, stream: bool) -> Result<reqwest::Response, LlmError> {
        let mut rb = self.http.post(&self.url).json(&self.body(req, stream));
        if let Some(k) = &self.settings.api_key {
            rb = match self.settings.provider {
                Provider::AzureOpenAI { .. } => rb.header("api-key", k),
                _ => rb.bearer_auth(k),
            };
        }
        if let Some(timeout) = req.timeout {
            rb = rb.timeout(timeout);
        }

        let resp = rb.send().await?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }

        let body = resp.text().await.unwrap_or_default();
        Err(status_error(status.as_u16(), &body))
    }
}

#[async_trait::async_trait]
impl LlmDriver for ChatCompletionsDriver {
    async fn complete(&self, req: LlmRequest) -> Result<String, LlmError> {
        let resp = self.send(&req, false).await?;
        let v: serde_json::Value = resp.json().await?;

        let message = &v["choices"][0]["message"];
        if let Some(content) = message.get("content").and_then(|x| x.as_str()) {
            return Ok(content.to_string());
        }
        if let Some(refusal) = message.get("refusal").and_then(|x| x.as_str()) {
            return Err(LlmError::Provider(refusal.to_string()));
        }
        if let Some(msg) = in_band_error(&v) {
            return Err(LlmError::Provider(msg));
        }
        Err(LlmError::Decode(
            "completion carried no message content".to_string(),
        ))
    }

    async fn stream(&self, req: LlmRequest) -> Result<TextStream, LlmError> {
        let resp = self.send(&req, true).await?;
        Ok(Box::pin(sse_text(resp.bytes_stream())))
    }
}

enum Frame {
    Text(String),
    Done,
    Skip,
}

/// Decode one SSE frame into its assistant text delta.
fn parse_frame(frame: &[u8]) -> Result<Frame, LlmError> {
    let text = String::from_utf8_lossy(frame);
    let mut out = String::new();

    for line in text.lines() {
        let line = line.trim();
        if !line.starts_with("data:") {
            continue;
        }
        let data = line.trim_start_matches("data:").trim();
        if data == "[DONE]" {
            return Ok(Frame::Done);
        }

        let v: serde_json::Value =
            serde_json::from_str(data).map_err(|e| LlmError::Decode(e.to_string()))?;
        if let Some(msg) = in_band_error(&v) {
            return Err(classify_message(&msg));
        }
        if let Some(s) = v["choices"][0]["delta"]
            .get("content")
            .and_then(|x| x.as_str())
        {
            out.push_str(s);
        }
    }

    if out.is_empty() {
        Ok(Frame::Skip)
    } else {
        Ok(Frame::Text(out))
    }
}

/// Map a non-success HTTP status to an [`LlmError`].
pub(crate) fn status_error(status: u16, body: &str) -> LlmError {
    let message = in_band_error_str(body).unwrap_or_else(|| body.trim().to_string());
    match status {
        401 | 403 => LlmError::Unauthorized { status, message },
        429 => LlmError::QuotaExceeded(message),
        408 | 504 => LlmError::Timeout,
        _ => LlmError::Status { status, message },
    }
}

fn classify_message(msg: &str) -> LlmError {
    let lower = msg.to_lowercase();
    if lower.contains("quota") || lower.contains("rate limit") {
        LlmError::QuotaExceeded(msg.to_string())
    } else {
        LlmError::Provider(msg.to_string())
    }
}

fn in_band_error_str(body: &str) -> Option<String> {
    let v: serde_json::Value = serde_json::from_str(body).ok()?;
    in_band_error(&v)
}

/// Extract `error.message` from an error payload. Gemini wraps it in an array.
fn in_band_error(v: &serde_json::Value) -> Option<String> {
    let v = v.as_array().and_then(|a| a.first()).unwrap_or(v);
    let err = v.get("error")?;
    err.get("message")
        .and_then(|m| m.as_str())
        .or_else(|| err.as_str())
        .map(ToString::to_string)
}

/// Turn an SSE byte stream into the text deltas it carries.
///
/// A final frame without its trailing blank line is still parsed once the
/// body ends.
fn sse_text<S, B, E>(byte_stream: S) -> impl Stream<Item = Result<String, LlmError>>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    LlmError: From<E>,
{
    async_stream::try_stream! {
        let mut buf = Vec::<u8>::new();
        let mut done = false;

        futures::pin_mut!(byte_stream);
        'read: while let Some(chunk) = byte_stream.next().await {
            let chunk = chunk.map_err(LlmError::from)?;
            buf.extend(chunk.as_ref().iter().copied().filter(|b| *b != b'\r'));

            while let Some(pos) = find_double_newline(&buf) {
                let frame = buf.drain(..pos + 2).collect::<Vec<_>>();
                match parse_frame(&frame)? {
                    Frame::Text(text) => yield text,
                    Frame::Done => {
                        done = true;
                        break 'read;
                    }
                    Frame::Skip => {}
                }
            }
        }

        if !done && !buf.is_empty() {
            if let Frame::Text(text) = parse_frame(&buf)? {
                yield text;
            }
        }
    }
}

/// Find the position of a double newline in the buffer.
fn find_double_newline(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_text_frame() {
        let frame = br#"data: {"choices":[{"delta":{"content":"Hel"}}]}

"#;
        match parse_frame(frame).unwrap() {
            Frame::Text(t) => assert_eq!(t, "Hel"),
            _ => panic!("expected text frame"),
        }
    }

    #[test]
    fn test_parse_done_frame() {
        assert!(matches!(parse_frame(b"data: [DONE]\n\n").unwrap(), Frame::Done));
    }

    #[test]
    fn test_role_only_delta_is_skipped() {
        let frame = br#"data: {"choices":[{"delta":{"role":"assistant"}}]}

"#;
        assert!(matches!(parse_frame(frame).unwrap(), Frame::Skip));
    }

    async fn collect_text(chunks: &[&'static str]) -> Vec<String> {
        let bytes = futures::stream::iter(chunks.iter().map(|c| Ok::<_, LlmError>(c.as_bytes())));
        sse_text(bytes)
            .collect::<Vec<_>>()
            .await
            .into_iter()
            .map(|r| r.unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_frames_split_across_chunks() {
        let text = collect_text(&[
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\r\n",
            "\r\ndata: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n\n",
            "data: [DONE]\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"late\"}}]}\n\n",
        ])
        .await;
        assert_eq!(text, vec!["Hel", "lo"]);
    }

    #[tokio::test]
    async fn test_final_frame_without_blank_line_is_kept() {
        let text = collect_text(&[
            "data: {\"choices\":[{\"delta\":{\"content\":\"Your \"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"lease\"}}]}\n",
        ])
        .await;
        assert_eq!(text, vec!["Your ", "lease"]);
    }

    #[test]
    fn test_in_band_quota_error() {
        let frame = br#"data: {"error":{"message":"Resource has been exhausted (e.g. check quota)."}}

"#;
        assert!(matches!(
            parse_frame(frame),
            Err(LlmError::QuotaExceeded(_))
        ));
    }

    #[test]
    fn test_status_error_mapping() {
        let body = r#"[{"error":{"code":400,"message":"API key not valid. Please pass a valid API key."}}]"#;
        match status_error(400, body) {
            LlmError::Status { status, message } => {
                assert_eq!(status, 400);
                assert!(message.starts_with("API key not valid"));
            }
            other => panic!("unexpected {other:?}"),
        }

        assert!(matches!(
            status_error(429, "slow down"),
            LlmError::QuotaExceeded(_)
        ));
        assert!(matches!(
            status_error(401, "{}"),
            LlmError::Unauthorized { status: 401, .. }
        ));
    }

    #[test]
    fn test_body_includes_options() {
        let driver = ChatCompletionsDriver::new(LlmSettings {
            base_url: "https://api.openai.com".to_string(),
            api_key: Some("k".to_string()),
            model: "gpt-4o-mini".to_string(),
            chat_model: "gpt-4o-mini".to_string(),
            provider: Provider::OpenAI,
            analysis_mode: super::super::AnalysisMode::Auto,
        });
        let req = LlmRequest {
            temperature: Some(0.5),
            max_tokens: Some(2000),
            ..LlmRequest::new(vec![super::super::Message::user("hi")])
        };
        let body = driver.body(&req, true);
        assert_eq!(body["model"], "gpt-4o-mini");
        assert_eq!(body["stream"], true);
        assert_eq!(body["max_tokens"], 2000);
        assert_eq!(body["messages"][0]["role"], "user");
        assert!(body.get("response_format").is_none());
    }
}
