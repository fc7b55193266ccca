//! Sends analysis prompts to the model and turns replies into
//! [`DocumentAnalysis`] values.

use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;

use crate::llm::{AnalysisMode, LlmDriver, LlmError, LlmRequest, Message};

use super::prompt::{PromptStyle, build_prompt};
use super::schema::{DocumentAnalysis, find_json_object, response_format, validate};

const TEMPERATURE: f32 = 0.1;
const MAX_OUTPUT_TOKENS: u32 = 2000;

/// Why an analysis request failed.
#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    #[error("Document text is required")]
    MissingInput,

    #[error(
        "The language model API key is missing or invalid. Please set LLM_API_KEY (or GOOGLE_GENERATIVE_AI_API_KEY) in the environment."
    )]
    NotConfigured,

    #[error(
        "API quota exceeded. Please wait a few minutes before trying again, or upgrade your API plan for higher limits."
    )]
    QuotaExceeded,

    #[error("The analysis could not be read from the model's response. Please try again.")]
    ResponseUnparseable(String),

    #[error("Failed to analyze document. Please try again.")]
    Unknown(String),
}

impl AnalysisError {
    /// HTTP status for this failure.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::MissingInput => StatusCode::BAD_REQUEST,
            Self::QuotaExceeded => StatusCode::TOO_MANY_REQUESTS,
            Self::NotConfigured | Self::ResponseUnparseable(_) | Self::Unknown(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Internal detail worth logging, if any.
    #[must_use]
    pub fn detail(&self) -> Option<&str> {
        match self {
            Self::ResponseUnparseable(d) | Self::Unknown(d) => Some(d),
            _ => None,
        }
    }
}

impl From<LlmError> for AnalysisError {
    fn from(err: LlmError) -> Self {
        match err {
            LlmError::Unauthorized { .. } => Self::NotConfigured,
            LlmError::QuotaExceeded(_) => Self::QuotaExceeded,
            other => {
                let message = other.to_string();
                let lower = message.to_lowercase();
                if lower.contains("quota") || lower.contains("exceeded") {
                    Self::QuotaExceeded
                } else if message.contains("API key") {
                    Self::NotConfigured
                } else {
                    Self::Unknown(message)
                }
            }
        }
    }
}

/// Requests document analyses from the configured model.
///
/// Every call issues a fresh request; nothing is cached or retried.
#[derive(Clone)]
pub struct Analyzer {
    llm: Option<Arc<dyn LlmDriver>>,
    mode: AnalysisMode,
    timeout: Duration,
}

impl std::fmt::Debug for Analyzer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Analyzer")
            .field("configured", &self.llm.is_some())
            .field("mode", &self.mode)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl Analyzer {
    /// `mode` must already be resolved; `Auto` is treated as structured.
    pub fn new(llm: Option<Arc<dyn LlmDriver>>, mode: AnalysisMode, timeout: Duration) -> Self {
        Self { llm, mode, timeout }
    }

    /// Analyze `document_text`.
    pub async fn analyze(
        &self,
        document_text: &str,
        document_type: Option<&str>,
    ) -> Result<DocumentAnalysis, AnalysisError> {
        if document_text.trim().is_empty() {
            return Err(AnalysisError::MissingInput);
        }
        let Some(llm) = &self.llm else {
            return Err(AnalysisError::NotConfigured);
        };

        let style = match self.mode {
            AnalysisMode::FreeText => PromptStyle::FreeText,
            AnalysisMode::Structured | AnalysisMode::Auto => PromptStyle::Structured,
        };
        let prompt = build_prompt(document_text, document_type, style);

        let request = LlmRequest {
            temperature: Some(TEMPERATURE),
            max_tokens: Some(MAX_OUTPUT_TOKENS),
            response_format: (style == PromptStyle::Structured).then(response_format),
            timeout: Some(self.timeout),
            ..LlmRequest::new(vec![Message::system(prompt.system), Message::user(prompt.user)])
        };

        tracing::info!(
            name: "analysis.started",
            chars = document_text.chars().count(),
            document_type = document_type.unwrap_or("document"),
            style = ?style,
            "Requesting document analysis"
        );

        let reply = llm.complete(request).await?;
        let analysis = parse_reply(&reply, style)?;

        tracing::info!(
            name: "analysis.completed",
            key_points = analysis.key_points.len(),
            terms = analysis.important_terms.len(),
            warnings = analysis.warnings.len(),
            "Document analysis completed"
        );
        Ok(analysis)
    }
}

/// Parse and validate the model's reply.
///
/// Structured replies are expected to be the JSON object itself; free-text
/// replies are scanned for the first balanced object first.
pub fn parse_reply(reply: &str, style: PromptStyle) -> Result<DocumentAnalysis, AnalysisError> {
    let candidate = match style {
        PromptStyle::Structured => reply.trim(),
        PromptStyle::FreeText => find_json_object(reply),
    };

    let value: serde_json::Value = serde_json::from_str(candidate)
        .map_err(|e| AnalysisError::ResponseUnparseable(format!("invalid JSON: {e}")))?;

    validate(&value).map_err(|e| AnalysisError::ResponseUnparseable(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::TextStream;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const VALID: &str = r#"{"summary":"x","keyPoints":["a"],"importantTerms":[{"term":"t","simpleExplanation":"e"}],"thingsToKnow":[],"warnings":[]}"#;

    struct Scripted {
        reply: Mutex<Option<Result<String, LlmError>>>,
        seen: Mutex<Vec<LlmRequest>>,
        calls: AtomicUsize,
    }

    impl Scripted {
        fn new(reply: Result<String, LlmError>) -> Arc<Self> {
            Arc::new(Self {
                reply: Mutex::new(Some(reply)),
                seen: Mutex::new(Vec::new()),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait::async_trait]
    impl LlmDriver for Scripted {
        async fn complete(&self, req: LlmRequest) -> Result<String, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().unwrap().push(req);
            self.reply.lock().unwrap().take().expect("one call scripted")
        }

        async fn stream(&self, _req: LlmRequest) -> Result<TextStream, LlmError> {
            unreachable!("analysis never streams")
        }
    }

    fn analyzer(llm: &Arc<Scripted>, mode: AnalysisMode) -> Analyzer {
        let driver: Arc<dyn LlmDriver> = Arc::clone(llm) as Arc<dyn LlmDriver>;
        Analyzer::new(Some(driver), mode, Duration::from_secs(60))
    }

    #[tokio::test]
    async fn test_empty_text_never_calls_model() {
        let llm = Scripted::new(Ok(VALID.to_string()));
        let err = analyzer(&llm, AnalysisMode::Structured)
            .analyze("  \n", Some("nda"))
            .await
            .unwrap_err();
        assert!(matches!(err, AnalysisError::MissingInput));
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(llm.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unconfigured() {
        let analyzer = Analyzer::new(None, AnalysisMode::Structured, Duration::from_secs(1));
        let err = analyzer.analyze("RENT: $900", None).await.unwrap_err();
        assert!(matches!(err, AnalysisError::NotConfigured));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_structured_request_shape() {
        let llm = Scripted::new(Ok(VALID.to_string()));
        let analysis = analyzer(&llm, AnalysisMode::Structured)
            .analyze("RENT: $900", Some("rental-agreement"))
            .await
            .unwrap();
        assert_eq!(analysis.summary, "x");

        let seen = llm.seen.lock().unwrap();
        let req = &seen[0];
        assert_eq!(req.messages.len(), 2);
        assert_eq!(req.temperature, Some(TEMPERATURE));
        assert_eq!(req.max_tokens, Some(MAX_OUTPUT_TOKENS));
        assert_eq!(req.timeout, Some(Duration::from_secs(60)));
        assert!(req.response_format.is_some());
        assert!(req.messages[1].content.contains("rental-agreement"));
    }

    #[tokio::test]
    async fn test_free_text_reply_with_prose() {
        let reply = format!("Here is the result: {VALID} Thanks!");
        let llm = Scripted::new(Ok(reply));
        let analysis = analyzer(&llm, AnalysisMode::FreeText)
            .analyze("RENT: $900", None)
            .await
            .unwrap();
        assert_eq!(analysis.important_terms[0].simple_explanation, "e");
        assert!(llm.seen.lock().unwrap()[0].response_format.is_none());
    }

    #[tokio::test]
    async fn test_free_text_reply_without_json() {
        let llm = Scripted::new(Ok("I cannot help with that.".to_string()));
        let err = analyzer(&llm, AnalysisMode::FreeText)
            .analyze("RENT: $900", None)
            .await
            .unwrap_err();
        assert!(matches!(err, AnalysisError::ResponseUnparseable(_)));
    }

    #[tokio::test]
    async fn test_structured_reply_missing_field() {
        let llm = Scripted::new(Ok(r#"{"summary":"x"}"#.to_string()));
        let err = analyzer(&llm, AnalysisMode::Structured)
            .analyze("RENT: $900", None)
            .await
            .unwrap_err();
        assert!(err.detail().unwrap().contains("keyPoints: missing"));
    }

    #[tokio::test]
    async fn test_quota_message_classified() {
        let llm = Scripted::new(Err(LlmError::Provider("Sorry, quota exceeded".to_string())));
        let err = analyzer(&llm, AnalysisMode::Structured)
            .analyze("RENT: $900", None)
            .await
            .unwrap_err();
        assert!(matches!(err, AnalysisError::QuotaExceeded));
        assert_eq!(err.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[test]
    fn test_error_classification() {
        assert!(matches!(
            AnalysisError::from(LlmError::Unauthorized {
                status: 401,
                message: String::new()
            }),
            AnalysisError::NotConfigured
        ));
        assert!(matches!(
            AnalysisError::from(LlmError::Status {
                status: 400,
                message: "API key not valid".to_string()
            }),
            AnalysisError::NotConfigured
        ));
        assert!(matches!(
            AnalysisError::from(LlmError::Timeout),
            AnalysisError::Unknown(ref d) if d.contains("timed out")
        ));
        assert!(matches!(
            AnalysisError::from(LlmError::QuotaExceeded("429".to_string())),
            AnalysisError::QuotaExceeded
        ));
    }

    #[test]
    fn test_free_text_example_is_valid() {
        let prompt = build_prompt("x", None, PromptStyle::FreeText);
        assert!(parse_reply(&prompt.system, PromptStyle::FreeText).is_ok());
    }
}
