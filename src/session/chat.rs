//! Chat session driver.
//!
//! A [`ChatSession`] owns one conversation. Each [`ChatSession::send`]
//! appends the user turn, asks the model for a streamed reply and hands the
//! caller a [`ReplyStream`] of text fragments. Only one turn is in flight at
//! a time, so replies are recorded in the order turns were sent.

use std::pin::Pin;
use std::sync::{Arc, Mutex, RwLock};
use std::task::{Context, Poll};
use std::time::Duration;

use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::{CancellationToken, DropGuard};
use uuid::Uuid;

use crate::llm::{LlmDriver, LlmError, LlmRequest, Message};

use super::grounding::{GroundingContext, system_prompt};

/// Fragments buffered between the model task and the consumer.
const FRAGMENT_BUFFER: usize = 32;

/// Author of a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One turn of the conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
}

impl ConversationTurn {
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    /// Read a turn from client JSON.
    ///
    /// Accepts `content: string` or `parts: [{type: "text", text}]`. Returns
    /// `None` for anything without a `user`/`assistant` role or without text.
    pub fn from_value(value: &serde_json::Value) -> Option<Self> {
        let role = match value.get("role")?.as_str()? {
            "user" => Role::User,
            "assistant" => Role::Assistant,
            _ => return None,
        };

        let content = match value.get("content").and_then(|c| c.as_str()) {
            Some(text) => text.to_string(),
            None => value
                .get("parts")?
                .as_array()?
                .iter()
                .filter(|p| p.get("type").and_then(|t| t.as_str()) == Some("text"))
                .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
                .collect::<String>(),
        };

        let turn = Self { role, content };
        turn.is_well_formed().then_some(turn)
    }

    fn is_well_formed(&self) -> bool {
        !self.content.trim().is_empty()
    }

    fn to_message(&self) -> Message {
        match self.role {
            Role::User => Message::user(self.content.clone()),
            Role::Assistant => Message::assistant(self.content.clone()),
        }
    }
}

/// Generation settings for chat replies.
#[derive(Debug, Clone)]
pub struct ChatOptions {
    /// Model override for chat.
    pub model: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Upstream time budget for one reply.
    pub timeout: Duration,
}

impl Default for ChatOptions {
    fn default() -> Self {
        Self {
            model: None,
            temperature: 0.7,
            max_tokens: 2000,
            timeout: Duration::from_secs(30),
        }
    }
}

/// Why a chat turn failed.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("{0}")]
    InvalidInput(String),

    #[error(
        "The language model API key is missing or invalid. Please set LLM_API_KEY (or GOOGLE_GENERATIVE_AI_API_KEY) in the environment."
    )]
    NotConfigured,

    #[error("A reply is still being generated. Wait for it to finish or cancel it first.")]
    TurnInProgress,

    #[error("Failed to process chat message. Please try again.")]
    Unknown(String),
}

impl ChatError {
    /// HTTP status for this failure.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Self::TurnInProgress => StatusCode::CONFLICT,
            Self::NotConfigured | Self::Unknown(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<LlmError> for ChatError {
    fn from(err: LlmError) -> Self {
        match err {
            LlmError::Unauthorized { .. } => Self::NotConfigured,
            other if other.to_string().contains("API key") => Self::NotConfigured,
            other => Self::Unknown(other.to_string()),
        }
    }
}

/// A conversation with the model about one document.
pub struct ChatSession {
    inner: Arc<ChatSessionInner>,
}

struct ChatSessionInner {
    id: String,
    llm: Option<Arc<dyn LlmDriver>>,
    options: ChatOptions,
    grounding: Option<GroundingContext>,
    turns: RwLock<Vec<ConversationTurn>>,
    /// `Some` while a reply is awaited.
    in_flight: Mutex<Option<CancellationToken>>,
    last_activity: RwLock<DateTime<Utc>>,
}

impl Clone for ChatSession {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl std::fmt::Debug for ChatSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatSession")
            .field("id", &self.inner.id)
            .field("configured", &self.inner.llm.is_some())
            .field("grounded", &self.inner.grounding.is_some())
            .field("turns", &self.turn_count())
            .field("awaiting_response", &self.is_awaiting_response())
            .finish()
    }
}

impl ChatSession {
    /// Create a session with a fresh ID.
    pub fn new(
        llm: Option<Arc<dyn LlmDriver>>,
        options: ChatOptions,
        grounding: Option<GroundingContext>,
    ) -> Self {
        let now = Utc::now();
        Self {
            inner: Arc::new(ChatSessionInner {
                id: Uuid::new_v4().to_string(),
                llm,
                options,
                grounding,
                turns: RwLock::new(Vec::new()),
                in_flight: Mutex::new(None),
                last_activity: RwLock::new(now),
            }),
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    #[must_use]
    pub fn grounding(&self) -> Option<&GroundingContext> {
        self.inner.grounding.as_ref()
    }

    /// Append prior turns, dropping malformed ones.
    pub fn extend_history(&self, turns: impl IntoIterator<Item = ConversationTurn>) {
        let mut guard = self.inner.turns.write().unwrap();
        guard.extend(turns.into_iter().filter(ConversationTurn::is_well_formed));
        drop(guard);
        self.touch();
    }

    /// All recorded turns.
    #[must_use]
    pub fn turns(&self) -> Vec<ConversationTurn> {
        self.inner.turns.read().unwrap().clone()
    }

    #[must_use]
    pub fn turn_count(&self) -> usize {
        self.inner.turns.read().unwrap().len()
    }

    /// Whether a reply is currently awaited.
    #[must_use]
    pub fn is_awaiting_response(&self) -> bool {
        self.inner.in_flight.lock().unwrap().is_some()
    }

    /// Send a user turn and stream the reply.
    ///
    /// Rejected with [`ChatError::TurnInProgress`] while a reply is awaited.
    /// Dropping the returned stream cancels the turn.
    pub fn send(&self, text: &str) -> Result<ReplyStream, ChatError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ChatError::InvalidInput("Message text is required.".to_string()));
        }
        let Some(llm) = self.inner.llm.clone() else {
            return Err(ChatError::NotConfigured);
        };

        let token = {
            let mut guard = self.inner.in_flight.lock().unwrap();
            if guard.is_some() {
                return Err(ChatError::TurnInProgress);
            }
            let token = CancellationToken::new();
            *guard = Some(token.clone());
            token
        };

        self.push(ConversationTurn::user(text));
        let request = self.request();

        tracing::info!(
            name: "chat.turn.started",
            session_id = %self.inner.id,
            turns = request.messages.len() - 1,
            grounded = self.inner.grounding.is_some(),
            "Chat turn started"
        );

        let (tx, rx) = mpsc::channel(FRAGMENT_BUFFER);
        let session = self.clone();
        let task_token = token.clone();
        tokio::spawn(async move {
            session.relay(llm, request, tx, task_token).await;
        });

        Ok(ReplyStream {
            rx: ReceiverStream::new(rx),
            token: token.clone(),
            _guard: token.drop_guard(),
        })
    }

    /// Abort the in-flight turn, if any.
    ///
    /// The user turn stays recorded; no assistant reply is recorded.
    pub fn cancel(&self) -> bool {
        match self.inner.in_flight.lock().unwrap().as_ref() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Check whether the session has been idle longer than `timeout`.
    #[must_use]
    pub fn is_expired_with_timeout(&self, timeout: Duration) -> bool {
        let last = *self.inner.last_activity.read().unwrap();
        (Utc::now() - last)
            .to_std()
            .is_ok_and(|idle| idle > timeout)
    }

    fn push(&self, turn: ConversationTurn) {
        self.inner.turns.write().unwrap().push(turn);
        self.touch();
    }

    fn touch(&self) {
        *self.inner.last_activity.write().unwrap() = Utc::now();
    }

    /// Grounding system prompt followed by every well-formed turn.
    fn request(&self) -> LlmRequest {
        let mut messages = vec![Message::system(system_prompt(self.grounding()))];
        messages.extend(
            self.inner
                .turns
                .read()
                .unwrap()
                .iter()
                .filter(|t| t.is_well_formed())
                .map(ConversationTurn::to_message),
        );

        let options = &self.inner.options;
        LlmRequest {
            model: options.model.clone(),
            temperature: Some(options.temperature),
            max_tokens: Some(options.max_tokens),
            timeout: Some(options.timeout),
            ..LlmRequest::new(messages)
        }
    }

    async fn relay(
        self,
        llm: Arc<dyn LlmDriver>,
        request: LlmRequest,
        tx: mpsc::Sender<Result<String, ChatError>>,
        token: CancellationToken,
    ) {
        let reply = tokio::select! {
            biased;
            () = token.cancelled() => None,
            reply = pump(llm, request, &tx) => reply,
        };

        match reply {
            Some(reply) if !reply.is_empty() => {
                tracing::info!(
                    name: "chat.turn.completed",
                    session_id = %self.inner.id,
                    chars = reply.len(),
                    "Chat turn completed"
                );
                self.push(ConversationTurn::assistant(reply));
            }
            Some(_) => {
                tracing::warn!(session_id = %self.inner.id, "Model returned an empty reply");
            }
            None if token.is_cancelled() => {
                tracing::info!(name: "chat.turn.cancelled", session_id = %self.inner.id, "Chat turn cancelled");
            }
            None => {}
        }

        // Record first, then release the turn, then close the channel.
        *self.inner.in_flight.lock().unwrap() = None;
        drop(tx);
    }
}

/// Forward model fragments to `tx`. Returns the full reply when the model
/// finished, `None` when it failed or the consumer went away.
async fn pump(
    llm: Arc<dyn LlmDriver>,
    request: LlmRequest,
    tx: &mpsc::Sender<Result<String, ChatError>>,
) -> Option<String> {
    let mut stream = match llm.stream(request).await {
        Ok(stream) => stream,
        Err(e) => {
            tracing::warn!(error = %e, "Chat request rejected");
            let _ = tx.send(Err(e.into())).await;
            return None;
        }
    };

    let mut reply = String::new();
    while let Some(item) = stream.next().await {
        match item {
            Ok(fragment) => {
                reply.push_str(&fragment);
                if tx.send(Ok(fragment)).await.is_err() {
                    return None;
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Chat stream failed");
                let _ = tx.send(Err(e.into())).await;
                return None;
            }
        }
    }
    Some(reply)
}

/// Assistant text fragments for one turn.
///
/// Ends when the reply is complete, fails, or the turn is cancelled.
/// Fragments still buffered at cancellation are discarded.
pub struct ReplyStream {
    rx: ReceiverStream<Result<String, ChatError>>,
    token: CancellationToken,
    _guard: DropGuard,
}

impl std::fmt::Debug for ReplyStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplyStream")
            .field("cancelled", &self.token.is_cancelled())
            .finish()
    }
}

impl Stream for ReplyStream {
    type Item = Result<String, ChatError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.token.is_cancelled() {
            return Poll::Ready(None);
        }
        Pin::new(&mut self.rx).poll_next(cx)
    }
}
