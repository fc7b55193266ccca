//! LLM driver traits and implementations.
//!
//! This module abstracts the hosted model behind the [`LlmDriver`] trait.
//! The service only ever needs two things from a model: one complete answer
//! (document analysis) and a stream of text fragments (chat).
//!
//! # Drivers
//!
//! - [`ChatCompletionsDriver`]: OpenAI-compatible Chat Completions API, which
//!   Gemini, `OpenAI`, Azure, `OpenRouter` and Groq all expose.
//!
//! # Example
//!
//! ```rust,ignore
//! use legal_clarify::llm::{self, LlmRequest, Message};
//!
//! let settings = legal_clarify::config::load_llm_settings()?;
//! let driver = llm::connect(&settings).expect("LLM_API_KEY is set");
//! let answer = driver
//!     .complete(LlmRequest::new(vec![Message::user("Hello")]))
//!     .await?;
//! ```

pub mod chat_completions;
pub mod provider;

pub use chat_completions::ChatCompletionsDriver;
pub use provider::Provider;

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures::Stream;

/// LLM connection and model settings.
#[derive(Clone)]
pub struct LlmSettings {
    /// Base URL for the LLM API (e.g., `https://generativelanguage.googleapis.com/v1beta/openai`).
    pub base_url: String,
    /// API key. `None` leaves the capability unconfigured.
    pub api_key: Option<String>,
    /// Model used for document analysis.
    pub model: String,
    /// Model used for follow-up chat.
    pub chat_model: String,
    /// Provider type (auto-detected from `base_url`).
    pub provider: Provider,
    /// How analysis responses are requested.
    pub analysis_mode: AnalysisMode,
}

impl std::fmt::Debug for LlmSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmSettings")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("model", &self.model)
            .field("chat_model", &self.chat_model)
            .field("provider", &self.provider)
            .field("analysis_mode", &self.analysis_mode)
            .finish()
    }
}

impl LlmSettings {
    /// Whether a credential is present.
    #[must_use]
    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    /// Resolve `Auto` against what the provider supports.
    #[must_use]
    pub fn effective_analysis_mode(&self) -> AnalysisMode {
        match self.analysis_mode {
            AnalysisMode::Auto if self.provider.supports_structured_output() => {
                AnalysisMode::Structured
            }
            AnalysisMode::Auto => AnalysisMode::FreeText,
            mode => mode,
        }
    }
}

/// How the analysis request asks for structured output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AnalysisMode {
    /// Structured when the provider supports it, free text otherwise.
    #[default]
    Auto,
    /// Ask the provider to emit JSON that honors a declared schema.
    Structured,
    /// Ask for JSON in prose and scan the reply for it.
    FreeText,
}

impl AnalysisMode {
    /// Parse a mode name; unknown names fall back to `Auto`.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "structured" | "schema" => Self::Structured,
            "free_text" | "free-text" | "text" => Self::FreeText,
            _ => Self::Auto,
        }
    }
}

/// Role of a message author.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// System prompt.
    System,
    /// User message.
    User,
    /// Assistant response.
    Assistant,
}

/// A message sent to the model.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Message {
    /// Role of the message author.
    pub role: MessageRole,
    /// Text content.
    pub content: String,
}

impl Message {
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }
}

/// Request to an LLM driver.
#[derive(Debug, Clone, Default)]
pub struct LlmRequest {
    /// Conversation messages, system prompt first.
    pub messages: Vec<Message>,
    /// Model override; the driver's analysis model is used when absent.
    pub model: Option<String>,
    /// Sampling temperature.
    pub temperature: Option<f32>,
    /// Upper bound on generated tokens.
    pub max_tokens: Option<u32>,
    /// `response_format` payload for schema-constrained output.
    pub response_format: Option<serde_json::Value>,
    /// Time budget for the whole call.
    pub timeout: Option<Duration>,
}

impl LlmRequest {
    #[must_use]
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            ..Self::default()
        }
    }
}

/// Stream of assistant text fragments.
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String, LlmError>> + Send>>;

/// Failures reported by an LLM driver.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    /// The provider rejected the credential.
    #[error("LLM provider rejected the API key ({status}): {message}")]
    Unauthorized { status: u16, message: String },

    /// Rate or usage limit reached.
    #[error("LLM provider quota exceeded: {0}")]
    QuotaExceeded(String),

    /// The time budget elapsed before the provider answered.
    #[error("LLM request timed out")]
    Timeout,

    /// Any other non-success HTTP status.
    #[error("LLM provider returned {status}: {message}")]
    Status { status: u16, message: String },

    /// Connection-level failure.
    #[error("LLM transport error: {0}")]
    Transport(String),

    /// The provider answered with something that is not a completion.
    #[error("malformed LLM response: {0}")]
    Decode(String),

    /// An error message reported in-band by the provider.
    #[error("{0}")]
    Provider(String),
}

impl From<reqwest::Error> for LlmError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else if e.is_decode() {
            Self::Decode(e.to_string())
        } else {
            Self::Transport(e.to_string())
        }
    }
}

/// Trait for LLM drivers.
#[async_trait::async_trait]
pub trait LlmDriver: Send + Sync {
    /// Request one complete answer and return the assistant text.
    async fn complete(&self, req: LlmRequest) -> Result<String, LlmError>;

    /// Stream the assistant answer as text fragments.
    ///
    /// # Errors
    ///
    /// Returns an error if the request is rejected before streaming begins.
    /// Failures after that arrive as items of the stream.
    async fn stream(&self, req: LlmRequest) -> Result<TextStream, LlmError>;
}

/// Build the driver for `settings`, or `None` when no credential is set.
#[must_use]
pub fn connect(settings: &LlmSettings) -> Option<Arc<dyn LlmDriver>> {
    if !settings.is_configured() {
        return None;
    }
    Some(Arc::new(ChatCompletionsDriver::new(settings.clone())))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(base_url: &str, mode: AnalysisMode) -> LlmSettings {
        LlmSettings {
            base_url: base_url.to_string(),
            api_key: None,
            model: "m".to_string(),
            chat_model: "m".to_string(),
            provider: Provider::detect_from_url(base_url),
            analysis_mode: mode,
        }
    }

    #[test]
    fn test_auto_mode_follows_provider() {
        let gemini = settings(
            "https://generativelanguage.googleapis.com/v1beta/openai",
            AnalysisMode::Auto,
        );
        assert_eq!(gemini.effective_analysis_mode(), AnalysisMode::Structured);

        let local = settings("http://localhost:11434", AnalysisMode::Auto);
        assert_eq!(local.effective_analysis_mode(), AnalysisMode::FreeText);
    }

    #[test]
    fn test_explicit_mode_wins() {
        let local = settings("http://localhost:11434", AnalysisMode::Structured);
        assert_eq!(local.effective_analysis_mode(), AnalysisMode::Structured);
    }

    #[test]
    fn test_parse_mode() {
        assert_eq!(AnalysisMode::parse("free_text"), AnalysisMode::FreeText);
        assert_eq!(AnalysisMode::parse(" Structured "), AnalysisMode::Structured);
        assert_eq!(AnalysisMode::parse("whatever"), AnalysisMode::Auto);
    }

    #[test]
    fn test_connect_requires_key() {
        let unconfigured = settings("https://api.openai.com", AnalysisMode::Auto);
        assert!(connect(&unconfigured).is_none());

        let configured = LlmSettings {
            api_key: Some("sk-test".to_string()),
            ..unconfigured
        };
        assert!(connect(&configured).is_some());
    }

    #[test]
    fn test_debug_redacts_key() {
        let s = LlmSettings {
            api_key: Some("sk-secret".to_string()),
            ..settings("https://api.openai.com", AnalysisMode::Auto)
        };
        let dbg = format!("{s:?}");
        assert!(!dbg.contains("sk-secret"));
        assert!(dbg.contains("<redacted>"));
    }
}
