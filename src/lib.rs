//! Legal Clarify
//!
//! Explains legal documents in plain language. Users upload or paste a
//! document, receive a structured analysis, then ask follow-up questions in
//! a chat grounded in that document and its analysis.
//!
//! # Architecture
//!
//! - **Server**: Axum HTTP API with streamed chat replies
//! - **LLM**: one driver for OpenAI-compatible Chat Completions endpoints
//!   (Gemini by default)
//! - **Analysis**: prompt building, schema-constrained or free-text requests,
//!   field-by-field validation
//!
//! # Modules
//!
//! - [`extraction`]: plain text from TXT, PDF and DOCX uploads
//! - [`analysis`]: prompt builder, analysis requester and validator
//! - [`llm`]: LLM driver trait and implementation
//! - [`session`]: chat sessions and their grounding context
//! - [`server`]: routes, handlers and error responses

// Allow pedantic clippy warnings that don't add value for this codebase
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::missing_fields_in_debug)]
#![allow(clippy::match_same_arms)]
#![allow(clippy::cargo_common_metadata)]
#![allow(clippy::multiple_crate_versions)]
#![allow(clippy::unused_async)]

pub mod analysis;
pub mod config;
pub mod extraction;
pub mod llm;
pub mod server;
pub mod session;

use crate::analysis::Analyzer;
use crate::config::AppConfig;
use crate::llm::{AnalysisMode, LlmDriver, LlmSettings};
use crate::session::{ChatOptions, SessionStore};
use std::sync::Arc;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Model driver; `None` when no API key is configured.
    pub llm: Option<Arc<dyn LlmDriver>>,
    /// Analysis requester for `/analyze`.
    pub analyzer: Analyzer,
    /// Generation settings for chat turns.
    pub chat_options: ChatOptions,
    /// Server-side chat sessions.
    pub sessions: SessionStore,
    /// Global Configuration
    pub config: Arc<AppConfig>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("llm_configured", &self.llm.is_some())
            .field("analyzer", &self.analyzer)
            .field("chat_options", &self.chat_options)
            .field("sessions", &self.sessions.len())
            .finish()
    }
}

impl AppState {
    /// Build state from loaded configuration and LLM settings.
    pub fn new(config: Arc<AppConfig>, settings: &LlmSettings) -> Self {
        Self::with_driver(
            config,
            llm::connect(settings),
            settings.effective_analysis_mode(),
            Some(settings.chat_model.clone()),
        )
    }

    /// Build state around an explicit driver.
    pub fn with_driver(
        config: Arc<AppConfig>,
        llm: Option<Arc<dyn LlmDriver>>,
        analysis_mode: AnalysisMode,
        chat_model: Option<String>,
    ) -> Self {
        let analyzer = Analyzer::new(
            llm.clone(),
            analysis_mode,
            config.llm.analysis_timeout(),
        );
        let chat_options = ChatOptions {
            model: chat_model,
            timeout: config.llm.chat_timeout(),
            ..ChatOptions::default()
        };
        let sessions = SessionStore::new(config.sessions.idle_timeout());

        Self {
            llm,
            analyzer,
            chat_options,
            sessions,
            config,
        }
    }
}
