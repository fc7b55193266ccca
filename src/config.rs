use crate::llm::{AnalysisMode, LlmSettings, Provider, provider::DEFAULT_BASE_URL};
use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use std::env;
use std::time::Duration;

/// Model used for document analysis when `LLM_MODEL` is unset.
pub const DEFAULT_ANALYSIS_MODEL: &str = "gemini-2.0-flash";
/// Model used for chat when `LLM_CHAT_MODEL` is unset.
pub const DEFAULT_CHAT_MODEL: &str = "gemini-2.5-flash";

const DEFAULT_AZURE_API_VERSION: &str = "2024-08-01-preview";

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file path
    #[arg(short, long, env = "CONFIG_FILE")]
    pub config: Option<String>,

    /// Port to listen on
    #[arg(long, env = "PORT")]
    pub port: Option<u16>,

    /// Address to bind
    #[arg(long, env = "HOST")]
    pub host: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub limits: LimitsConfig,
    pub llm: LlmTimeouts,
    pub sessions: SessionsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
    /// Time budget for producing a response (headers), in seconds.
    pub request_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LimitsConfig {
    pub max_upload_bytes: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmTimeouts {
    pub analysis_timeout_secs: u64,
    pub chat_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SessionsConfig {
    pub idle_timeout_secs: u64,
}

impl ServerConfig {
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl LlmTimeouts {
    #[must_use]
    pub fn analysis_timeout(&self) -> Duration {
        Duration::from_secs(self.analysis_timeout_secs)
    }

    #[must_use]
    pub fn chat_timeout(&self) -> Duration {
        Duration::from_secs(self.chat_timeout_secs)
    }
}

impl SessionsConfig {
    #[must_use]
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

impl AppConfig {
    pub fn load() -> Result<Self, config::ConfigError> {
        Self::load_from_args(std::env::args())
    }

    /// Layered load: defaults, config file, `CLARIFY_*` env, CLI flags.
    pub fn load_from_args<I, T>(args: I) -> Result<Self, config::ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let cli =
            Cli::try_parse_from(args).map_err(|e| config::ConfigError::Message(e.to_string()))?;

        let mut builder = Config::builder()
            .set_default("server.port", 3000)?
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.request_timeout_secs", 90)?
            .set_default("limits.max_upload_bytes", 10 * 1024 * 1024)?
            .set_default("llm.analysis_timeout_secs", 60)?
            .set_default("llm.chat_timeout_secs", 30)?
            .set_default("sessions.idle_timeout_secs", 30 * 60)?;

        // An explicit file must exist; ./config.{toml,yaml,json} is optional.
        builder = match &cli.config {
            Some(path) => builder.add_source(File::with_name(path)),
            None => builder.add_source(File::with_name("config").required(false)),
        };

        // E.g. CLARIFY_SERVER__PORT=8000
        builder = builder.add_source(
            Environment::with_prefix("CLARIFY")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        // clap already folded PORT/HOST into these.
        if let Some(port) = cli.port {
            builder = builder.set_override("server.port", port)?;
        }
        if let Some(host) = cli.host {
            builder = builder.set_override("server.host", host)?;
        }

        let cfg = builder.build()?;
        cfg.try_deserialize()
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.trim().is_empty())
}

/// Read LLM settings from the environment.
///
/// Only a malformed base URL is an error. A missing key yields unconfigured
/// settings so the server can still start and report `NotConfigured` per
/// request.
pub fn load_llm_settings() -> Result<LlmSettings, String> {
    let base_url = non_empty_var("LLM_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
    if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
        return Err(format!("LLM_BASE_URL must be an http(s) URL, got {base_url:?}"));
    }

    let model = non_empty_var("LLM_MODEL").unwrap_or_else(|| DEFAULT_ANALYSIS_MODEL.to_string());
    let chat_model =
        non_empty_var("LLM_CHAT_MODEL").unwrap_or_else(|| DEFAULT_CHAT_MODEL.to_string());

    let api_key =
        non_empty_var("LLM_API_KEY").or_else(|| non_empty_var("GOOGLE_GENERATIVE_AI_API_KEY"));

    let analysis_mode = non_empty_var("LLM_ANALYSIS_MODE")
        .map(|s| AnalysisMode::parse(&s))
        .unwrap_or_default();

    // Auto-detect provider from base URL
    let mut provider = Provider::detect_from_url(&base_url);

    if let Provider::AzureOpenAI { .. } = &provider {
        if let Some(deployment_name) = non_empty_var("AZURE_DEPLOYMENT_NAME") {
            provider = Provider::AzureOpenAI {
                deployment_name,
                api_version: non_empty_var("AZURE_API_VERSION")
                    .unwrap_or_else(|| DEFAULT_AZURE_API_VERSION.to_string()),
            };
        }
    }

    Ok(LlmSettings {
        base_url: base_url.trim_end_matches('/').to_string(),
        api_key,
        model,
        chat_model,
        provider,
        analysis_mode,
    })
}
