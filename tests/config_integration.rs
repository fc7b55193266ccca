use legal_clarify::config::{AppConfig, DEFAULT_ANALYSIS_MODEL, DEFAULT_CHAT_MODEL, load_llm_settings};
use legal_clarify::llm::{AnalysisMode, Provider};
use serial_test::serial;
use std::env;
use std::fs;
use std::io::Write;

const BIN: &str = "legal-clarify";

// Helper to clear environment variables that might interfere with tests
fn clear_env_vars() {
    unsafe {
        for key in [
            "CLARIFY_SERVER__PORT",
            "CLARIFY_LIMITS__MAX_UPLOAD_BYTES",
            "CONFIG_FILE",
            "PORT",
            "HOST",
            "LLM_BASE_URL",
            "LLM_MODEL",
            "LLM_CHAT_MODEL",
            "LLM_API_KEY",
            "GOOGLE_GENERATIVE_AI_API_KEY",
            "LLM_ANALYSIS_MODE",
            "AZURE_DEPLOYMENT_NAME",
            "AZURE_API_VERSION",
        ] {
            env::remove_var(key);
        }
    }
}

#[test]
#[serial]
fn test_default_config() {
    clear_env_vars();

    let config = AppConfig::load_from_args([BIN]).expect("defaults load");
    assert_eq!(config.server.port, 3000);
    assert_eq!(config.server.host, "0.0.0.0");
    assert_eq!(config.limits.max_upload_bytes, 10 * 1024 * 1024);
    assert_eq!(config.llm.analysis_timeout_secs, 60);
    assert_eq!(config.llm.chat_timeout_secs, 30);
    assert_eq!(config.sessions.idle_timeout_secs, 1800);
}

#[test]
#[serial]
fn test_env_override() {
    clear_env_vars();
    unsafe {
        env::set_var("CLARIFY_SERVER__PORT", "9090");
        env::set_var("CLARIFY_LIMITS__MAX_UPLOAD_BYTES", "1024");
    }

    let config = AppConfig::load_from_args([BIN]).expect("Failed to load config");
    assert_eq!(config.server.port, 9090);
    assert_eq!(config.limits.max_upload_bytes, 1024);

    clear_env_vars();
}

#[test]
#[serial]
fn test_cli_beats_env() {
    clear_env_vars();
    unsafe {
        env::set_var("CLARIFY_SERVER__PORT", "9090");
    }

    let config = AppConfig::load_from_args([BIN, "--port", "4000", "--host", "127.0.0.1"])
        .expect("Failed to load config");
    assert_eq!(config.server.port, 4000);
    assert_eq!(config.server.host, "127.0.0.1");

    clear_env_vars();
}

#[test]
#[serial]
fn test_file_load() {
    clear_env_vars();

    let mut file = tempfile::Builder::new()
        .suffix(".yaml")
        .tempfile()
        .expect("Failed to create temp config");
    write!(
        file,
        "server:\n  port: 7070\nsessions:\n  idle_timeout_secs: 60\n"
    )
    .unwrap();

    let path = file.path().to_str().unwrap().to_string();
    let config =
        AppConfig::load_from_args([BIN, "--config", &path]).expect("Failed to load config from file");
    assert_eq!(config.server.port, 7070);
    assert_eq!(config.sessions.idle_timeout_secs, 60);
    assert_eq!(config.llm.chat_timeout_secs, 30);
}

#[test]
#[serial]
fn test_missing_explicit_file_fails() {
    clear_env_vars();
    let result = AppConfig::load_from_args([BIN, "--config", "/nonexistent/clarify.yaml"]);
    assert!(result.is_err());
}

#[test]
#[serial]
fn test_cwd_config_fallback() {
    clear_env_vars();

    let cwd_path = "config.yaml";
    fs::write(cwd_path, "server:\n  port: 6060\n").expect("Failed to write ./config.yaml");

    let config = AppConfig::load_from_args([BIN]);
    fs::remove_file(cwd_path).unwrap();

    assert_eq!(config.expect("Failed to load config").server.port, 6060);
}

#[test]
#[serial]
fn test_llm_defaults_without_key() {
    clear_env_vars();

    let settings = load_llm_settings().expect("defaults are valid");
    assert!(!settings.is_configured());
    assert_eq!(settings.provider, Provider::Gemini);
    assert_eq!(settings.model, DEFAULT_ANALYSIS_MODEL);
    assert_eq!(settings.chat_model, DEFAULT_CHAT_MODEL);
    assert_eq!(settings.effective_analysis_mode(), AnalysisMode::Structured);
}

#[test]
#[serial]
fn test_llm_key_fallback_and_overrides() {
    clear_env_vars();
    unsafe {
        env::set_var("GOOGLE_GENERATIVE_AI_API_KEY", "g-key");
        env::set_var("LLM_BASE_URL", "http://localhost:11434/v1/");
        env::set_var("LLM_ANALYSIS_MODE", "free_text");
    }

    let settings = load_llm_settings().unwrap();
    assert_eq!(settings.api_key.as_deref(), Some("g-key"));
    assert_eq!(settings.base_url, "http://localhost:11434/v1");
    assert_eq!(settings.provider, Provider::Generic);
    assert_eq!(settings.effective_analysis_mode(), AnalysisMode::FreeText);

    unsafe {
        env::set_var("LLM_API_KEY", "primary");
    }
    assert_eq!(load_llm_settings().unwrap().api_key.as_deref(), Some("primary"));

    clear_env_vars();
}

#[test]
#[serial]
fn test_azure_deployment() {
    clear_env_vars();
    unsafe {
        env::set_var("LLM_BASE_URL", "https://acme.openai.azure.com");
        env::set_var("AZURE_DEPLOYMENT_NAME", "gpt4o");
    }

    let settings = load_llm_settings().unwrap();
    assert_eq!(
        settings.provider,
        Provider::AzureOpenAI {
            deployment_name: "gpt4o".to_string(),
            api_version: "2024-08-01-preview".to_string(),
        }
    );

    clear_env_vars();
}

#[test]
#[serial]
fn test_invalid_base_url() {
    clear_env_vars();
    unsafe {
        env::set_var("LLM_BASE_URL", "localhost:8080");
    }
    assert!(load_llm_settings().is_err());
    clear_env_vars();
}
