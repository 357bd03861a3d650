//! Environment-driven configuration.

use std::path::PathBuf;

use secrecy::SecretString;

use crate::error::ConfigError;
use crate::llm::{LlmBackend, LlmConfig};

/// Everything the binary needs to start, read once from the environment.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Which model backend to call.
    pub backend: LlmBackend,
    /// API key for the selected backend.
    pub api_key: SecretString,
    /// Model identifier passed to the provider.
    pub model: String,
    /// Endpoint override (proxies, compatible gateways, test servers).
    pub base_url: Option<String>,
    /// Where the libSQL database file lives.
    pub db_path: PathBuf,
    /// Port the HTTP server binds.
    pub port: u16,
}

impl AppConfig {
    /// Read configuration from `INBOX_PILOT_*` variables plus the provider
    /// key variable (`ANTHROPIC_API_KEY` or `OPENAI_API_KEY`).
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let backend = match get("INBOX_PILOT_BACKEND") {
            Some(value) => value.parse().map_err(|message| ConfigError::InvalidValue {
                key: "INBOX_PILOT_BACKEND".to_string(),
                message,
            })?,
            None => LlmBackend::Anthropic,
        };

        let key_var = match backend {
            LlmBackend::Anthropic => "ANTHROPIC_API_KEY",
            LlmBackend::OpenAi => "OPENAI_API_KEY",
        };
        let api_key = get(key_var)
            .map(SecretString::from)
            .ok_or_else(|| ConfigError::MissingEnvVar(key_var.to_string()))?;

        let model =
            get("INBOX_PILOT_MODEL").unwrap_or_else(|| default_model(backend).to_string());

        let base_url = get("INBOX_PILOT_BASE_URL");

        let db_path = get("INBOX_PILOT_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("data/inbox-pilot.db"));

        let port = match get("INBOX_PILOT_PORT") {
            Some(value) => value.parse().map_err(|_| ConfigError::InvalidValue {
                key: "INBOX_PILOT_PORT".to_string(),
                message: format!("{value:?} is not a port number"),
            })?,
            None => 8080,
        };

        Ok(Self {
            backend,
            api_key,
            model,
            base_url,
            db_path,
            port,
        })
    }

    /// The provider slice of the configuration.
    pub fn llm_config(&self) -> LlmConfig {
        LlmConfig {
            backend: self.backend,
            api_key: self.api_key.clone(),
            model: self.model.clone(),
            base_url: self.base_url.clone(),
        }
    }
}

fn default_model(backend: LlmBackend) -> &'static str {
    match backend {
        LlmBackend::Anthropic => "claude-3-5-sonnet-20240620",
        LlmBackend::OpenAi => "gpt-4o-mini",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_fill_in_around_the_api_key() {
        let config =
            AppConfig::from_lookup(lookup(&[("ANTHROPIC_API_KEY", "sk-test")])).unwrap();
        assert_eq!(config.backend, LlmBackend::Anthropic);
        assert_eq!(config.model, "claude-3-5-sonnet-20240620");
        assert_eq!(config.port, 8080);
        assert_eq!(config.db_path, PathBuf::from("data/inbox-pilot.db"));
        assert!(config.base_url.is_none());
    }

    #[test]
    fn missing_api_key_is_an_error() {
        let err = AppConfig::from_lookup(lookup(&[])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(var) if var == "ANTHROPIC_API_KEY"));
    }

    #[test]
    fn openai_backend_reads_the_openai_key() {
        let config = AppConfig::from_lookup(lookup(&[
            ("INBOX_PILOT_BACKEND", "openai"),
            ("OPENAI_API_KEY", "sk-test"),
        ]))
        .unwrap();
        assert_eq!(config.backend, LlmBackend::OpenAi);
        assert_eq!(config.model, "gpt-4o-mini");

        let err = AppConfig::from_lookup(lookup(&[("INBOX_PILOT_BACKEND", "openai")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(var) if var == "OPENAI_API_KEY"));
    }

    #[test]
    fn bad_values_are_rejected() {
        let err = AppConfig::from_lookup(lookup(&[
            ("ANTHROPIC_API_KEY", "sk-test"),
            ("INBOX_PILOT_PORT", "not-a-port"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { key, .. } if key == "INBOX_PILOT_PORT"));

        let err = AppConfig::from_lookup(lookup(&[("INBOX_PILOT_BACKEND", "mistral")]))
            .unwrap_err();
        assert!(
            matches!(err, ConfigError::InvalidValue { key, .. } if key == "INBOX_PILOT_BACKEND")
        );
    }

    #[test]
    fn explicit_values_override_defaults() {
        let config = AppConfig::from_lookup(lookup(&[
            ("ANTHROPIC_API_KEY", "sk-test"),
            ("INBOX_PILOT_MODEL", "claude-3-7-sonnet-latest"),
            ("INBOX_PILOT_BASE_URL", "http://127.0.0.1:9999"),
            ("INBOX_PILOT_DB_PATH", "/tmp/pilot.db"),
            ("INBOX_PILOT_PORT", "9090"),
        ]))
        .unwrap();
        assert_eq!(config.model, "claude-3-7-sonnet-latest");
        assert_eq!(config.base_url.as_deref(), Some("http://127.0.0.1:9999"));
        assert_eq!(config.db_path, PathBuf::from("/tmp/pilot.db"));
        assert_eq!(config.port, 9090);

        let llm = config.llm_config();
        assert_eq!(llm.model, "claude-3-7-sonnet-latest");
        assert_eq!(llm.base_url.as_deref(), Some("http://127.0.0.1:9999"));
    }
}
