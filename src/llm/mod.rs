//! LLM integration for Inbox Pilot.
//!
//! Two backends, both plain HTTP:
//! - **Anthropic**: Messages API
//! - **OpenAI**: chat-completions API (and compatible gateways)
//!
//! `InvocationClient` wraps whichever provider is configured with a
//! per-attempt deadline, bounded retry, and cost logging.

pub mod anthropic;
mod costs;
pub mod invoker;
pub mod openai;
pub mod provider;

pub use anthropic::AnthropicProvider;
pub use invoker::{InvocationClient, InvokeOptions};
pub use openai::OpenAiProvider;
pub use provider::*;

use std::sync::Arc;

use crate::error::LlmError;

/// Supported LLM backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmBackend {
    Anthropic,
    OpenAi,
}

impl std::str::FromStr for LlmBackend {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "anthropic" => Ok(Self::Anthropic),
            "openai" => Ok(Self::OpenAi),
            _ => Err(format!("Unknown LLM backend: {}", s)),
        }
    }
}

/// Configuration for creating an LLM provider.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub backend: LlmBackend,
    pub api_key: secrecy::SecretString,
    pub model: String,
    /// Endpoint override (proxies, compatible gateways, test servers).
    pub base_url: Option<String>,
}

/// Create an LLM provider from configuration.
pub fn create_provider(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>, LlmError> {
    match config.backend {
        LlmBackend::Anthropic => {
            let mut provider = AnthropicProvider::new(config.api_key.clone(), config.model.as_str())?;
            if let Some(base_url) = &config.base_url {
                provider = provider.with_base_url(base_url.as_str());
            }
            tracing::info!("Using Anthropic (model: {})", config.model);
            Ok(Arc::new(provider))
        }
        LlmBackend::OpenAi => {
            let mut provider = OpenAiProvider::new(config.api_key.clone(), config.model.as_str())?;
            if let Some(base_url) = &config.base_url {
                provider = provider.with_base_url(base_url.as_str());
            }
            tracing::info!("Using OpenAI (model: {})", config.model);
            Ok(Arc::new(provider))
        }
    }
}
