//! LLM integration for inbox-triage.
//!
//! Supports:
//! - **Ollama**: local or remote runtime via `/api/chat`
//! - **OpenAI**: any OpenAI-compatible `/v1/chat/completions` endpoint
//!
//! Both backends are plain `reqwest` clients behind the `LlmProvider` trait.

mod ollama;
mod openai;
pub mod provider;

pub use ollama::OllamaProvider;
pub use openai::OpenAiProvider;
pub use provider::*;

use std::sync::Arc;

/// Supported LLM backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmBackend {
    Ollama,
    OpenAi,
}

impl LlmBackend {
    /// Base URL used when none is configured.
    pub fn default_base_url(self) -> &'static str {
        match self {
            Self::Ollama => "http://localhost:11434",
            Self::OpenAi => "https://api.openai.com",
        }
    }
}

/// Configuration for creating an LLM provider.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub backend: LlmBackend,
    pub base_url: String,
    pub api_key: Option<secrecy::SecretString>,
    pub model: String,
}

/// Create an LLM provider from configuration.
pub fn create_provider(config: &LlmConfig) -> Arc<dyn LlmProvider> {
    match config.backend {
        LlmBackend::Ollama => {
            tracing::info!("Using Ollama at {} (model: {})", config.base_url, config.model);
            Arc::new(OllamaProvider::new(&config.base_url, &config.model))
        }
        LlmBackend::OpenAi => {
            tracing::info!(
                "Using OpenAI-compatible API at {} (model: {})",
                config.base_url,
                config.model
            );
            Arc::new(OpenAiProvider::new(
                &config.base_url,
                config.api_key.clone(),
                &config.model,
            ))
        }
    }
}
