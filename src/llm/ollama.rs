//! Ollama backend: non-streaming `POST /api/chat`.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::error::LlmError;
use crate::llm::provider::{
    ChatMessage, CompletionRequest, CompletionResponse, FinishReason, LlmProvider,
};

const PROVIDER: &str = "ollama";

/// Chat client for a local or remote Ollama runtime.
pub struct OllamaProvider {
    client: reqwest::Client,
    base_url: String,
    model: String,
}

impl OllamaProvider {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
        }
    }

    fn chat_url(&self) -> String {
        format!("{}/api/chat", self.base_url)
    }
}

#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    message: Option<ChatMessage>,
    #[serde(default)]
    done_reason: Option<String>,
    #[serde(default)]
    prompt_eval_count: u32,
    #[serde(default)]
    eval_count: u32,
    #[serde(default)]
    error: Option<String>,
}

fn parse_chat_response(body: &str) -> Result<CompletionResponse, LlmError> {
    let response: OllamaChatResponse = serde_json::from_str(body)?;

    if let Some(error) = response.error {
        return Err(LlmError::RequestFailed {
            provider: PROVIDER.into(),
            reason: error,
        });
    }

    let message = response.message.ok_or_else(|| LlmError::InvalidResponse {
        provider: PROVIDER.into(),
        reason: "response has no message".into(),
    })?;

    let finish_reason = match response.done_reason.as_deref() {
        Some("stop") | None => FinishReason::Stop,
        Some("length") => FinishReason::Length,
        Some(_) => FinishReason::Unknown,
    };

    Ok(CompletionResponse {
        content: message.content,
        input_tokens: response.prompt_eval_count,
        output_tokens: response.eval_count,
        finish_reason,
    })
}

#[async_trait]
impl LlmProvider for OllamaProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let mut options = serde_json::Map::new();
        if let Some(t) = request.temperature {
            options.insert("temperature".into(), json!(t));
        }
        if let Some(n) = request.max_tokens {
            options.insert("num_predict".into(), json!(n));
        }

        let body = json!({
            "model": self.model,
            "messages": request.messages,
            "stream": false,
            "options": options,
        });

        let resp = self
            .client
            .post(self.chat_url())
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::RequestFailed {
                provider: PROVIDER.into(),
                reason: e.to_string(),
            })?;

        let status = resp.status();
        let text = resp.text().await.map_err(|e| LlmError::RequestFailed {
            provider: PROVIDER.into(),
            reason: format!("failed to read body: {e}"),
        })?;

        if !status.is_success() {
            return Err(LlmError::RequestFailed {
                provider: PROVIDER.into(),
                reason: format!("HTTP {status}: {}", text.chars().take(200).collect::<String>()),
            });
        }

        parse_chat_response(&text)
    }
}
