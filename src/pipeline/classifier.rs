//! Classification engine: one constrained model call per message.
//!
//! Every failure mode (timeout, transport error, unexpected answer) collapses
//! into `Category::Error`, so `classify` never fails.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::config::ClassifierConfig;
use crate::error::LlmError;
use crate::llm::provider::{ChatMessage, CompletionRequest, LlmProvider};
use crate::pipeline::types::Category;

/// Temperature for classification (single-token answers, deterministic).
const CLASSIFY_TEMPERATURE: f32 = 0.0;

/// A category name is a handful of tokens; leave headroom for stray whitespace.
const CLASSIFY_MAX_TOKENS: u32 = 16;

/// Assigns a [`Category`] to a message using a language model.
pub struct Classifier {
    llm: Arc<dyn LlmProvider>,
    timeout: Duration,
}

impl Classifier {
    pub fn new(llm: Arc<dyn LlmProvider>, config: &ClassifierConfig) -> Self {
        Self {
            llm,
            timeout: config.timeout,
        }
    }

    /// Classify a message from its subject and cleaned body.
    pub async fn classify(&self, subject: &str, body: &str) -> Category {
        let request = CompletionRequest::new(vec![
            ChatMessage::system(build_classify_system_prompt()),
            ChatMessage::user(build_classify_user_prompt(subject, body)),
        ])
        .with_temperature(CLASSIFY_TEMPERATURE)
        .with_max_tokens(CLASSIFY_MAX_TOKENS);

        let result = tokio::time::timeout(self.timeout, self.llm.complete(request))
            .await
            .unwrap_or_else(|_| {
                Err(LlmError::Timeout {
                    provider: self.llm.model_name().to_string(),
                    timeout: self.timeout,
                })
            });

        let response = match result {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, model = self.llm.model_name(), "Classification call failed");
                return Category::Error;
            }
        };

        let category = Category::from_model_output(&response.content);
        if category == Category::Error {
            warn!(raw_response = %response.content, "Unrecognized category from model");
        } else {
            debug!(category = %category, "Message classified");
        }
        category
    }
}

// ── Prompt construction ─────────────────────────────────────────────

fn build_classify_system_prompt() -> String {
    let labels: Vec<&str> = Category::VALID.iter().map(Category::as_str).collect();
    format!(
        "Classify this email into exactly ONE category: [{}].\n\
         Reply ONLY with the category name.",
        labels.join(", ")
    )
}

fn build_classify_user_prompt(subject: &str, body: &str) -> String {
    format!("Subject: {subject}\nBody: {body}")
}
