//! Refresh orchestration: fetch, then decode, clean and classify each message.

use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tracing::{error, info};

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::mail::{Mailbox, RawMessage, decode};
use crate::pipeline::classifier::Classifier;
use crate::pipeline::normalize::clean;
use crate::pipeline::types::{ClassificationResult, DashboardSnapshot};

/// Composes the mailbox, decoder, normalizer and classifier into one refresh.
///
/// Holds no per-run state, so concurrent `run` calls are independent.
pub struct Pipeline {
    mailbox: Arc<dyn Mailbox>,
    classifier: Arc<Classifier>,
    concurrency: usize,
}

impl Pipeline {
    pub fn new(
        mailbox: Arc<dyn Mailbox>,
        classifier: Arc<Classifier>,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            mailbox,
            classifier,
            concurrency: config.concurrency.max(1),
        }
    }

    /// Fetch up to `limit` recent unseen messages and classify them.
    ///
    /// A mailbox failure aborts the run before any classification call.
    /// Results keep the mailbox order (most recent first).
    pub async fn run(&self, limit: usize) -> Result<DashboardSnapshot, PipelineError> {
        let messages = self.mailbox.fetch_recent_unseen(limit).await.map_err(|e| {
            error!(error = %e, "Refresh aborted");
            PipelineError::from(e)
        })?;

        info!(count = messages.len(), limit, "Classifying fetched messages");

        let classifier = Arc::clone(&self.classifier);
        let results: Vec<ClassificationResult> = stream::iter(messages)
            .map(move |raw| process(Arc::clone(&classifier), raw))
            .buffered(self.concurrency)
            .collect()
            .await;

        let snapshot = DashboardSnapshot::from_results(results);
        info!(
            total = snapshot.total,
            urgent = snapshot.urgent_count,
            promotion = snapshot.promotion_count,
            "Refresh complete"
        );
        Ok(snapshot)
    }
}

async fn process(classifier: Arc<Classifier>, raw: RawMessage) -> ClassificationResult {
    let email = decode(&raw);
    let cleaned_body = clean(Some(&email.body));
    let category = classifier.classify(&email.subject, &cleaned_body).await;

    ClassificationResult {
        uid: raw.uid,
        email,
        category,
        cleaned_body,
    }
}
