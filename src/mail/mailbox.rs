//! Async mailbox seam over the blocking IMAP session.

use async_trait::async_trait;
use tracing::{debug, error};

use super::session;
use super::types::RawMessage;
use crate::config::ImapConfig;
use crate::error::MailboxError;

/// Source of unseen messages. Pure I/O: no decoding or classification.
#[async_trait]
pub trait Mailbox: Send + Sync {
    /// Fetch at most `limit` of the most recent unseen messages, newest first.
    ///
    /// All-or-nothing: on error no messages are returned.
    async fn fetch_recent_unseen(&self, limit: usize) -> Result<Vec<RawMessage>, MailboxError>;
}

/// IMAP-backed mailbox. Each fetch opens its own session.
pub struct ImapMailbox {
    config: ImapConfig,
}

impl ImapMailbox {
    pub fn new(config: ImapConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Mailbox for ImapMailbox {
    async fn fetch_recent_unseen(&self, limit: usize) -> Result<Vec<RawMessage>, MailboxError> {
        let cfg = self.config.clone();

        // The blocking task owns its session, so the connection is closed even
        // if the caller stops awaiting.
        let fetch_result =
            tokio::task::spawn_blocking(move || session::fetch_recent_unseen(&cfg, limit)).await;

        match fetch_result {
            Ok(Ok(messages)) => {
                debug!(count = messages.len(), host = %self.config.host, "Mailbox fetch complete");
                Ok(messages)
            }
            Ok(Err(e)) => {
                error!("Mailbox fetch failed: {e}");
                Err(e)
            }
            Err(e) => {
                error!("Mailbox fetch task panicked: {e}");
                Err(MailboxError::Worker(e.to_string()))
            }
        }
    }
}
