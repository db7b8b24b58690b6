//! Error types for inbox-triage.

use std::time::Duration;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Mailbox session errors.
///
/// `Connection`, `Auth` and `Mailbox` are session-setup failures. Every
/// variant aborts the current fetch; no partial message list is returned.
#[derive(Debug, thiserror::Error)]
pub enum MailboxError {
    #[error("Connection to {host} failed: {reason}")]
    Connection { host: String, reason: String },

    #[error("Authentication failed for {user}: {reason}")]
    Auth { user: String, reason: String },

    #[error("Cannot select mailbox {mailbox}: {reason}")]
    Mailbox { mailbox: String, reason: String },

    #[error("IMAP protocol error: {0}")]
    Protocol(String),

    #[error("Session is {state}, cannot {operation}")]
    InvalidState { state: String, operation: String },

    #[error("Mailbox worker failed: {0}")]
    Worker(String),
}

/// LLM provider errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Provider {provider} timed out after {timeout:?}")]
    Timeout { provider: String, timeout: Duration },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Pipeline-related errors.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Mailbox fetch failed: {0}")]
    Mailbox(#[from] MailboxError),
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;
