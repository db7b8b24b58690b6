//! Configuration types, built once from environment variables at startup.

use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;
use crate::llm::{LlmBackend, LlmConfig};

/// Default number of unseen messages fetched per refresh.
pub const DEFAULT_FETCH_LIMIT: usize = 5;

/// Largest limit a refresh request may ask for.
pub const DEFAULT_MAX_FETCH_LIMIT: usize = 50;

/// Default model identifier for the classification runtime.
pub const DEFAULT_MODEL: &str = "llama3";

/// IMAP session configuration.
#[derive(Debug, Clone)]
pub struct ImapConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: SecretString,
    /// Folder selected after login.
    pub mailbox: String,
    /// Fetch with `RFC822` (sets `\Seen`) instead of `BODY.PEEK[]`.
    pub mark_seen: bool,
    /// Socket read timeout. `None` means wait indefinitely.
    pub read_timeout: Option<Duration>,
}

/// Classification settings.
#[derive(Debug, Clone)]
pub struct ClassifierConfig {
    /// Per-message model call timeout; on expiry the message is tagged ERROR.
    pub timeout: Duration,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
        }
    }
}

/// Refresh settings.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Maximum classification calls in flight during one run.
    pub concurrency: usize,
    /// Limit used when a refresh does not name one.
    pub fetch_limit: usize,
    /// Upper bound on the limit a refresh request may ask for.
    pub max_fetch_limit: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            fetch_limit: DEFAULT_FETCH_LIMIT,
            max_fetch_limit: DEFAULT_MAX_FETCH_LIMIT,
        }
    }
}

/// Process-wide configuration.
#[derive(Debug, Clone)]
pub struct InboxConfig {
    pub imap: ImapConfig,
    pub llm: LlmConfig,
    pub classifier: ClassifierConfig,
    pub pipeline: PipelineConfig,
    pub http_port: u16,
}

impl InboxConfig {
    /// Build config from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| -> Result<String, ConfigError> {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))
        };

        let imap = ImapConfig {
            host: required("IMAP_SERVER")?,
            port: parse_or(&lookup, "IMAP_PORT", 993)?,
            username: required("EMAIL_USER")?,
            password: SecretString::from(required("EMAIL_PASS")?),
            mailbox: lookup("IMAP_MAILBOX").unwrap_or_else(|| "INBOX".to_string()),
            mark_seen: parse_bool_or(&lookup, "IMAP_MARK_SEEN", true)?,
            read_timeout: lookup("IMAP_READ_TIMEOUT_SECS")
                .map(|s| parse_value::<u64>("IMAP_READ_TIMEOUT_SECS", &s))
                .transpose()?
                .map(Duration::from_secs),
        };

        let backend = match lookup("INBOX_LLM_BACKEND").as_deref() {
            None | Some("ollama") => LlmBackend::Ollama,
            Some("openai") => LlmBackend::OpenAi,
            Some(other) => {
                return Err(ConfigError::InvalidValue {
                    key: "INBOX_LLM_BACKEND".into(),
                    message: format!("unknown backend '{other}' (expected ollama or openai)"),
                });
            }
        };

        let llm = LlmConfig {
            backend,
            base_url: lookup("INBOX_LLM_URL").unwrap_or_else(|| backend.default_base_url().into()),
            api_key: lookup("INBOX_LLM_API_KEY").map(SecretString::from),
            model: lookup("INBOX_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
        };

        let classifier = ClassifierConfig {
            timeout: Duration::from_secs(parse_or(
                &lookup,
                "INBOX_CLASSIFY_TIMEOUT_SECS",
                ClassifierConfig::default().timeout.as_secs(),
            )?),
        };

        let defaults = PipelineConfig::default();
        let pipeline = PipelineConfig {
            concurrency: parse_or(&lookup, "INBOX_CLASSIFY_CONCURRENCY", defaults.concurrency)?
                .max(1),
            fetch_limit: parse_or(&lookup, "INBOX_FETCH_LIMIT", defaults.fetch_limit)?,
            max_fetch_limit: parse_or(&lookup, "INBOX_MAX_FETCH_LIMIT", defaults.max_fetch_limit)?,
        };
        if pipeline.fetch_limit > pipeline.max_fetch_limit {
            return Err(ConfigError::InvalidValue {
                key: "INBOX_FETCH_LIMIT".into(),
                message: format!(
                    "{} exceeds INBOX_MAX_FETCH_LIMIT ({})",
                    pipeline.fetch_limit, pipeline.max_fetch_limit
                ),
            });
        }

        Ok(Self {
            imap,
            llm,
            classifier,
            pipeline,
            http_port: parse_or(&lookup, "INBOX_HTTP_PORT", 8080)?,
        })
    }
}

fn parse_value<T>(key: &str, raw: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        key: key.to_string(),
        message: e.to_string(),
    })
}

fn parse_or<T, F>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => parse_value(key, &raw),
        None => Ok(default),
    }
}

fn parse_bool_or<F>(lookup: &F, key: &str, default: bool) -> Result<bool, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key).map(|s| s.trim().to_ascii_lowercase()).as_deref() {
        None => Ok(default),
        Some("1" | "true" | "yes" | "on") => Ok(true),
        Some("0" | "false" | "no" | "off") => Ok(false),
        Some(other) => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected a boolean, got '{other}'"),
        }),
    }
}
