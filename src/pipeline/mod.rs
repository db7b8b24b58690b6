//! Retrieval-parse-classify pipeline.
//!
//! A refresh flows through:
//! 1. `Mailbox::fetch_recent_unseen()`: raw messages, most recent first
//! 2. `mail::decode()`: sender, subject and plain-text body
//! 3. `normalize::clean()`: single-line bounded preview
//! 4. `Classifier::classify()`: one model call per message
//! 5. `DashboardSnapshot::from_results()`: aggregate counts

pub mod classifier;
pub mod normalize;
pub mod orchestrator;
pub mod types;

pub use classifier::Classifier;
pub use orchestrator::Pipeline;
pub use types::{Category, ClassificationResult, DashboardSnapshot};
