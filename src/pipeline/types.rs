//! Shared types for the triage pipeline.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::mail::ParsedEmail;

// ── Category ────────────────────────────────────────────────────────

/// Classification label for a message.
///
/// `Error` is the sentinel for a failed or invalid model answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Category {
    Urgent,
    Promotion,
    Social,
    Bill,
    Personal,
    Error,
}

impl Category {
    /// The labels a model may answer with.
    pub const VALID: [Category; 5] = [
        Category::Urgent,
        Category::Promotion,
        Category::Social,
        Category::Bill,
        Category::Personal,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Urgent => "URGENT",
            Self::Promotion => "PROMOTION",
            Self::Social => "SOCIAL",
            Self::Bill => "BILL",
            Self::Personal => "PERSONAL",
            Self::Error => "ERROR",
        }
    }

    /// Strict parse of a model answer: trimmed, upper-cased, exact token match.
    ///
    /// Anything else, including the literal `ERROR`, yields `Category::Error`.
    pub fn from_model_output(raw: &str) -> Self {
        let token = raw.trim().to_uppercase();
        Self::VALID
            .into_iter()
            .find(|c| c.as_str() == token)
            .unwrap_or(Self::Error)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Results ─────────────────────────────────────────────────────────

/// One processed message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    /// Server-assigned UID of the source message.
    pub uid: u32,
    pub email: ParsedEmail,
    pub category: Category,
    /// Normalized body preview (no newlines, at most 300 characters).
    pub cleaned_body: String,
}

/// Aggregate view of one refresh, consumed by the presentation layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardSnapshot {
    pub total: usize,
    pub urgent_count: usize,
    pub promotion_count: usize,
    /// Count per category, including `ERROR`. Categories with no hits are omitted.
    pub category_counts: BTreeMap<Category, usize>,
    /// Most recent first.
    pub results: Vec<ClassificationResult>,
    pub generated_at: DateTime<Utc>,
}

impl DashboardSnapshot {
    /// Build a snapshot, counting categories by exact equality.
    pub fn from_results(results: Vec<ClassificationResult>) -> Self {
        let mut category_counts = BTreeMap::new();
        for result in &results {
            *category_counts.entry(result.category).or_insert(0) += 1;
        }

        Self {
            total: results.len(),
            urgent_count: category_counts.get(&Category::Urgent).copied().unwrap_or(0),
            promotion_count: category_counts.get(&Category::Promotion).copied().unwrap_or(0),
            category_counts,
            results,
            generated_at: Utc::now(),
        }
    }
}
