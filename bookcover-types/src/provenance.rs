use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::provider::{ProviderId, Storage};

/// How one attempt against one source ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttemptOutcome {
    Pending,
    Success,
    SkippedKnownBad,
    FailureNotFound,
    FailureEmpty,
    FailurePlaceholderMatch,
    FailureIo,
    FailureProcessing,
    FailureContentRejected,
    FailureTimeout,
    FailureInvalidDetails,
    FailureGeneric,
}

impl AttemptOutcome {
    pub fn is_failure(&self) -> bool {
        !matches!(
            self,
            AttemptOutcome::Pending | AttemptOutcome::Success | AttemptOutcome::SkippedKnownBad
        )
    }
}

/// One provider attempt, in request order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptedSource {
    pub provider: ProviderId,
    /// The URL fetched, or the provider query that was issued.
    pub url_or_query: String,
    pub outcome: AttemptOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Local path the bytes landed at, when they did.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fetched_location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    pub attempted_at: DateTime<Utc>,
}

/// The artifact the pipeline settled on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectedImage {
    pub provider: ProviderId,
    pub location: String,
    pub storage: Storage,
    pub width: u32,
    pub height: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Object-store key when the artifact was promoted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object_store_key: Option<String>,
}

/// Append-only record of one resolution: every source attempted, in order,
/// and at most one selection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvenanceRecord {
    pub attempts: Vec<AttemptedSource>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected: Option<SelectedImage>,
}

impl ProvenanceRecord {
    pub fn push_attempt(&mut self, attempt: AttemptedSource) {
        self.attempts.push(attempt);
    }

    /// Record the selection. The first write wins; later calls are ignored
    /// so the record stays append-only.
    pub fn select(&mut self, selected: SelectedImage) {
        if self.selected.is_none() {
            self.selected = Some(selected);
        }
    }
}
