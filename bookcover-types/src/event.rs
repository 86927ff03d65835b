use serde::{Deserialize, Serialize};

use crate::book::Fingerprint;
use crate::provider::ProviderId;

/// Broadcast after every background convergence, exactly once per run,
/// whether it produced a real cover or fell back to the placeholder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookCoverUpdatedEvent {
    pub fingerprint: Fingerprint,
    pub final_location: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub catalog_id: Option<String>,
    pub provider: ProviderId,
}
