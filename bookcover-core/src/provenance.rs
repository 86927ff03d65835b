use std::sync::{Arc, Mutex};

use crate::types::{AttemptOutcome, AttemptedSource, ProvenanceRecord, ProviderId, SelectedImage};

/// Shared handle to one request's provenance record. Adapters run in
/// parallel, so appends go through a mutex; the record itself stays a plain
/// serializable value.
#[derive(Clone, Default)]
pub struct Provenance(Arc<Mutex<ProvenanceRecord>>);

impl Provenance {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an attempt with just an outcome and optional reason.
    pub fn record(
        &self,
        provider: ProviderId,
        url_or_query: impl Into<String>,
        outcome: AttemptOutcome,
        reason: Option<String>,
    ) {
        self.push(AttemptedSource {
            provider,
            url_or_query: url_or_query.into(),
            outcome,
            reason,
            fetched_location: None,
            width: None,
            height: None,
            attempted_at: chrono::Utc::now(),
        });
    }

    /// Append a successful fetch, including where the bytes landed.
    pub fn record_success(
        &self,
        provider: ProviderId,
        url: impl Into<String>,
        fetched_location: impl Into<String>,
        width: u32,
        height: u32,
    ) {
        self.push(AttemptedSource {
            provider,
            url_or_query: url.into(),
            outcome: AttemptOutcome::Success,
            reason: None,
            fetched_location: Some(fetched_location.into()),
            width: Some(width),
            height: Some(height),
            attempted_at: chrono::Utc::now(),
        });
    }

    pub fn push(&self, attempt: AttemptedSource) {
        self.0.lock().unwrap().push_attempt(attempt);
    }

    pub fn select(&self, selected: SelectedImage) {
        self.0.lock().unwrap().select(selected);
    }

    pub fn snapshot(&self) -> ProvenanceRecord {
        self.0.lock().unwrap().clone()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&self.snapshot())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Storage;

    #[test]
    fn appends_are_visible_across_clones() {
        let provenance = Provenance::new();
        let clone = provenance.clone();
        clone.record(
            ProviderId::Google,
            "isbn:9780000000002",
            AttemptOutcome::FailureNotFound,
            None,
        );
        provenance.record_success(
            ProviderId::OpenLibraryM,
            "https://covers.openlibrary.org/b/isbn/9780000000002-M.jpg",
            "/book-covers/abc.jpg",
            200,
            300,
        );

        let record = provenance.snapshot();
        assert_eq!(record.attempts.len(), 2);
        assert_eq!(record.attempts[0].provider, ProviderId::Google);
        assert_eq!(record.attempts[1].width, Some(200));
    }

    #[test]
    fn json_round_trips() {
        let provenance = Provenance::new();
        provenance.record(
            ProviderId::Longitood,
            "9780000000002",
            AttemptOutcome::SkippedKnownBad,
            Some("known bad isbn".to_string()),
        );
        provenance.select(SelectedImage {
            provider: ProviderId::Google,
            location: "/book-covers/abc.jpg".to_string(),
            storage: Storage::Local,
            width: 600,
            height: 900,
            reason: None,
            object_store_key: None,
        });

        let json = provenance.to_json().unwrap();
        let parsed: ProvenanceRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, provenance.snapshot());
    }
}
