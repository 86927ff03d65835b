use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use crate::pipeline::selection_rank;
use crate::types::{Fingerprint, ImageDescriptor};

/// Upper bound on the provisional and final indexes. Entries are
/// recomputable, so overflow drops the whole index rather than tracking
/// recency.
pub const INDEX_CAPACITY: usize = 1_000;

/// The in-memory indexes shared by the synchronous path and the background
/// pipeline: provisional URLs, finalized descriptors, and the known-bad
/// sets. All access is through this type; the maps never escape.
pub struct CacheManager {
    provisional: RwLock<HashMap<Fingerprint, String>>,
    finals: RwLock<HashMap<Fingerprint, ImageDescriptor>>,
    bad_urls: RwLock<HashSet<String>>,
    bad_open_library: RwLock<HashSet<String>>,
    bad_longitood: RwLock<HashSet<String>>,
}

impl CacheManager {
    pub fn new() -> Self {
        Self {
            provisional: RwLock::new(HashMap::new()),
            finals: RwLock::new(HashMap::new()),
            bad_urls: RwLock::new(HashSet::new()),
            bad_open_library: RwLock::new(HashSet::new()),
            bad_longitood: RwLock::new(HashSet::new()),
        }
    }

    pub fn provisional_url(&self, fingerprint: &Fingerprint) -> Option<String> {
        self.provisional.read().unwrap().get(fingerprint).cloned()
    }

    /// Remember a best-guess URL until the background pipeline finalizes.
    /// A fingerprint that already has a real final entry keeps it; the
    /// provisional index never shadows a final one.
    pub fn put_provisional(&self, fingerprint: Fingerprint, url: String) {
        {
            let finals = self.finals.read().unwrap();
            if finals
                .get(&fingerprint)
                .is_some_and(|descriptor| !descriptor.is_placeholder())
            {
                return;
            }
        }

        let mut provisional = self.provisional.write().unwrap();
        if provisional.len() >= INDEX_CAPACITY && !provisional.contains_key(&fingerprint) {
            tracing::debug!("provisional index full, dropping all entries");
            provisional.clear();
        }
        provisional.insert(fingerprint, url);
    }

    pub fn evict_provisional(&self, fingerprint: &Fingerprint) {
        self.provisional.write().unwrap().remove(fingerprint);
    }

    pub fn final_descriptor(&self, fingerprint: &Fingerprint) -> Option<ImageDescriptor> {
        self.finals.read().unwrap().get(fingerprint).cloned()
    }

    /// Write a final descriptor and clear the fingerprint's provisional
    /// entry. Finals only improve: a write that would replace a real
    /// descriptor with a worse-or-equal one (or with the placeholder) is
    /// suppressed. Returns whether the index changed.
    pub fn put_final(&self, fingerprint: Fingerprint, descriptor: ImageDescriptor) -> bool {
        let written = {
            let mut finals = self.finals.write().unwrap();
            let keep_existing = match finals.get(&fingerprint) {
                Some(existing) => {
                    let unchanged = existing.location == descriptor.location
                        && existing.provider == descriptor.provider;
                    let downgrade = !existing.is_placeholder()
                        && (descriptor.is_placeholder()
                            || selection_rank(&descriptor) >= selection_rank(existing));
                    unchanged || downgrade
                }
                None => false,
            };

            if keep_existing {
                false
            } else {
                if finals.len() >= INDEX_CAPACITY && !finals.contains_key(&fingerprint) {
                    tracing::debug!("final index full, dropping all entries");
                    finals.clear();
                }
                finals.insert(fingerprint.clone(), descriptor);
                true
            }
        };

        self.evict_provisional(&fingerprint);
        written
    }

    pub fn is_bad_url(&self, url: &str) -> bool {
        self.bad_urls.read().unwrap().contains(url)
    }

    pub fn mark_bad_url(&self, url: &str) {
        self.bad_urls.write().unwrap().insert(url.to_string());
    }

    pub fn is_bad_open_library(&self, isbn: &str) -> bool {
        self.bad_open_library.read().unwrap().contains(isbn)
    }

    pub fn mark_bad_open_library(&self, isbn: &str) {
        self.bad_open_library.write().unwrap().insert(isbn.to_string());
    }

    pub fn is_bad_longitood(&self, isbn: &str) -> bool {
        self.bad_longitood.read().unwrap().contains(isbn)
    }

    pub fn mark_bad_longitood(&self, isbn: &str) {
        self.bad_longitood.write().unwrap().insert(isbn.to_string());
    }
}

impl Default for CacheManager {
    fn default() -> Self {
        Self::new()
    }
}
