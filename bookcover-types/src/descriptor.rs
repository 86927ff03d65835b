use serde::{Deserialize, Serialize};

use crate::provider::{ProviderId, ResolutionTier, Storage};

/// The canonical "no cover available" asset. The exact string is part of the
/// public contract; callers compare against it.
pub const PLACEHOLDER_PATH: &str = "/images/placeholder-book-cover.svg";

/// Immutable description of one cover artifact: where it lives, where it
/// came from, and what is known about its pixels.
///
/// `storage == Placeholder`, `location == PLACEHOLDER_PATH` and
/// `provider == Placeholder` always hold together; the constructors below
/// are the only way these fields are produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageDescriptor {
    /// Web path under the local cache, a CDN URL, or the placeholder path.
    pub location: String,
    pub storage: Storage,
    pub provider: ProviderId,
    /// Opaque provider-side identity (ISBN, volume id, object key, ...).
    pub provider_artifact_id: String,
    pub tier: ResolutionTier,
    /// Pixel width; 0 means unknown.
    pub width: u32,
    /// Pixel height; 0 means unknown.
    pub height: u32,
    /// SHA-256 of the bytes, present iff they were observed locally.
    pub content_hash: Option<String>,
}

impl ImageDescriptor {
    pub fn placeholder() -> Self {
        ImageDescriptor {
            location: PLACEHOLDER_PATH.to_string(),
            storage: Storage::Placeholder,
            provider: ProviderId::Placeholder,
            provider_artifact_id: String::new(),
            tier: ResolutionTier::Unknown,
            width: 0,
            height: 0,
            content_hash: None,
        }
    }

    /// A normalized artifact under the local disk cache.
    pub fn local(
        location: impl Into<String>,
        provider: ProviderId,
        provider_artifact_id: impl Into<String>,
        tier: ResolutionTier,
        width: u32,
        height: u32,
        content_hash: impl Into<String>,
    ) -> Self {
        ImageDescriptor {
            location: location.into(),
            storage: Storage::Local,
            provider,
            provider_artifact_id: provider_artifact_id.into(),
            tier,
            width,
            height,
            content_hash: Some(content_hash.into()),
        }
    }

    /// An artifact already in the object store, addressed by CDN URL.
    pub fn object_store(
        location: impl Into<String>,
        provider: ProviderId,
        provider_artifact_id: impl Into<String>,
        width: u32,
        height: u32,
    ) -> Self {
        ImageDescriptor {
            location: location.into(),
            storage: Storage::ObjectStore,
            provider,
            provider_artifact_id: provider_artifact_id.into(),
            tier: ResolutionTier::Large,
            width,
            height,
            content_hash: None,
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.storage == Storage::Placeholder
    }

    /// A descriptor is usable as a pipeline candidate only when it points at
    /// real bytes with known, plausible dimensions.
    pub fn is_valid_candidate(&self) -> bool {
        !self.is_placeholder()
            && !self.location.is_empty()
            && self.location != PLACEHOLDER_PATH
            && self.width > 1
            && self.height > 1
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}
