use async_trait::async_trait;

use crate::types::{Book, Fingerprint, ImageDescriptor};

/// A catalog lookup result: the canonical book record, possibly already
/// carrying a finalized cover descriptor.
pub struct CatalogHit {
    pub book: Book,
    pub cover: Option<ImageDescriptor>,
}

/// Optional access to the canonical book catalog. When a lookup returns a
/// book that already has an object-store cover, the pipeline skips the
/// provider fan-out entirely.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn lookup(&self, fingerprint: &Fingerprint) -> Option<CatalogHit>;
}
