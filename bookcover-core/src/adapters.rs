use std::sync::Arc;

use crate::caches::CacheManager;
use crate::disk_cache::DiskCache;
use crate::object_store::{COVERS_PREFIX, ObjectStoreGateway};
use crate::provenance::Provenance;
use crate::sources::{
    CoverSize, GoogleBooksClient, GoogleVolumeImage, LongitoodClient, cover_url, enhance_cover_url,
    is_likely_cover_url,
};
use crate::types::{AttemptOutcome, ImageDescriptor, ProviderId, ResolutionTier, Storage};

/// The provider adapters plus everything they share. Every method records
/// its attempt in provenance and returns a placeholder descriptor instead
/// of failing.
pub(crate) struct Sources {
    pub disk: Arc<DiskCache>,
    pub caches: Arc<CacheManager>,
    pub google: GoogleBooksClient,
    pub longitood: LongitoodClient,
    pub gateway: Option<Arc<ObjectStoreGateway>>,
    /// CDN hosts that identify object-store URLs during classification.
    pub object_store_hosts: Vec<String>,
}

impl Sources {
    pub fn host_refs(&self) -> Vec<&str> {
        self.object_store_hosts.iter().map(String::as_str).collect()
    }

    /// HEAD-probe the object store for any known source slug. A hit is
    /// pulled through the disk cache once so the descriptor carries real
    /// pixel dimensions.
    pub async fn object_store_probe(
        &self,
        book_tag: &str,
        provenance: &Provenance,
    ) -> ImageDescriptor {
        let Some(gateway) = &self.gateway else {
            return ImageDescriptor::placeholder();
        };

        let Some(probe) = gateway.probe_any(book_tag, ".jpg").await else {
            provenance.record(
                ProviderId::ObjectStore,
                format!("{COVERS_PREFIX}/{book_tag}-lg-*"),
                AttemptOutcome::FailureNotFound,
                None,
            );
            return ImageDescriptor::placeholder();
        };

        let downloaded = self
            .disk
            .download_and_store(
                &probe.location,
                book_tag,
                provenance,
                ProviderId::ObjectStore,
                ResolutionTier::Large,
            )
            .await;
        if !downloaded.is_valid_candidate() {
            // HEAD said present but the bytes are unusable.
            provenance.record(
                ProviderId::ObjectStore,
                probe.location.as_str(),
                AttemptOutcome::FailureInvalidDetails,
                Some("stored object is not a usable image".to_string()),
            );
            return ImageDescriptor::placeholder();
        }

        ImageDescriptor {
            location: probe.location,
            storage: Storage::ObjectStore,
            provider: probe.provider,
            provider_artifact_id: probe.provider_artifact_id,
            tier: ResolutionTier::Large,
            width: downloaded.width,
            height: downloaded.height,
            content_hash: downloaded.content_hash,
        }
    }

    pub async fn google_by_isbn(
        &self,
        isbn: &str,
        book_tag: &str,
        provenance: &Provenance,
    ) -> ImageDescriptor {
        let query = format!("isbn:{isbn}");
        match self.google.cover_image_by_isbn(isbn).await {
            Ok(Some(image)) => self.download_google(image, book_tag, provenance).await,
            Ok(None) => {
                provenance.record(
                    ProviderId::Google,
                    query,
                    AttemptOutcome::FailureNotFound,
                    Some("no usable image links".to_string()),
                );
                ImageDescriptor::placeholder()
            }
            Err(e) => {
                provenance.record(
                    ProviderId::Google,
                    query,
                    AttemptOutcome::FailureGeneric,
                    Some(e.to_string()),
                );
                ImageDescriptor::placeholder()
            }
        }
    }

    pub async fn google_by_volume_id(
        &self,
        volume_id: &str,
        book_tag: &str,
        provenance: &Provenance,
    ) -> ImageDescriptor {
        let query = format!("volume:{volume_id}");
        match self.google.cover_image_by_volume_id(volume_id).await {
            Ok(Some(image)) => self.download_google(image, book_tag, provenance).await,
            Ok(None) => {
                provenance.record(
                    ProviderId::Google,
                    query,
                    AttemptOutcome::FailureNotFound,
                    Some("no usable image links".to_string()),
                );
                ImageDescriptor::placeholder()
            }
            Err(e) => {
                provenance.record(
                    ProviderId::Google,
                    query,
                    AttemptOutcome::FailureGeneric,
                    Some(e.to_string()),
                );
                ImageDescriptor::placeholder()
            }
        }
    }

    async fn download_google(
        &self,
        image: GoogleVolumeImage,
        book_tag: &str,
        provenance: &Provenance,
    ) -> ImageDescriptor {
        let url = enhance_cover_url(&image.url);
        if !is_likely_cover_url(&url) {
            provenance.record(
                ProviderId::Google,
                url,
                AttemptOutcome::FailureGeneric,
                Some("link is a page scan, not a front cover".to_string()),
            );
            return ImageDescriptor::placeholder();
        }

        let mut descriptor = self
            .disk
            .download_and_store(
                &url,
                book_tag,
                provenance,
                ProviderId::Google,
                ResolutionTier::Original,
            )
            .await;
        if !descriptor.is_placeholder() {
            descriptor.provider_artifact_id = image.volume_id;
        }
        descriptor
    }

    pub async fn open_library(
        &self,
        isbn: &str,
        size: CoverSize,
        book_tag: &str,
        provenance: &Provenance,
    ) -> ImageDescriptor {
        let (provider, tier) = match size {
            CoverSize::Large => (ProviderId::OpenLibraryL, ResolutionTier::Large),
            CoverSize::Medium => (ProviderId::OpenLibraryM, ResolutionTier::Medium),
            CoverSize::Small => (ProviderId::OpenLibraryS, ResolutionTier::Small),
        };

        if self.caches.is_bad_open_library(isbn) {
            provenance.record(provider, isbn, AttemptOutcome::SkippedKnownBad, None);
            return ImageDescriptor::placeholder();
        }

        let url = cover_url(isbn, size);
        let descriptor = self
            .disk
            .download_and_store(&url, book_tag, provenance, provider, tier)
            .await;

        // A 404 means Open Library has no record of this ISBN at all, so
        // the other size variants are hopeless too.
        if descriptor.is_placeholder() && self.last_outcome_for(&url, provenance) == Some(AttemptOutcome::FailureNotFound) {
            self.caches.mark_bad_open_library(isbn);
        }
        descriptor
    }

    pub async fn longitood(
        &self,
        isbn: &str,
        book_tag: &str,
        provenance: &Provenance,
    ) -> ImageDescriptor {
        if self.caches.is_bad_longitood(isbn) {
            provenance.record(
                ProviderId::Longitood,
                isbn,
                AttemptOutcome::SkippedKnownBad,
                None,
            );
            return ImageDescriptor::placeholder();
        }

        match self.longitood.cover_url_for_isbn(isbn).await {
            Ok(Some(url)) => {
                self.disk
                    .download_and_store(
                        &url,
                        book_tag,
                        provenance,
                        ProviderId::Longitood,
                        ResolutionTier::Unknown,
                    )
                    .await
            }
            Ok(None) => {
                self.caches.mark_bad_longitood(isbn);
                provenance.record(
                    ProviderId::Longitood,
                    isbn,
                    AttemptOutcome::FailureNotFound,
                    Some("no cover for this isbn".to_string()),
                );
                ImageDescriptor::placeholder()
            }
            Err(e) => {
                provenance.record(
                    ProviderId::Longitood,
                    isbn,
                    AttemptOutcome::FailureGeneric,
                    Some(e.to_string()),
                );
                ImageDescriptor::placeholder()
            }
        }
    }

    fn last_outcome_for(&self, url: &str, provenance: &Provenance) -> Option<AttemptOutcome> {
        provenance
            .snapshot()
            .attempts
            .iter()
            .rev()
            .find(|attempt| attempt.url_or_query == url)
            .map(|attempt| attempt.outcome)
    }
}
