use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use data_encoding::BASE64URL_NOPAD;
use sha2::{Digest, Sha256};

use crate::caches::CacheManager;
use crate::config::CacheConfig;
use crate::normalize::{Normalizer, decode_dimensions};
use crate::placeholder::{PlaceholderRegistry, hash_bytes};
use crate::provenance::Provenance;
use crate::sources::{FetchError, RemoteFetch};
use crate::types::{AttemptOutcome, ImageDescriptor, ProviderId, ResolutionTier};

/// Per-download deadline.
pub const DOWNLOAD_DEADLINE: Duration = Duration::from_secs(10);

/// Extensions carried over from the source URL; anything else becomes .jpg.
const ALLOWED_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "webp", "svg", "bmp", "tiff"];

/// Content-addressed on-disk cache of downloaded cover images, keyed by a
/// hash of the source URL. Downloads happen at most once per URL per
/// process; failures poison the URL for the process lifetime.
pub struct DiskCache {
    dir: PathBuf,
    web_prefix: String,
    fetcher: Arc<dyn RemoteFetch>,
    caches: Arc<CacheManager>,
    placeholders: Arc<PlaceholderRegistry>,
    normalizer: Normalizer,
    max_age: Duration,
}

impl DiskCache {
    pub fn new(
        config: &CacheConfig,
        fetcher: Arc<dyn RemoteFetch>,
        caches: Arc<CacheManager>,
        placeholders: Arc<PlaceholderRegistry>,
    ) -> std::io::Result<Self> {
        std::fs::create_dir_all(&config.dir)?;
        let dir_name = config
            .dir
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "book-covers".to_string());

        Ok(Self {
            dir: config.dir.clone(),
            web_prefix: format!("/{dir_name}"),
            fetcher,
            caches,
            placeholders,
            normalizer: Normalizer::new(),
            max_age: Duration::from_secs(config.max_age_days * 24 * 60 * 60),
        })
    }

    /// Deterministic cache filename for a URL: the first 32 characters of
    /// the base64url SHA-256 of the URL, plus the URL's own extension.
    pub fn filename_for(url: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(url.as_bytes());
        let encoded = BASE64URL_NOPAD.encode(&hasher.finalize());
        format!("{}{}", &encoded[..32], Self::extension_for(url))
    }

    /// The `.ext` to store a URL under: its path's final dot-suffix with the
    /// query stripped, restricted to known image extensions.
    fn extension_for(url: &str) -> &'static str {
        let path = url.split(['?', '#']).next().unwrap_or(url);
        let name = path.rsplit('/').next().unwrap_or(path);
        let Some((_, ext)) = name.rsplit_once('.') else {
            return ".jpg";
        };
        let ext = ext.to_ascii_lowercase();
        ALLOWED_EXTENSIONS
            .iter()
            .find(|allowed| **allowed == ext)
            .map(|allowed| match *allowed {
                "jpg" => ".jpg",
                "jpeg" => ".jpeg",
                "png" => ".png",
                "gif" => ".gif",
                "webp" => ".webp",
                "svg" => ".svg",
                "bmp" => ".bmp",
                "tiff" => ".tiff",
                _ => unreachable!(),
            })
            .unwrap_or(".jpg")
    }

    /// The path a cached file is served under.
    pub fn web_path(&self, filename: &str) -> String {
        format!("{}/{filename}", self.web_prefix)
    }

    fn file_path(&self, filename: &str) -> PathBuf {
        self.dir.join(filename)
    }

    /// Map a served web path back to the on-disk file, if it is ours.
    pub fn local_path(&self, location: &str) -> Option<PathBuf> {
        let filename = location.strip_prefix(&format!("{}/", self.web_prefix))?;
        if filename.is_empty() || filename.contains('/') {
            return None;
        }
        Some(self.file_path(filename))
    }

    /// Download a URL into the cache, screening and normalizing on the way.
    /// Never fails: any problem is recorded in provenance, poisons the URL,
    /// and yields a placeholder descriptor.
    pub async fn download_and_store(
        &self,
        url: &str,
        book_tag: &str,
        provenance: &Provenance,
        provider: ProviderId,
        tier: ResolutionTier,
    ) -> ImageDescriptor {
        if self.caches.is_bad_url(url) {
            provenance.record(provider, url, AttemptOutcome::SkippedKnownBad, None);
            return ImageDescriptor::placeholder();
        }

        let filename = Self::filename_for(url);
        let path = self.file_path(&filename);
        let location = self.web_path(&filename);

        // Download-once: a previously cached file answers without touching
        // the network.
        if let Ok(existing) = tokio::fs::read(&path).await {
            if let Some((width, height)) = decode_dimensions(&existing) {
                provenance.record_success(provider, url, location.as_str(), width, height);
                return ImageDescriptor::local(
                    location,
                    provider,
                    url,
                    tier,
                    width,
                    height,
                    hash_bytes(&existing),
                );
            }
            tracing::debug!("cached file {} is unreadable, refetching", path.display());
        }

        let body = match self.fetcher.fetch_bytes(url, DOWNLOAD_DEADLINE).await {
            Ok(body) => body,
            Err(error) => {
                self.caches.mark_bad_url(url);
                let outcome = match error {
                    FetchError::NotFound => AttemptOutcome::FailureNotFound,
                    FetchError::Timeout => AttemptOutcome::FailureTimeout,
                    FetchError::Empty => AttemptOutcome::FailureEmpty,
                    FetchError::Status(_) | FetchError::Transport(_) => {
                        AttemptOutcome::FailureGeneric
                    }
                };
                provenance.record(provider, url, outcome, Some(error.to_string()));
                return ImageDescriptor::placeholder();
            }
        };

        let content_hash = hash_bytes(&body);
        if self.placeholders.matches(&content_hash) {
            self.caches.mark_bad_url(url);
            provenance.record(
                provider,
                url,
                AttemptOutcome::FailurePlaceholderMatch,
                Some("content matches a reference placeholder".to_string()),
            );
            return ImageDescriptor::placeholder();
        }

        let normalized = match self.normalizer.normalize(&body, book_tag) {
            Ok(normalized) => normalized,
            Err(error) => {
                self.caches.mark_bad_url(url);
                let outcome = if error.is_content_rejection() {
                    AttemptOutcome::FailureContentRejected
                } else {
                    AttemptOutcome::FailureProcessing
                };
                provenance.record(provider, url, outcome, Some(error.to_string()));
                return ImageDescriptor::placeholder();
            }
        };

        // Write via a sibling temp file so concurrent downloads of the same
        // URL race to an identical, fully-written rename.
        let tmp_path = path.with_extension("tmp");
        let write_result = async {
            tokio::fs::write(&tmp_path, &normalized.bytes).await?;
            tokio::fs::rename(&tmp_path, &path).await
        }
        .await;
        if let Err(error) = write_result {
            tracing::warn!("failed to store {url} at {}: {error}", path.display());
            provenance.record(
                provider,
                url,
                AttemptOutcome::FailureIo,
                Some(error.to_string()),
            );
            return ImageDescriptor::placeholder();
        }

        provenance.record_success(provider, url, location.as_str(), normalized.width, normalized.height);
        ImageDescriptor::local(
            location,
            provider,
            url,
            tier,
            normalized.width,
            normalized.height,
            hash_bytes(&normalized.bytes),
        )
    }

    /// Delete cached files older than the configured max age. Best-effort;
    /// returns how many files were removed.
    pub fn cleanup_stale(&self) -> usize {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(error) => {
                tracing::warn!("cover cache cleanup cannot list {}: {error}", self.dir.display());
                return 0;
            }
        };

        let mut removed = 0;
        for entry in entries.flatten() {
            let path = entry.path();
            let stale = entry
                .metadata()
                .ok()
                .filter(|metadata| metadata.is_file())
                .and_then(|metadata| metadata.modified().ok())
                .and_then(|modified| modified.elapsed().ok())
                .is_some_and(|age| age > self.max_age);
            if !stale {
                continue;
            }
            match std::fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(error) => {
                    tracing::warn!("failed to remove stale {}: {error}", path.display());
                }
            }
        }
        if removed > 0 {
            tracing::info!("cover cache cleanup removed {removed} stale files");
        }
        removed
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}
