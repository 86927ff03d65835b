use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use http::status::StatusCode;
use rusoto_core::RusotoError;
use rusoto_core::credential::StaticProvider;
use rusoto_core::region::Region;
use rusoto_s3::{HeadObjectError, HeadObjectRequest, PutObjectRequest, S3, S3Client};

use crate::config::ObjectStoreConfig;
use crate::provenance::Provenance;
use crate::types::{ImageDescriptor, ProviderId};

/// Key prefix for promoted cover images.
pub const COVERS_PREFIX: &str = "images/book-covers";
/// Key prefix for provenance sidecars in debug mode.
pub const PROVENANCE_PREFIX: &str = "images/provenance-data";

/// How long a HEAD answer stays fresh.
const PROBE_TTL: Duration = Duration::from_secs(60 * 60);
/// Probe cache bound; drop-all on overflow like the other indexes.
const PROBE_CAPACITY: usize = 2_000;

/// Source slugs tried by `probe_any`, in preference order.
const PROBE_SLUGS: &[(&str, ProviderId)] = &[
    ("google-books", ProviderId::Google),
    ("open-library", ProviderId::OpenLibraryL),
    ("longitood", ProviderId::Longitood),
    ("local-cache", ProviderId::LocalCache),
    ("unknown", ProviderId::ObjectStore),
];

const ALLOWED_KEY_EXTENSIONS: &[&str] = &[".jpg", ".jpeg", ".png", ".gif", ".webp", ".svg"];

/// An error from the object store or the gateway in front of it.
#[derive(Debug)]
pub enum ObjectStoreError {
    /// The key does not exist.
    NotFound,
    /// A retryable fault (timeout, 5xx, conflict).
    Unavailable(String),
    /// The caller passed something unusable (bad book tag, oversized body).
    InvalidArgument(String),
    Other(String),
}

impl std::fmt::Display for ObjectStoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ObjectStoreError::NotFound => write!(f, "object not found"),
            ObjectStoreError::Unavailable(e) => write!(f, "object store unavailable: {e}"),
            ObjectStoreError::InvalidArgument(e) => write!(f, "invalid argument: {e}"),
            ObjectStoreError::Other(e) => write!(f, "object store error: {e}"),
        }
    }
}
impl std::error::Error for ObjectStoreError {}

/// Metadata from a HEAD probe.
#[derive(Debug, Clone, Copy)]
pub struct ObjectMeta {
    pub content_length: Option<i64>,
}

/// The raw store operations the gateway needs. Production uses S3; tests
/// substitute the in-memory implementation below.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// HEAD a key. `Err(NotFound)` when absent; other errors as classified.
    async fn head(&self, key: &str) -> Result<ObjectMeta, ObjectStoreError>;

    async fn put(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
        public_readable: bool,
    ) -> Result<(), ObjectStoreError>;
}

/// S3-compatible store (AWS S3, DigitalOcean Spaces via custom endpoint).
pub struct S3ObjectStore {
    client: S3Client,
    bucket: String,
}

impl S3ObjectStore {
    pub fn new(config: &ObjectStoreConfig) -> Result<Self, ObjectStoreError> {
        let region = if config.endpoint.is_empty() {
            config
                .region
                .parse::<Region>()
                .map_err(|e| ObjectStoreError::InvalidArgument(e.to_string()))?
        } else {
            Region::Custom {
                name: if config.region.is_empty() {
                    "us-east-1".to_string()
                } else {
                    config.region.clone()
                },
                endpoint: config.endpoint.clone(),
            }
        };

        let dispatcher = rusoto_core::request::HttpClient::new()
            .map_err(|e| ObjectStoreError::Other(e.to_string()))?;
        let credentials = StaticProvider::new_minimal(
            config.access_key_id.clone(),
            config.secret_access_key.clone(),
        );

        Ok(Self {
            client: S3Client::new_with(dispatcher, credentials, region),
            bucket: config.bucket.clone(),
        })
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn head(&self, key: &str) -> Result<ObjectMeta, ObjectStoreError> {
        let request = HeadObjectRequest {
            bucket: self.bucket.clone(),
            key: key.to_string(),
            ..Default::default()
        };

        match self.client.head_object(request).await {
            Ok(output) => Ok(ObjectMeta {
                content_length: output.content_length,
            }),
            Err(RusotoError::Service(HeadObjectError::NoSuchKey(_))) => {
                Err(ObjectStoreError::NotFound)
            }
            // Timeout-like errors can be retried by a later probe.
            Err(RusotoError::HttpDispatch(e)) => Err(ObjectStoreError::Unavailable(e.to_string())),
            Err(RusotoError::Unknown(response)) => match response.status {
                StatusCode::NOT_FOUND => Err(ObjectStoreError::NotFound),
                StatusCode::INTERNAL_SERVER_ERROR
                | StatusCode::SERVICE_UNAVAILABLE
                | StatusCode::CONFLICT => {
                    Err(ObjectStoreError::Unavailable(response.status.to_string()))
                }
                other => Err(ObjectStoreError::Other(other.to_string())),
            },
            Err(other) => Err(ObjectStoreError::Other(other.to_string())),
        }
    }

    async fn put(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
        public_readable: bool,
    ) -> Result<(), ObjectStoreError> {
        let request = PutObjectRequest {
            bucket: self.bucket.clone(),
            key: key.to_string(),
            content_length: Some(bytes.len() as i64),
            content_type: Some(content_type.to_string()),
            acl: public_readable.then(|| "public-read".to_string()),
            body: Some(bytes.into()),
            ..Default::default()
        };

        self.client
            .put_object(request)
            .await
            .map(|_| ())
            .map_err(|e| match e {
                RusotoError::HttpDispatch(e) => ObjectStoreError::Unavailable(e.to_string()),
                other => ObjectStoreError::Other(other.to_string()),
            })
    }
}

struct StoredObject {
    bytes: Vec<u8>,
    content_type: String,
}

/// In-memory store for tests and local development.
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: Mutex<HashMap<String, StoredObject>>,
    head_count: AtomicUsize,
    put_count: AtomicUsize,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, key: &str, bytes: Vec<u8>, content_type: &str) {
        self.objects.lock().unwrap().insert(
            key.to_string(),
            StoredObject {
                bytes,
                content_type: content_type.to_string(),
            },
        );
    }

    pub fn contains(&self, key: &str) -> bool {
        self.objects.lock().unwrap().contains_key(key)
    }

    pub fn object(&self, key: &str) -> Option<Vec<u8>> {
        self.objects
            .lock()
            .unwrap()
            .get(key)
            .map(|stored| stored.bytes.clone())
    }

    pub fn content_type(&self, key: &str) -> Option<String> {
        self.objects
            .lock()
            .unwrap()
            .get(key)
            .map(|stored| stored.content_type.clone())
    }

    pub fn keys(&self) -> Vec<String> {
        self.objects.lock().unwrap().keys().cloned().collect()
    }

    pub fn head_count(&self) -> usize {
        self.head_count.load(Ordering::Relaxed)
    }

    pub fn put_count(&self) -> usize {
        self.put_count.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn head(&self, key: &str) -> Result<ObjectMeta, ObjectStoreError> {
        self.head_count.fetch_add(1, Ordering::Relaxed);
        match self.objects.lock().unwrap().get(key) {
            Some(stored) => Ok(ObjectMeta {
                content_length: Some(stored.bytes.len() as i64),
            }),
            None => Err(ObjectStoreError::NotFound),
        }
    }

    async fn put(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
        _public_readable: bool,
    ) -> Result<(), ObjectStoreError> {
        self.put_count.fetch_add(1, Ordering::Relaxed);
        self.insert(key, bytes, content_type);
        Ok(())
    }
}

/// Lowercase a source name and collapse everything outside `[a-z0-9_-]` to
/// `-`, producing the slug embedded in object keys.
pub fn slugify(source: &str) -> String {
    source
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect()
}

fn normalize_extension(ext: &str) -> &'static str {
    let ext = ext.to_ascii_lowercase();
    let dotted = if ext.starts_with('.') {
        ext
    } else {
        format!(".{ext}")
    };
    ALLOWED_KEY_EXTENSIONS
        .iter()
        .find(|allowed| **allowed == dotted)
        .copied()
        .unwrap_or(".jpg")
}

struct ProbeAnswer {
    present: bool,
    content_length: Option<i64>,
    at: Instant,
}

/// Everything the resolver needs from the object store: key derivation,
/// cached HEAD probes, and idempotent uploads of processed covers.
pub struct ObjectStoreGateway {
    store: Arc<dyn ObjectStore>,
    public_base: String,
    max_file_size: u64,
    provenance_debug: bool,
    probe_cache: RwLock<HashMap<String, ProbeAnswer>>,
}

impl ObjectStoreGateway {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        config: &ObjectStoreConfig,
        max_file_size: u64,
        provenance_debug: bool,
    ) -> Self {
        Self {
            store,
            public_base: config.public_base().trim_end_matches('/').to_string(),
            max_file_size,
            provenance_debug,
            probe_cache: RwLock::new(HashMap::new()),
        }
    }

    /// The exact object key for a cover: `images/book-covers/<bookTag>-lg-
    /// <slug><ext>`. The book tag is restricted to `[A-Za-z0-9_-]+`.
    pub fn object_key(book_tag: &str, ext: &str, source: &str) -> Result<String, ObjectStoreError> {
        if book_tag.is_empty()
            || !book_tag
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(ObjectStoreError::InvalidArgument(format!(
                "book tag {book_tag:?} is not addressable"
            )));
        }
        Ok(format!(
            "{COVERS_PREFIX}/{book_tag}-lg-{}{}",
            slugify(source),
            normalize_extension(ext)
        ))
    }

    pub fn public_url(&self, key: &str) -> String {
        format!("{}/{key}", self.public_base)
    }

    /// Cached HEAD: is this cover present? 404s and non-retryable faults
    /// cache a negative answer; retryable faults are not cached.
    pub async fn probe(
        &self,
        book_tag: &str,
        ext: &str,
        source: &str,
    ) -> Result<bool, ObjectStoreError> {
        let key = Self::object_key(book_tag, ext, source)?;
        Ok(self.probe_key(&key).await.present)
    }

    async fn probe_key(&self, key: &str) -> ProbeAnswer {
        {
            let cache = self.probe_cache.read().unwrap();
            if let Some(answer) = cache.get(key) {
                if answer.at.elapsed() < PROBE_TTL {
                    return ProbeAnswer {
                        present: answer.present,
                        content_length: answer.content_length,
                        at: answer.at,
                    };
                }
            }
        }

        let (answer, cacheable) = match self.store.head(key).await {
            Ok(meta) => (
                ProbeAnswer {
                    present: true,
                    content_length: meta.content_length,
                    at: Instant::now(),
                },
                true,
            ),
            Err(ObjectStoreError::NotFound) => (
                ProbeAnswer {
                    present: false,
                    content_length: None,
                    at: Instant::now(),
                },
                true,
            ),
            Err(ObjectStoreError::Unavailable(e)) => {
                tracing::warn!("object store probe for {key} unavailable: {e}");
                (
                    ProbeAnswer {
                        present: false,
                        content_length: None,
                        at: Instant::now(),
                    },
                    false,
                )
            }
            Err(e) => {
                tracing::warn!("object store probe for {key} failed: {e}");
                (
                    ProbeAnswer {
                        present: false,
                        content_length: None,
                        at: Instant::now(),
                    },
                    true,
                )
            }
        };

        if cacheable {
            let mut cache = self.probe_cache.write().unwrap();
            if cache.len() >= PROBE_CAPACITY && !cache.contains_key(key) {
                cache.clear();
            }
            cache.insert(
                key.to_string(),
                ProbeAnswer {
                    present: answer.present,
                    content_length: answer.content_length,
                    at: answer.at,
                },
            );
        }
        answer
    }

    fn remember_upload(&self, key: &str, content_length: i64) {
        let mut cache = self.probe_cache.write().unwrap();
        if cache.len() >= PROBE_CAPACITY && !cache.contains_key(key) {
            cache.clear();
        }
        cache.insert(
            key.to_string(),
            ProbeAnswer {
                present: true,
                content_length: Some(content_length),
                at: Instant::now(),
            },
        );
    }

    /// Try each known source slug and return a descriptor for the first
    /// cover already in the store. Dimensions stay unknown here.
    pub async fn probe_any(&self, book_tag: &str, ext: &str) -> Option<ImageDescriptor> {
        for (slug, provider) in PROBE_SLUGS {
            let key = match Self::object_key(book_tag, ext, slug) {
                Ok(key) => key,
                Err(e) => {
                    tracing::debug!("skipping object store probe: {e}");
                    return None;
                }
            };
            if self.probe_key(&key).await.present {
                return Some(ImageDescriptor::object_store(
                    self.public_url(&key),
                    *provider,
                    key,
                    0,
                    0,
                ));
            }
        }
        None
    }

    /// Upload normalized cover bytes. Re-uploads of an object that already
    /// exists with the same length short-circuit without a PUT. In debug
    /// mode the provenance record is serialized alongside the image.
    #[allow(clippy::too_many_arguments)]
    pub async fn upload_processed(
        &self,
        bytes: &[u8],
        ext: &str,
        content_type: &str,
        width: u32,
        height: u32,
        book_tag: &str,
        source: ProviderId,
        provenance: &Provenance,
    ) -> Result<ImageDescriptor, ObjectStoreError> {
        if bytes.len() as u64 > self.max_file_size {
            return Err(ObjectStoreError::InvalidArgument(format!(
                "cover for {book_tag} is {} bytes, over the {} byte ceiling",
                bytes.len(),
                self.max_file_size
            )));
        }

        let key = Self::object_key(book_tag, ext, source.display_name())?;
        let descriptor = ImageDescriptor::object_store(
            self.public_url(&key),
            source,
            key.clone(),
            width,
            height,
        );

        let probe = self.probe_key(&key).await;
        if probe.present && probe.content_length == Some(bytes.len() as i64) {
            tracing::debug!("cover {key} already uploaded, skipping");
            return Ok(descriptor);
        }

        self.store
            .put(&key, bytes.to_vec(), content_type, true)
            .await?;
        self.remember_upload(&key, bytes.len() as i64);
        tracing::info!("uploaded cover {key} ({width}x{height})");

        if self.provenance_debug {
            self.upload_provenance_sidecar(&key, provenance).await;
        }

        Ok(descriptor)
    }

    async fn upload_provenance_sidecar(&self, cover_key: &str, provenance: &Provenance) {
        let filename = cover_key.rsplit('/').next().unwrap_or(cover_key);
        let sidecar_key = format!("{PROVENANCE_PREFIX}/{filename}.txt");
        let json = match provenance.to_json() {
            Ok(json) => json,
            Err(e) => {
                tracing::warn!("could not serialize provenance for {cover_key}: {e}");
                return;
            }
        };
        if let Err(e) = self
            .store
            .put(&sidecar_key, json.into_bytes(), "text/plain", true)
            .await
        {
            tracing::warn!("could not upload provenance sidecar {sidecar_key}: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gateway_over(store: Arc<MemoryObjectStore>, provenance_debug: bool) -> ObjectStoreGateway {
        let config = ObjectStoreConfig {
            enabled: true,
            bucket: "covers".to_string(),
            cdn_url: "https://cdn.example".to_string(),
            ..Default::default()
        };
        ObjectStoreGateway::new(store, &config, 5_242_880, provenance_debug)
    }

    #[test]
    fn object_keys_are_byte_exact() {
        assert_eq!(
            ObjectStoreGateway::object_key("gb1", ".jpg", "Google Books").unwrap(),
            "images/book-covers/gb1-lg-google-books.jpg"
        );
        assert_eq!(
            ObjectStoreGateway::object_key("9780000000002", "png", "Open Library").unwrap(),
            "images/book-covers/9780000000002-lg-open-library.png"
        );
        // Unknown extensions fall back to .jpg.
        assert_eq!(
            ObjectStoreGateway::object_key("b_1-2", ".exe", "Longitood").unwrap(),
            "images/book-covers/b_1-2-lg-longitood.jpg"
        );
    }

    #[test]
    fn hostile_book_tags_are_rejected() {
        assert!(ObjectStoreGateway::object_key("", ".jpg", "x").is_err());
        assert!(ObjectStoreGateway::object_key("a/b", ".jpg", "x").is_err());
        assert!(ObjectStoreGateway::object_key("a b", ".jpg", "x").is_err());
        assert!(ObjectStoreGateway::object_key("..", ".jpg", "x").is_err());
    }

    #[test]
    fn slugify_normalizes_source_names() {
        assert_eq!(slugify("Google Books"), "google-books");
        assert_eq!(slugify("Open Library"), "open-library");
        assert_eq!(slugify("weird/Source!2"), "weird-source-2");
    }

    #[tokio::test]
    async fn probe_caches_answers() {
        let store = Arc::new(MemoryObjectStore::new());
        let gateway = gateway_over(store.clone(), false);

        assert!(!gateway.probe("gb1", ".jpg", "Google Books").await.unwrap());
        assert!(!gateway.probe("gb1", ".jpg", "Google Books").await.unwrap());
        assert_eq!(store.head_count(), 1);
    }

    #[tokio::test]
    async fn probe_any_respects_slug_order() {
        let store = Arc::new(MemoryObjectStore::new());
        store.insert(
            "images/book-covers/gb1-lg-open-library.jpg",
            vec![1, 2, 3],
            "image/jpeg",
        );
        let gateway = gateway_over(store.clone(), false);

        let descriptor = gateway.probe_any("gb1", ".jpg").await.unwrap();
        assert_eq!(descriptor.provider, ProviderId::OpenLibraryL);
        assert_eq!(
            descriptor.location,
            "https://cdn.example/images/book-covers/gb1-lg-open-library.jpg"
        );

        store.insert(
            "images/book-covers/gb2-lg-google-books.jpg",
            vec![1],
            "image/jpeg",
        );
        store.insert(
            "images/book-covers/gb2-lg-longitood.jpg",
            vec![2],
            "image/jpeg",
        );
        let descriptor = gateway.probe_any("gb2", ".jpg").await.unwrap();
        assert_eq!(descriptor.provider, ProviderId::Google);
    }

    #[tokio::test]
    async fn upload_is_idempotent_on_matching_length() {
        let store = Arc::new(MemoryObjectStore::new());
        let gateway = gateway_over(store.clone(), false);
        let provenance = Provenance::new();
        let bytes = vec![7u8; 1024];

        let first = gateway
            .upload_processed(
                &bytes,
                ".jpg",
                "image/jpeg",
                600,
                900,
                "gb1",
                ProviderId::Google,
                &provenance,
            )
            .await
            .unwrap();
        assert_eq!(
            first.location,
            "https://cdn.example/images/book-covers/gb1-lg-google-books.jpg"
        );
        assert_eq!(store.put_count(), 1);
        assert_eq!(
            store.content_type("images/book-covers/gb1-lg-google-books.jpg"),
            Some("image/jpeg".to_string())
        );

        let second = gateway
            .upload_processed(
                &bytes,
                ".jpg",
                "image/jpeg",
                600,
                900,
                "gb1",
                ProviderId::Google,
                &provenance,
            )
            .await
            .unwrap();
        assert_eq!(second, first);
        assert_eq!(store.put_count(), 1);
    }

    #[tokio::test]
    async fn oversized_uploads_are_refused() {
        let store = Arc::new(MemoryObjectStore::new());
        let config = ObjectStoreConfig {
            cdn_url: "https://cdn.example".to_string(),
            ..Default::default()
        };
        let gateway = ObjectStoreGateway::new(store.clone(), &config, 16, false);

        let result = gateway
            .upload_processed(
                &[0u8; 17],
                ".jpg",
                "image/jpeg",
                600,
                900,
                "gb1",
                ProviderId::Google,
                &Provenance::new(),
            )
            .await;
        assert!(matches!(result, Err(ObjectStoreError::InvalidArgument(_))));
        assert_eq!(store.put_count(), 0);
    }

    #[tokio::test]
    async fn debug_mode_uploads_a_provenance_sidecar() {
        let store = Arc::new(MemoryObjectStore::new());
        let gateway = gateway_over(store.clone(), true);
        let provenance = Provenance::new();
        provenance.record(
            ProviderId::Google,
            "isbn:9780000000002",
            crate::types::AttemptOutcome::Success,
            None,
        );

        gateway
            .upload_processed(
                &[1u8; 64],
                ".jpg",
                "image/jpeg",
                600,
                900,
                "gb1",
                ProviderId::Google,
                &provenance,
            )
            .await
            .unwrap();

        let sidecar = store
            .object("images/provenance-data/gb1-lg-google-books.jpg.txt")
            .expect("sidecar present");
        let json = String::from_utf8(sidecar).unwrap();
        assert!(json.contains("isbn:9780000000002"));
    }

    #[tokio::test]
    async fn public_url_prefers_the_public_cdn() {
        let store = Arc::new(MemoryObjectStore::new());
        let config = ObjectStoreConfig {
            cdn_url: "https://cdn.example".to_string(),
            public_cdn_url: "https://public.example/".to_string(),
            ..Default::default()
        };
        let gateway = ObjectStoreGateway::new(store, &config, 1024, false);
        assert_eq!(
            gateway.public_url("images/book-covers/x.jpg"),
            "https://public.example/images/book-covers/x.jpg"
        );
    }
}
