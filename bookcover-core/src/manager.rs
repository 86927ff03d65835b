use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};

use crate::adapters::Sources;
use crate::caches::CacheManager;
use crate::catalog::CatalogStore;
use crate::config::CoversConfig;
use crate::disk_cache::DiskCache;
use crate::events::EventBus;
use crate::normalize::Normalizer;
use crate::object_store::{ObjectStore, ObjectStoreGateway};
use crate::pipeline;
use crate::placeholder::PlaceholderRegistry;
use crate::provenance::Provenance;
use crate::sources::{GoogleBooksClient, LongitoodClient, RemoteFetch};
use crate::types::{
    Book, BookCoverUpdatedEvent, Fingerprint, ImageDescriptor, PLACEHOLDER_PATH, ProvenanceRecord,
    ProviderId, Storage,
};

const CLEANUP_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// What a caller gets back immediately: a URL that can be rendered right
/// now, a fallback, and where the preferred one points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoverUrls {
    pub preferred: String,
    pub fallback: String,
    pub provider: ProviderId,
}

impl CoverUrls {
    fn placeholder() -> Self {
        Self {
            preferred: PLACEHOLDER_PATH.to_string(),
            fallback: PLACEHOLDER_PATH.to_string(),
            provider: ProviderId::Placeholder,
        }
    }
}

/// The resolver's external collaborators, injected at construction. Tests
/// substitute recording and in-memory implementations.
pub struct Collaborators {
    pub fetcher: Arc<dyn RemoteFetch>,
    pub events: Arc<dyn EventBus>,
    pub object_store: Option<Arc<dyn ObjectStore>>,
    pub catalog: Option<Arc<dyn CatalogStore>>,
    /// Override the Google client (tests point it at a local server).
    pub google: Option<GoogleBooksClient>,
    pub longitood: Option<LongitoodClient>,
}

impl Collaborators {
    pub fn new(fetcher: Arc<dyn RemoteFetch>, events: Arc<dyn EventBus>) -> Self {
        Self {
            fetcher,
            events,
            object_store: None,
            catalog: None,
            google: None,
            longitood: None,
        }
    }
}

struct Inner {
    sources: Option<Sources>,
    caches: Arc<CacheManager>,
    normalizer: Normalizer,
    events: Arc<dyn EventBus>,
    catalog: Option<Arc<dyn CatalogStore>>,
}

struct ConvergeJob {
    book: Book,
    hint: Option<String>,
}

/// The cover management facade: answers synchronously with the best known
/// URL and converges in the background on a durable, high-quality artifact.
pub struct CoverManager {
    inner: Arc<Inner>,
    jobs: Mutex<Option<mpsc::UnboundedSender<ConvergeJob>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    cleanup_stop: watch::Sender<bool>,
    cleanup: Mutex<Option<JoinHandle<()>>>,
}

impl CoverManager {
    /// Build the resolver. Must run inside a tokio runtime: the background
    /// worker and the cache cleanup timer are spawned here. A cache
    /// directory that cannot be created disables caching for the process;
    /// the resolver then serves placeholders.
    pub fn new(config: CoversConfig, collaborators: Collaborators) -> Self {
        let caches = Arc::new(CacheManager::new());
        let placeholders = Arc::new(PlaceholderRegistry::new());

        let sources = if config.cache.enabled {
            match DiskCache::new(
                &config.cache,
                collaborators.fetcher.clone(),
                caches.clone(),
                placeholders,
            ) {
                Ok(disk) => {
                    let gateway = if config.object_store.enabled {
                        collaborators.object_store.map(|store| {
                            Arc::new(ObjectStoreGateway::new(
                                store,
                                &config.object_store,
                                config.cache.max_file_size_bytes,
                                config.debug.cover_provenance,
                            ))
                        })
                    } else {
                        None
                    };
                    let object_store_hosts = [
                        config.object_store.cdn_url.clone(),
                        config.object_store.public_cdn_url.clone(),
                    ]
                    .into_iter()
                    .filter(|host| !host.is_empty())
                    .collect();

                    Some(Sources {
                        disk: Arc::new(disk),
                        caches: caches.clone(),
                        google: collaborators.google.unwrap_or_else(|| {
                            GoogleBooksClient::new(config.providers.google.api_key.clone())
                        }),
                        longitood: collaborators
                            .longitood
                            .unwrap_or_else(LongitoodClient::new),
                        gateway,
                        object_store_hosts,
                    })
                }
                Err(e) => {
                    tracing::error!(
                        "cover cache disabled: cannot create {}: {e}",
                        config.cache.dir.display()
                    );
                    None
                }
            }
        } else {
            None
        };

        let inner = Arc::new(Inner {
            sources,
            caches,
            normalizer: Normalizer::new(),
            events: collaborators.events,
            catalog: collaborators.catalog,
        });

        let (jobs_tx, jobs_rx) = mpsc::unbounded_channel();
        let worker = tokio::spawn(worker_loop(inner.clone(), jobs_rx));

        let (cleanup_stop, stop_rx) = watch::channel(false);
        let cleanup = inner
            .sources
            .as_ref()
            .map(|sources| tokio::spawn(cleanup_loop(sources.disk.clone(), stop_rx)));

        Self {
            inner,
            jobs: Mutex::new(Some(jobs_tx)),
            worker: Mutex::new(Some(worker)),
            cleanup_stop,
            cleanup: Mutex::new(cleanup),
        }
    }

    /// Resolve a displayable cover URL right now. Never fails; the worst
    /// answer is the placeholder. May enqueue a background convergence.
    pub async fn initial_cover(&self, book: &Book) -> CoverUrls {
        let Some(sources) = &self.inner.sources else {
            return CoverUrls::placeholder();
        };
        let Some(fingerprint) = Fingerprint::for_book(book) else {
            return CoverUrls::placeholder();
        };

        let fallback = book
            .cover_image_url
            .as_deref()
            .filter(|url| !url.is_empty())
            .unwrap_or(PLACEHOLDER_PATH)
            .to_string();

        // A durable copy in the object store settles the question; no
        // background work is enqueued for it.
        if sources.gateway.is_some() {
            let probe = sources
                .object_store_probe(fingerprint.as_str(), &Provenance::new())
                .await;
            if probe.is_valid_candidate() && probe.storage == Storage::ObjectStore {
                let location = probe.location.clone();
                self.inner.caches.put_final(fingerprint, probe);
                return CoverUrls {
                    preferred: location,
                    fallback,
                    provider: ProviderId::ObjectStore,
                };
            }
        }

        if let Some(descriptor) = self.inner.caches.final_descriptor(&fingerprint) {
            return CoverUrls {
                preferred: descriptor.location,
                fallback,
                provider: descriptor.provider,
            };
        }

        if let Some(url) = self.inner.caches.provisional_url(&fingerprint) {
            let provider = ProviderId::infer_from_url(&url, &sources.host_refs());
            return CoverUrls {
                preferred: url,
                fallback,
                provider,
            };
        }

        let preferred = book
            .cover_image_url
            .as_deref()
            .filter(|url| !url.is_empty() && *url != PLACEHOLDER_PATH)
            .map(str::to_string);
        let (preferred, provider) = match preferred {
            Some(url) => {
                self.inner
                    .caches
                    .put_provisional(fingerprint.clone(), url.clone());
                let provider = ProviderId::infer_from_url(&url, &sources.host_refs());
                (url, provider)
            }
            None => (PLACEHOLDER_PATH.to_string(), ProviderId::Placeholder),
        };

        self.enqueue(ConvergeJob {
            book: book.clone(),
            hint: (preferred != PLACEHOLDER_PATH).then(|| preferred.clone()),
        });

        CoverUrls {
            preferred,
            fallback,
            provider,
        }
    }

    /// Run one convergence inline and return its outcome. Used by callers
    /// that want to wait (the CLI); the background path goes through
    /// `initial_cover`. `None` when caching is disabled or the book has no
    /// fingerprint.
    pub async fn converge(&self, book: &Book) -> Option<(ImageDescriptor, ProvenanceRecord)> {
        self.inner.sources.as_ref()?;
        let fingerprint = Fingerprint::for_book(book)?;
        let hint = book
            .cover_image_url
            .clone()
            .filter(|url| !url.is_empty() && url != PLACEHOLDER_PATH);
        Some(run_convergence(&self.inner, book, &fingerprint, hint.as_deref()).await)
    }

    /// Look up the final descriptor cached for a book, if any.
    pub fn final_descriptor(&self, book: &Book) -> Option<ImageDescriptor> {
        let fingerprint = Fingerprint::for_book(book)?;
        self.inner.caches.final_descriptor(&fingerprint)
    }

    /// Stop accepting work, drain in-flight convergences, and stop the
    /// cleanup timer.
    pub async fn shutdown(&self) {
        self.jobs.lock().unwrap().take();
        let _ = self.cleanup_stop.send(true);

        let worker = self.worker.lock().unwrap().take();
        if let Some(handle) = worker {
            let _ = handle.await;
        }
        let cleanup = self.cleanup.lock().unwrap().take();
        if let Some(handle) = cleanup {
            let _ = handle.await;
        }
    }

    fn enqueue(&self, job: ConvergeJob) {
        if let Some(jobs) = self.jobs.lock().unwrap().as_ref() {
            let _ = jobs.send(job);
        }
    }
}

async fn worker_loop(inner: Arc<Inner>, mut jobs: mpsc::UnboundedReceiver<ConvergeJob>) {
    let mut active = JoinSet::new();
    while let Some(job) = jobs.recv().await {
        let inner = inner.clone();
        active.spawn(async move {
            run_convergence_guarded(inner, job).await;
        });
        // Reap whatever already finished so the set stays small.
        while active.try_join_next().is_some() {}
    }
    // Channel closed: drain the in-flight convergences before exiting.
    while active.join_next().await.is_some() {}
}

async fn cleanup_loop(disk: Arc<DiskCache>, mut stop: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(CLEANUP_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let disk = disk.clone();
                let _ = tokio::task::spawn_blocking(move || disk.cleanup_stale()).await;
            }
            _ = stop.changed() => break,
        }
    }
}

/// Run a convergence and keep the event stream gap-free even if something
/// below panics: the panic path still writes a placeholder final and
/// publishes the event.
async fn run_convergence_guarded(inner: Arc<Inner>, job: ConvergeJob) {
    let Some(fingerprint) = Fingerprint::for_book(&job.book) else {
        return;
    };
    let catalog_id = job.book.id.clone();

    let outcome = AssertUnwindSafe(run_convergence(
        &inner,
        &job.book,
        &fingerprint,
        job.hint.as_deref(),
    ))
    .catch_unwind()
    .await;

    if outcome.is_err() {
        tracing::error!("cover convergence for {fingerprint} panicked");
        inner
            .caches
            .put_final(fingerprint.clone(), ImageDescriptor::placeholder());
        inner.events.publish(BookCoverUpdatedEvent {
            fingerprint,
            final_location: PLACEHOLDER_PATH.to_string(),
            catalog_id,
            provider: ProviderId::Placeholder,
        });
    }
}

async fn run_convergence(
    inner: &Inner,
    book: &Book,
    fingerprint: &Fingerprint,
    hint: Option<&str>,
) -> (ImageDescriptor, ProvenanceRecord) {
    let provenance = Provenance::new();

    let final_descriptor = match &inner.sources {
        Some(sources) => {
            let best = pipeline::resolve_best(
                sources,
                inner.catalog.as_ref(),
                book,
                fingerprint,
                hint,
                &provenance,
            )
            .await;

            if best.storage == Storage::Local {
                promote_to_object_store(inner, sources, best, fingerprint, &provenance).await
            } else {
                best
            }
        }
        None => ImageDescriptor::placeholder(),
    };

    inner
        .caches
        .put_final(fingerprint.clone(), final_descriptor.clone());
    inner.events.publish(BookCoverUpdatedEvent {
        fingerprint: fingerprint.clone(),
        final_location: final_descriptor.location.clone(),
        catalog_id: book.id.clone(),
        provider: final_descriptor.provider,
    });

    (final_descriptor, provenance.snapshot())
}

/// Push a locally cached winner into the object store. Any failure keeps
/// the local descriptor as the final answer.
async fn promote_to_object_store(
    inner: &Inner,
    sources: &Sources,
    winner: ImageDescriptor,
    fingerprint: &Fingerprint,
    provenance: &Provenance,
) -> ImageDescriptor {
    let Some(gateway) = &sources.gateway else {
        return winner;
    };
    let Some(path) = sources.disk.local_path(&winner.location) else {
        tracing::warn!("winner location {} is not in the cache", winner.location);
        return winner;
    };

    let bytes = match tokio::fs::read(&path).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!("cannot read winner {}: {e}", path.display());
            return winner;
        }
    };
    let normalized = match inner.normalizer.normalize(&bytes, fingerprint.as_str()) {
        Ok(normalized) => normalized,
        Err(e) => {
            tracing::warn!("winner for {fingerprint} failed normalization: {e}");
            return winner;
        }
    };

    match gateway
        .upload_processed(
            &normalized.bytes,
            normalized.extension,
            normalized.content_type,
            normalized.width,
            normalized.height,
            fingerprint.as_str(),
            winner.provider,
            provenance,
        )
        .await
    {
        Ok(descriptor) => descriptor,
        Err(e) => {
            tracing::warn!("upload for {fingerprint} failed, keeping local cover: {e}");
            winner
        }
    }
}
