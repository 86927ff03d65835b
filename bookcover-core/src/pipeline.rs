use std::cmp::Reverse;
use std::sync::Arc;

use futures::future::join_all;

use crate::adapters::Sources;
use crate::catalog::CatalogStore;
use crate::provenance::Provenance;
use crate::sources::{CoverSize, enhance_cover_url, is_likely_cover_url, with_zoom_zero};
use crate::types::{
    Book, Fingerprint, ImageDescriptor, PLACEHOLDER_PATH, ProviderId, ResolutionTier,
    SelectedImage, Storage,
};

/// Non-Google hints must already be decent to be worth keeping; anything
/// smaller gets outcompeted by the fan-out anyway.
const HINT_MIN_DIMENSION: u32 = 200;

/// Class 0 in selection: a durable object-store copy with believable
/// dimensions beats everything else.
const OBJECT_STORE_CLASS_MIN_PX: u32 = 150;

/// Total selection order over candidates: object-store copies with real
/// dimensions first, then larger pixel area, then source preference. Ties
/// beyond this fall back to candidate order.
pub(crate) fn selection_rank(descriptor: &ImageDescriptor) -> (u8, Reverse<u64>, u8) {
    let class = if descriptor.storage == Storage::ObjectStore
        && descriptor.width > OBJECT_STORE_CLASS_MIN_PX
        && descriptor.height > OBJECT_STORE_CLASS_MIN_PX
    {
        0
    } else {
        1
    };
    (class, Reverse(descriptor.area()), source_rank(descriptor))
}

fn source_rank(descriptor: &ImageDescriptor) -> u8 {
    if descriptor.storage == Storage::ObjectStore {
        return 0;
    }
    match descriptor.provider {
        ProviderId::Google => 1,
        provider if provider.is_open_library() => 2,
        ProviderId::Longitood => 3,
        _ if descriptor.storage == Storage::Local && !descriptor.is_placeholder() => 4,
        _ => 5,
    }
}

/// Run the full lookup: hint, object-store probe, catalog short-circuit,
/// provider fan-out, then selection. Never fails; the worst outcome is a
/// placeholder descriptor.
pub(crate) async fn resolve_best(
    sources: &Sources,
    catalog: Option<&Arc<dyn CatalogStore>>,
    book: &Book,
    fingerprint: &Fingerprint,
    hint: Option<&str>,
    provenance: &Provenance,
) -> ImageDescriptor {
    let book_tag = fingerprint.as_str();
    let mut candidates: Vec<ImageDescriptor> = Vec::new();

    // Hint stage: a provisional URL from an earlier resolve or the input
    // record. Local paths and the placeholder have nothing to offer.
    if let Some(hint) = hint {
        if !hint.is_empty() && hint != PLACEHOLDER_PATH && !hint.starts_with('/') {
            candidates.extend(evaluate_hint(sources, hint, book_tag, provenance).await);
        }
    }

    // Durable copy already in the object store?
    let probe = sources.object_store_probe(book_tag, provenance).await;
    if probe.is_valid_candidate() {
        candidates.push(probe);
    }

    // A catalog record that already carries an object-store cover makes the
    // provider fan-out pointless.
    let mut skip_fan_out = false;
    if let Some(catalog) = catalog {
        if let Some(hit) = catalog.lookup(fingerprint).await {
            if let Some(cover) = hit.cover {
                if cover.storage == Storage::ObjectStore && cover.is_valid_candidate() {
                    provenance.record_success(
                        ProviderId::ObjectStore,
                        format!("catalog:{fingerprint}"),
                        cover.location.as_str(),
                        cover.width,
                        cover.height,
                    );
                    candidates.push(cover);
                    skip_fan_out = true;
                }
            }
        }
    }

    if !skip_fan_out {
        if let Some(isbn) = book.isbn() {
            let (google, ol_large, ol_medium, ol_small, longitood) = tokio::join!(
                sources.google_by_isbn(isbn, book_tag, provenance),
                sources.open_library(isbn, CoverSize::Large, book_tag, provenance),
                sources.open_library(isbn, CoverSize::Medium, book_tag, provenance),
                sources.open_library(isbn, CoverSize::Small, book_tag, provenance),
                sources.longitood(isbn, book_tag, provenance),
            );
            candidates.extend(
                [google, ol_large, ol_medium, ol_small, longitood]
                    .into_iter()
                    .filter(ImageDescriptor::is_valid_candidate),
            );
        } else if let Some(volume_id) = book.id.as_deref() {
            let google = sources
                .google_by_volume_id(volume_id, book_tag, provenance)
                .await;
            if google.is_valid_candidate() {
                candidates.push(google);
            }
        }
    }

    select_winner(candidates, provenance)
}

/// Download hint variants. Google hints produce up to two enhanced variants
/// and never short-circuit the fan-out; other hints must be at least
/// 200x200 to stay in the race.
async fn evaluate_hint(
    sources: &Sources,
    hint: &str,
    book_tag: &str,
    provenance: &Provenance,
) -> Vec<ImageDescriptor> {
    let provider = ProviderId::infer_from_url(hint, &sources.host_refs());

    if provider == ProviderId::Google {
        let enhanced = enhance_cover_url(hint);
        let zoomed = with_zoom_zero(&enhanced);
        let mut variants = vec![enhanced];
        if !variants.contains(&zoomed) {
            variants.push(zoomed);
        }

        let downloads = variants
            .iter()
            .filter(|variant| is_likely_cover_url(variant))
            .map(|variant| {
                sources.disk.download_and_store(
                    variant,
                    book_tag,
                    provenance,
                    ProviderId::Google,
                    ResolutionTier::Unknown,
                )
            });
        return join_all(downloads)
            .await
            .into_iter()
            .filter(ImageDescriptor::is_valid_candidate)
            .collect();
    }

    let provider = if provider == ProviderId::LocalCache {
        ProviderId::ProvisionalHint
    } else {
        provider
    };
    let descriptor = sources
        .disk
        .download_and_store(hint, book_tag, provenance, provider, ResolutionTier::Unknown)
        .await;
    if descriptor.is_valid_candidate()
        && descriptor.width >= HINT_MIN_DIMENSION
        && descriptor.height >= HINT_MIN_DIMENSION
    {
        vec![descriptor]
    } else {
        Vec::new()
    }
}

fn select_winner(candidates: Vec<ImageDescriptor>, provenance: &Provenance) -> ImageDescriptor {
    let total = candidates.len();
    let winner = candidates
        .into_iter()
        .enumerate()
        .filter(|(_, descriptor)| descriptor.is_valid_candidate())
        .min_by_key(|(index, descriptor)| (selection_rank(descriptor), *index))
        .map(|(_, descriptor)| descriptor);

    match winner {
        Some(descriptor) => {
            provenance.select(SelectedImage {
                provider: descriptor.provider,
                location: descriptor.location.clone(),
                storage: descriptor.storage,
                width: descriptor.width,
                height: descriptor.height,
                reason: Some(format!("best of {total} candidates")),
                object_store_key: (descriptor.storage == Storage::ObjectStore)
                    .then(|| descriptor.provider_artifact_id.clone()),
            });
            descriptor
        }
        None => ImageDescriptor::placeholder(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(
        provider: ProviderId,
        storage: Storage,
        width: u32,
        height: u32,
        name: &str,
    ) -> ImageDescriptor {
        ImageDescriptor {
            location: format!("/book-covers/{name}.jpg"),
            storage,
            provider,
            provider_artifact_id: name.to_string(),
            tier: ResolutionTier::Unknown,
            width,
            height,
            content_hash: None,
        }
    }

    #[test]
    fn larger_area_wins() {
        let small = candidate(ProviderId::Google, Storage::Local, 200, 300, "small");
        let large = candidate(ProviderId::Longitood, Storage::Local, 600, 900, "large");
        assert!(selection_rank(&large) < selection_rank(&small));
    }

    #[test]
    fn object_store_with_real_dimensions_outranks_bigger_local() {
        let durable = candidate(ProviderId::Google, Storage::ObjectStore, 400, 600, "durable");
        let bigger_local = candidate(ProviderId::Google, Storage::Local, 800, 1200, "local");
        assert!(selection_rank(&durable) < selection_rank(&bigger_local));
    }

    #[test]
    fn tiny_object_store_copies_compete_on_area_only() {
        let tiny_durable = candidate(ProviderId::Google, Storage::ObjectStore, 100, 140, "tiny");
        let local = candidate(ProviderId::Google, Storage::Local, 600, 900, "local");
        assert!(selection_rank(&local) < selection_rank(&tiny_durable));
    }

    #[test]
    fn source_preference_breaks_area_ties() {
        let google = candidate(ProviderId::Google, Storage::Local, 600, 900, "g");
        let open_library = candidate(ProviderId::OpenLibraryL, Storage::Local, 600, 900, "ol");
        let longitood = candidate(ProviderId::Longitood, Storage::Local, 600, 900, "lt");
        let hint = candidate(ProviderId::ProvisionalHint, Storage::Local, 600, 900, "hint");

        assert!(selection_rank(&google) < selection_rank(&open_library));
        assert!(selection_rank(&open_library) < selection_rank(&longitood));
        assert!(selection_rank(&longitood) < selection_rank(&hint));
    }

    #[test]
    fn selection_is_idempotent_and_order_stable() {
        let candidates = vec![
            candidate(ProviderId::OpenLibraryM, Storage::Local, 200, 300, "ol-m"),
            candidate(ProviderId::Google, Storage::Local, 600, 900, "google"),
            candidate(ProviderId::Longitood, Storage::Local, 600, 900, "longitood"),
        ];

        let first = select_winner(candidates.clone(), &Provenance::new());
        let second = select_winner(candidates, &Provenance::new());
        assert_eq!(first, second);
        assert_eq!(first.provider_artifact_id, "google");
    }

    #[test]
    fn invalid_candidates_yield_the_placeholder() {
        let provenance = Provenance::new();
        let winner = select_winner(
            vec![
                ImageDescriptor::placeholder(),
                candidate(ProviderId::Google, Storage::Local, 1, 1, "degenerate"),
            ],
            &provenance,
        );
        assert!(winner.is_placeholder());
        assert!(provenance.snapshot().selected.is_none());
    }

    #[test]
    fn selection_records_the_object_store_key() {
        let provenance = Provenance::new();
        let mut durable = candidate(ProviderId::Google, Storage::ObjectStore, 600, 900, "k");
        durable.provider_artifact_id = "images/book-covers/gb1-lg-google-books.jpg".to_string();
        durable.location = "https://cdn.example/images/book-covers/gb1-lg-google-books.jpg".to_string();

        select_winner(vec![durable], &provenance);
        let selected = provenance.snapshot().selected.unwrap();
        assert_eq!(
            selected.object_store_key.as_deref(),
            Some("images/book-covers/gb1-lg-google-books.jpg")
        );
    }
}
