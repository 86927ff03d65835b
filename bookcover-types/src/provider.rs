use serde::{Deserialize, Serialize};

/// Where a cover candidate came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProviderId {
    ObjectStore,
    Google,
    OpenLibraryL,
    OpenLibraryM,
    OpenLibraryS,
    Longitood,
    ProvisionalHint,
    LocalCache,
    Placeholder,
}

impl ProviderId {
    /// Human-readable provider name, also the input to object-store key
    /// slugging.
    pub fn display_name(&self) -> &'static str {
        match self {
            ProviderId::ObjectStore => "Object Store",
            ProviderId::Google => "Google Books",
            ProviderId::OpenLibraryL | ProviderId::OpenLibraryM | ProviderId::OpenLibraryS => {
                "Open Library"
            }
            ProviderId::Longitood => "Longitood",
            ProviderId::ProvisionalHint => "Provisional Hint",
            ProviderId::LocalCache => "Local Cache",
            ProviderId::Placeholder => "Placeholder",
        }
    }

    pub fn is_open_library(&self) -> bool {
        matches!(
            self,
            ProviderId::OpenLibraryL | ProviderId::OpenLibraryM | ProviderId::OpenLibraryS
        )
    }

    /// Classify a cover URL by its host/path shape. `object_store_hosts` are
    /// the configured CDN base URLs, matched as substrings alongside the
    /// well-known S3 endpoints.
    pub fn infer_from_url(url: &str, object_store_hosts: &[&str]) -> ProviderId {
        if url.contains("googleapis.com/books") || url.contains("books.google.com/books") {
            return ProviderId::Google;
        }
        if url.contains("openlibrary.org") {
            return ProviderId::OpenLibraryL;
        }
        if url.contains("longitood.com") {
            return ProviderId::Longitood;
        }
        if url.contains("digitaloceanspaces.com")
            || url.contains("s3.amazonaws.com")
            || object_store_hosts
                .iter()
                .any(|host| !host.is_empty() && url.contains(host))
        {
            return ProviderId::ObjectStore;
        }
        if url.starts_with('/') {
            return ProviderId::LocalCache;
        }
        ProviderId::ProvisionalHint
    }
}

impl std::fmt::Display for ProviderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// Resolution class of a cover artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResolutionTier {
    Original,
    Large,
    Medium,
    Small,
    Unknown,
}

/// Where the bytes for a descriptor live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Storage {
    /// Under the local disk cache, served as a web path.
    Local,
    /// In the durable object store behind the CDN.
    ObjectStore,
    /// Still on a provider's servers.
    Remote,
    Placeholder,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infers_provider_from_url_substrings() {
        let hosts = ["https://cdn.example"];
        for (url, expected) in [
            (
                "https://books.googleapis.com/books/v1/volumes/x",
                ProviderId::Google,
            ),
            (
                "http://books.google.com/books/content?id=x",
                ProviderId::Google,
            ),
            (
                "https://covers.openlibrary.org/b/isbn/9780000000002-L.jpg",
                ProviderId::OpenLibraryL,
            ),
            (
                "https://bookcover.longitood.com/bookcover/9780000000002",
                ProviderId::Longitood,
            ),
            (
                "https://cdn.example/images/book-covers/x-lg-google-books.jpg",
                ProviderId::ObjectStore,
            ),
            (
                "https://covers.nyc3.digitaloceanspaces.com/x.jpg",
                ProviderId::ObjectStore,
            ),
            (
                "https://bucket.s3.amazonaws.com/x.jpg",
                ProviderId::ObjectStore,
            ),
            ("/book-covers/abc123.jpg", ProviderId::LocalCache),
            ("https://example.com/img.jpg", ProviderId::ProvisionalHint),
        ] {
            assert_eq!(ProviderId::infer_from_url(url, &hosts), expected, "{url}");
        }
    }

    #[test]
    fn open_library_tiers_share_a_display_name() {
        assert_eq!(ProviderId::OpenLibraryM.display_name(), "Open Library");
        assert!(ProviderId::OpenLibraryS.is_open_library());
        assert!(!ProviderId::Google.is_open_library());
    }
}
