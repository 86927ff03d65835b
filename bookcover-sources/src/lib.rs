//! Typed HTTP clients for the external cover providers.

mod fetch;
mod google;
mod longitood;
mod openlibrary;

pub use fetch::{FetchError, FetchResult, HttpFetcher, RemoteFetch};
pub use google::{GoogleBooksClient, GoogleVolumeImage, enhance_cover_url, is_likely_cover_url, with_zoom_zero};
pub use longitood::LongitoodClient;
pub use openlibrary::{CoverSize, cover_url};

/// An error from one of the provider API clients.
#[derive(Debug)]
pub enum SourceError {
    /// An error that occurred when making a request.
    Reqwest(reqwest::Error),
    /// An error that occurred when deserializing a response.
    Deserialization(serde_json::Error),
    /// The provider answered with an unexpected status.
    Status(u16),
}

impl std::fmt::Display for SourceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceError::Reqwest(e) => write!(f, "Request error: {e}"),
            SourceError::Deserialization(e) => write!(f, "Deserialization error: {e}"),
            SourceError::Status(code) => write!(f, "Unexpected status: {code}"),
        }
    }
}
impl std::error::Error for SourceError {}
impl From<reqwest::Error> for SourceError {
    fn from(e: reqwest::Error) -> Self {
        SourceError::Reqwest(e)
    }
}
impl From<serde_json::Error> for SourceError {
    fn from(e: serde_json::Error) -> Self {
        SourceError::Deserialization(e)
    }
}

/// A result type for the provider clients.
pub type SourceResult<T> = Result<T, SourceError>;
