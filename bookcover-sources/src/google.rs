use serde::{Deserialize, Serialize};

use crate::{SourceError, SourceResult};

/// A client for the Google Books volumes API.
pub struct GoogleBooksClient {
    base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

/// The best cover link a volume carries, plus the volume it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GoogleVolumeImage {
    pub volume_id: String,
    pub url: String,
}

impl GoogleBooksClient {
    const DEFAULT_BASE_URL: &str = "https://www.googleapis.com";

    /// Create a new client. The API key is optional; without one Google
    /// serves a lower rate limit.
    pub fn new(api_key: Option<String>) -> Self {
        Self::with_base_url(Self::DEFAULT_BASE_URL, api_key)
    }

    /// Create a client against a different base URL. Used by tests to point
    /// at a local server.
    pub fn with_base_url(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key,
            client: reqwest::Client::new(),
        }
    }

    /// Look up the best cover link for an ISBN. `Ok(None)` means Google
    /// answered but has no usable image for this book.
    pub async fn cover_image_by_isbn(&self, isbn: &str) -> SourceResult<Option<GoogleVolumeImage>> {
        let mut query = vec![("q".to_string(), format!("isbn:{isbn}"))];
        if let Some(key) = &self.api_key {
            query.push(("key".to_string(), key.clone()));
        }

        let response = self
            .client
            .get(format!("{}/books/v1/volumes", self.base_url))
            .query(&query)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(SourceError::Status(response.status().as_u16()));
        }

        let body: VolumesResponse = serde_json::from_slice(&response.bytes().await?)?;
        Ok(body
            .items
            .unwrap_or_default()
            .into_iter()
            .find_map(Volume::into_image))
    }

    /// Look up the best cover link for a known volume id.
    pub async fn cover_image_by_volume_id(
        &self,
        volume_id: &str,
    ) -> SourceResult<Option<GoogleVolumeImage>> {
        let mut query = vec![];
        if let Some(key) = &self.api_key {
            query.push(("key".to_string(), key.clone()));
        }

        let response = self
            .client
            .get(format!("{}/books/v1/volumes/{volume_id}", self.base_url))
            .query(&query)
            .send()
            .await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(SourceError::Status(response.status().as_u16()));
        }

        let volume: Volume = serde_json::from_slice(&response.bytes().await?)?;
        Ok(volume.into_image())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct VolumesResponse {
    items: Option<Vec<Volume>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Volume {
    id: String,
    volume_info: Option<VolumeInfo>,
}

impl Volume {
    fn into_image(self) -> Option<GoogleVolumeImage> {
        let links = self.volume_info?.image_links?;
        let url = links.best()?;
        Some(GoogleVolumeImage {
            volume_id: self.id,
            url,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VolumeInfo {
    image_links: Option<ImageLinks>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ImageLinks {
    extra_large: Option<String>,
    large: Option<String>,
    medium: Option<String>,
    small: Option<String>,
    thumbnail: Option<String>,
    small_thumbnail: Option<String>,
}

impl ImageLinks {
    /// Largest available link first.
    fn best(self) -> Option<String> {
        [
            self.extra_large,
            self.large,
            self.medium,
            self.small,
            self.thumbnail,
            self.small_thumbnail,
        ]
        .into_iter()
        .flatten()
        .next()
    }
}

/// Normalize a Google Books image URL into its highest-quality form:
/// `zoom=<n>` becomes `zoom=0`, `fife=<...>` sizing and `edge=curl` are
/// stripped, `http://` is upgraded, and any trailing `?`/`&` is trimmed.
pub fn enhance_cover_url(url: &str) -> String {
    let url = match url.strip_prefix("http://") {
        Some(rest) => format!("https://{rest}"),
        None => url.to_string(),
    };

    let (path, query) = match url.split_once('?') {
        Some((path, query)) => (path.to_string(), Some(query.to_string())),
        None => (url, None),
    };

    let mut enhanced = path;
    if let Some(query) = query {
        let kept: Vec<String> = query
            .split('&')
            .filter(|pair| !pair.is_empty())
            .filter_map(|pair| {
                let key = pair.split('=').next().unwrap_or("");
                match key {
                    "zoom" => Some("zoom=0".to_string()),
                    "fife" => None,
                    "edge" if pair == "edge=curl" => None,
                    _ => Some(pair.to_string()),
                }
            })
            .collect();
        if !kept.is_empty() {
            enhanced = format!("{enhanced}?{}", kept.join("&"));
        }
    }

    enhanced.trim_end_matches(['?', '&']).to_string()
}

/// Force `zoom=0` onto a URL, appending the parameter when absent.
pub fn with_zoom_zero(url: &str) -> String {
    let has_zoom = url
        .split_once('?')
        .map(|(_, query)| {
            query
                .split('&')
                .any(|pair| pair.split('=').next() == Some("zoom"))
        })
        .unwrap_or(false);
    if has_zoom {
        // enhance_cover_url already rewrites any zoom value to 0.
        enhance_cover_url(url)
    } else if url.contains('?') {
        format!("{}&zoom=0", url.trim_end_matches(['?', '&']))
    } else {
        format!("{url}?zoom=0")
    }
}

/// Whether a Google URL plausibly points at a front cover rather than an
/// interior page scan. Any `pg=<...>` parameter disqualifies it, as does a
/// surviving `edge=curl`.
pub fn is_likely_cover_url(url: &str) -> bool {
    let Some((_, query)) = url.split_once('?') else {
        return true;
    };
    for pair in query.split('&') {
        let key = pair.split('=').next().unwrap_or("");
        if key == "pg" {
            return false;
        }
        if pair == "edge=curl" {
            return false;
        }
    }
    true
}
