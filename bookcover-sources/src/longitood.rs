use serde::{Deserialize, Serialize};

use crate::{SourceError, SourceResult};

/// A client for the Longitood book-cover API.
pub struct LongitoodClient {
    base_url: String,
    client: reqwest::Client,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CoverResponse {
    url: Option<String>,
}

impl LongitoodClient {
    const DEFAULT_BASE_URL: &str = "https://bookcover.longitood.com";

    pub fn new() -> Self {
        Self::with_base_url(Self::DEFAULT_BASE_URL)
    }

    /// Create a client against a different base URL. Used by tests to point
    /// at a local server.
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            client: reqwest::Client::new(),
        }
    }

    /// Look up the cover URL for an ISBN. `Ok(None)` means the service has
    /// no cover for this book.
    pub async fn cover_url_for_isbn(&self, isbn: &str) -> SourceResult<Option<String>> {
        let response = self
            .client
            .get(format!("{}/bookcover/{isbn}", self.base_url))
            .send()
            .await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(SourceError::Status(response.status().as_u16()));
        }

        let body: CoverResponse = serde_json::from_slice(&response.bytes().await?)?;
        Ok(body.url.filter(|url| !url.is_empty()))
    }
}

impl Default for LongitoodClient {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_cover_response() {
        let body = r#"{"url":"https://m.media-example.com/images/I/x.jpg"}"#;
        let parsed: CoverResponse = serde_json::from_str(body).unwrap();
        assert_eq!(
            parsed.url.as_deref(),
            Some("https://m.media-example.com/images/I/x.jpg")
        );
    }

    #[tokio::test]
    async fn fetches_from_a_local_server() {
        let server = tiny_http::Server::http("127.0.0.1:0").unwrap();
        let ip = server.server_addr().to_ip().expect("Provided addr is an ip");
        std::thread::spawn(move || {
            if let Ok(request) = server.recv() {
                assert!(request.url().ends_with("/bookcover/9780000000002"));
                let _ = request.respond(tiny_http::Response::from_string(
                    r#"{"url":"https://example.com/cover.jpg"}"#,
                ));
            }
        });

        let client = LongitoodClient::with_base_url(format!("http://{ip}"));
        let url = client.cover_url_for_isbn("9780000000002").await.unwrap();
        assert_eq!(url.as_deref(), Some("https://example.com/cover.jpg"));
    }
}
