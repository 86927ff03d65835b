use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

/// Why a byte fetch failed. The disk cache maps these onto its provenance
/// outcomes, so "not found" must stay distinguishable from other faults.
#[derive(Debug)]
pub enum FetchError {
    /// The server said the resource does not exist (HTTP 404/410).
    NotFound,
    /// The deadline expired before the body arrived.
    Timeout,
    /// The transport succeeded but the body was zero bytes.
    Empty,
    /// Any other non-success status.
    Status(u16),
    /// Connection, TLS, or protocol failure.
    Transport(String),
}

impl std::fmt::Display for FetchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FetchError::NotFound => write!(f, "not found"),
            FetchError::Timeout => write!(f, "deadline expired"),
            FetchError::Empty => write!(f, "empty body"),
            FetchError::Status(code) => write!(f, "unexpected status {code}"),
            FetchError::Transport(e) => write!(f, "transport error: {e}"),
        }
    }
}
impl std::error::Error for FetchError {}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            FetchError::Timeout
        } else {
            FetchError::Transport(e.to_string())
        }
    }
}

/// A result type for byte fetches.
pub type FetchResult<T> = Result<T, FetchError>;

/// GET-bytes-with-deadline, the only thing the disk cache needs from HTTP.
/// Tests substitute canned implementations.
#[async_trait]
pub trait RemoteFetch: Send + Sync {
    async fn fetch_bytes(&self, url: &str, deadline: Duration) -> FetchResult<Bytes>;
}

/// The production fetcher, backed by a shared reqwest client.
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteFetch for HttpFetcher {
    async fn fetch_bytes(&self, url: &str, deadline: Duration) -> FetchResult<Bytes> {
        let response = self.client.get(url).timeout(deadline).send().await?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND || status == reqwest::StatusCode::GONE {
            return Err(FetchError::NotFound);
        }
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        let bytes = response.bytes().await?;
        if bytes.is_empty() {
            return Err(FetchError::Empty);
        }
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn serve_once(response: tiny_http::Response<std::io::Cursor<Vec<u8>>>) -> String {
        let server = tiny_http::Server::http("127.0.0.1:0").unwrap();
        let ip = server.server_addr().to_ip().expect("Provided addr is an ip");
        let url = format!("http://{ip}/cover.jpg");
        std::thread::spawn(move || {
            if let Ok(request) = server.recv() {
                let _ = request.respond(response);
            }
        });
        url
    }

    #[tokio::test]
    async fn fetches_bytes_from_a_local_server() {
        let url = serve_once(tiny_http::Response::from_data(b"jpeg-bytes".to_vec()));
        let fetcher = HttpFetcher::new();
        let bytes = fetcher
            .fetch_bytes(&url, Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(&bytes[..], b"jpeg-bytes");
    }

    #[tokio::test]
    async fn maps_404_to_not_found() {
        let url = serve_once(tiny_http::Response::from_data(vec![]).with_status_code(404));
        let fetcher = HttpFetcher::new();
        match fetcher.fetch_bytes(&url, Duration::from_secs(10)).await {
            Err(FetchError::NotFound) => {}
            other => panic!("expected NotFound, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn maps_empty_body_to_empty() {
        let url = serve_once(tiny_http::Response::from_data(vec![]));
        let fetcher = HttpFetcher::new();
        match fetcher.fetch_bytes(&url, Duration::from_secs(10)).await {
            Err(FetchError::Empty) => {}
            other => panic!("expected Empty, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn maps_server_errors_to_status() {
        let url = serve_once(tiny_http::Response::from_data(b"oops".to_vec()).with_status_code(503));
        let fetcher = HttpFetcher::new();
        match fetcher.fetch_bytes(&url, Duration::from_secs(10)).await {
            Err(FetchError::Status(503)) => {}
            other => panic!("expected Status(503), got {other:?}"),
        }
    }
}
