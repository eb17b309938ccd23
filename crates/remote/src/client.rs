//! Remote assembly service client.
//!
//! Async HTTP client using `reqwest` with optional Bearer token authentication.

use std::time::Duration;

use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use smartcompress_protocol::{CHECKSUM_HEADER, ChunkUploadQuery, FinalizeRequest};
use smartcompress_transfer::{BoxFuture, RemoteFailure, RemoteService};
use tracing::debug;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Errors from the remote client.
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("invalid API token")]
    InvalidToken,

    #[error("invalid base URL: {0}")]
    InvalidUrl(String),
}

impl From<RemoteError> for RemoteFailure {
    fn from(err: RemoteError) -> Self {
        match err {
            RemoteError::Http(e) if e.is_timeout() => RemoteFailure::Timeout,
            RemoteError::Api { status, body } => RemoteFailure::Status { status, body },
            other => RemoteFailure::Transport(other.to_string()),
        }
    }
}

/// Connection settings for [`HttpRemote`].
#[derive(Debug, Clone)]
pub struct RemoteConfig {
    /// Service root, e.g. `https://compress.example.com/api`.
    pub base_url: String,
    /// Sent as `Authorization: Bearer <token>` when set.
    pub token: Option<String>,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl RemoteConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            token: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// `reqwest`-backed [`RemoteService`].
pub struct HttpRemote {
    http: reqwest::Client,
    base_url: String,
}

impl HttpRemote {
    /// Creates a client for `config`.
    pub fn new(config: &RemoteConfig) -> Result<Self, RemoteError> {
        let base_url = config.base_url.trim_end_matches('/').to_string();
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(RemoteError::InvalidUrl(config.base_url.clone()));
        }

        let mut headers = HeaderMap::new();
        if let Some(token) = config.token.as_deref().filter(|t| !t.is_empty()) {
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {token}"))
                    .map_err(|_| RemoteError::InvalidToken)?,
            );
        }

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(config.timeout)
            .build()?;

        Ok(Self { http, base_url })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Posts one chunk body to `{base}/upload`.
    pub async fn send_chunk(
        &self,
        query: &ChunkUploadQuery,
        checksum: &str,
        data: Vec<u8>,
    ) -> Result<(), RemoteError> {
        let url = format!("{}/upload", self.base_url);
        let size = data.len();
        let resp = self
            .http
            .post(&url)
            .query(query)
            .header(CONTENT_TYPE, "application/octet-stream")
            .header(CHECKSUM_HEADER, checksum)
            .body(data)
            .send()
            .await?;
        check_status(resp).await?;
        debug!(file = %query.filename, chunk = query.chunk_idx, bytes = size, "chunk accepted");
        Ok(())
    }

    /// Posts `{"file_id": ..}` to `{base}/finalize` and returns the artifact.
    pub async fn send_finalize(&self, request: &FinalizeRequest) -> Result<Vec<u8>, RemoteError> {
        let url = format!("{}/finalize", self.base_url);
        let resp = self.http.post(&url).json(request).send().await?;
        let resp = check_status(resp).await?;
        Ok(resp.bytes().await?.to_vec())
    }
}

async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, RemoteError> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(RemoteError::Api {
            status: status.as_u16(),
            body,
        });
    }
    Ok(resp)
}

impl RemoteService for HttpRemote {
    fn upload_chunk(
        &self,
        query: &ChunkUploadQuery,
        checksum: &str,
        data: &[u8],
    ) -> BoxFuture<'_, Result<(), RemoteFailure>> {
        let query = query.clone();
        let checksum = checksum.to_string();
        let data = data.to_vec();
        Box::pin(async move {
            self.send_chunk(&query, &checksum, data)
                .await
                .map_err(RemoteFailure::from)
        })
    }

    fn finalize(&self, request: &FinalizeRequest) -> BoxFuture<'_, Result<Vec<u8>, RemoteFailure>> {
        let request = request.clone();
        Box::pin(async move {
            self.send_finalize(&request)
                .await
                .map_err(RemoteFailure::from)
        })
    }

    fn endpoint(&self) -> &str {
        &self.base_url
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::sync::mpsc;

    /// A request as seen by the mock server.
    struct Captured {
        head: String,
        body: Vec<u8>,
    }

    impl Captured {
        fn header(&self, name: &str) -> Option<String> {
            let prefix = format!("{}:", name.to_lowercase());
            self.head
                .lines()
                .find(|l| l.to_lowercase().starts_with(&prefix))
                .map(|l| l[prefix.len()..].trim().to_string())
        }

        fn request_line(&self) -> &str {
            self.head.lines().next().unwrap_or_default()
        }
    }

    async fn read_request(stream: &mut TcpStream) -> Captured {
        let mut raw = Vec::new();
        let mut buf = [0u8; 8192];
        let header_end = loop {
            let n = stream.read(&mut buf).await.unwrap();
            raw.extend_from_slice(&buf[..n]);
            if let Some(pos) = raw.windows(4).position(|w| w == b"\r\n\r\n") {
                break pos + 4;
            }
            if n == 0 {
                break raw.len();
            }
        };
        let head = String::from_utf8_lossy(&raw[..header_end]).into_owned();
        let mut captured = Captured {
            head,
            body: raw[header_end..].to_vec(),
        };
        let len: usize = captured
            .header("content-length")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        while captured.body.len() < len {
            let n = stream.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            captured.body.extend_from_slice(&buf[..n]);
        }
        captured
    }

    /// Starts a mock HTTP server answering each connection with the next
    /// `(status, body)` pair and forwarding the captured requests.
    async fn mock_server(
        responses: Vec<(u16, Vec<u8>)>,
    ) -> (String, mpsc::UnboundedReceiver<Captured>, tokio::task::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let url = format!("http://127.0.0.1:{port}");
        let (tx, rx) = mpsc::unbounded_channel();

        let handle = tokio::spawn(async move {
            for (status, body) in responses {
                let Ok((mut stream, _)) = listener.accept().await else {
                    return;
                };
                let captured = read_request(&mut stream).await;
                let _ = tx.send(captured);

                let head = format!(
                    "HTTP/1.1 {status} Mock\r\nContent-Type: application/octet-stream\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    body.len()
                );
                let _ = stream.write_all(head.as_bytes()).await;
                let _ = stream.write_all(&body).await;
                let _ = stream.shutdown().await;
            }
        });

        (url, rx, handle)
    }

    fn query() -> ChunkUploadQuery {
        ChunkUploadQuery {
            file_id: "f-123".into(),
            chunk_idx: 2,
            filename: "movie.mkv".into(),
        }
    }

    #[tokio::test]
    async fn upload_sends_query_checksum_and_body() {
        let (url, mut rx, handle) = mock_server(vec![(200, b"ok".to_vec())]).await;
        let mut config = RemoteConfig::new(format!("{url}/"));
        config.token = Some("secret".into());
        let remote = HttpRemote::new(&config).unwrap();

        remote
            .upload_chunk(&query(), "abc123", b"chunk-bytes")
            .await
            .unwrap();

        let req = rx.recv().await.unwrap();
        let line = req.request_line();
        assert!(line.starts_with("POST /upload?"), "{line}");
        assert!(line.contains("file_id=f-123"));
        assert!(line.contains("chunk_idx=2"));
        assert!(line.contains("filename=movie.mkv"));
        assert_eq!(req.header("x-chunk-checksum").as_deref(), Some("abc123"));
        assert_eq!(req.header("authorization").as_deref(), Some("Bearer secret"));
        assert_eq!(
            req.header("content-type").as_deref(),
            Some("application/octet-stream")
        );
        assert_eq!(req.body, b"chunk-bytes");

        handle.abort();
    }

    #[tokio::test]
    async fn upload_error_status_maps_to_failure() {
        let (url, _rx, handle) = mock_server(vec![(503, b"overloaded".to_vec())]).await;
        let remote = HttpRemote::new(&RemoteConfig::new(url)).unwrap();

        let err = remote
            .upload_chunk(&query(), "abc", b"x")
            .await
            .unwrap_err();
        assert_eq!(
            err,
            RemoteFailure::Status {
                status: 503,
                body: "overloaded".into()
            }
        );

        handle.abort();
    }

    #[tokio::test]
    async fn finalize_returns_artifact_bytes() {
        let artifact = vec![0x50, 0x4B, 0x03, 0x04, 0xFF];
        let (url, mut rx, handle) = mock_server(vec![(200, artifact.clone())]).await;
        let remote = HttpRemote::new(&RemoteConfig::new(url)).unwrap();

        let got = remote
            .finalize(&FinalizeRequest {
                file_id: "f-123".into(),
            })
            .await
            .unwrap();
        assert_eq!(got, artifact);

        let req = rx.recv().await.unwrap();
        assert!(req.request_line().starts_with("POST /finalize "));
        assert!(req.header("authorization").is_none());
        let json: serde_json::Value = serde_json::from_slice(&req.body).unwrap();
        assert_eq!(json["file_id"], "f-123");

        handle.abort();
    }

    #[tokio::test]
    async fn finalize_error_mentions_status() {
        let (url, _rx, handle) = mock_server(vec![(500, b"assembly failed".to_vec())]).await;
        let remote = HttpRemote::new(&RemoteConfig::new(url)).unwrap();

        let err = remote
            .send_finalize(&FinalizeRequest {
                file_id: "f".into(),
            })
            .await
            .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("500"), "error should mention 500: {msg}");

        handle.abort();
    }

    #[tokio::test]
    async fn connection_refused_is_transport_failure() {
        // Bind then drop to get a port nobody listens on.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let remote = HttpRemote::new(&RemoteConfig::new(format!("http://127.0.0.1:{port}"))).unwrap();
        let err = remote.upload_chunk(&query(), "c", b"x").await.unwrap_err();
        assert!(matches!(err, RemoteFailure::Transport(_)), "{err:?}");
    }

    #[test]
    fn rejects_non_http_base_url() {
        assert!(matches!(
            HttpRemote::new(&RemoteConfig::new("ftp://example.com")),
            Err(RemoteError::InvalidUrl(_))
        ));
    }

    #[test]
    fn rejects_token_with_newline() {
        let mut config = RemoteConfig::new("https://example.com");
        config.token = Some("bad\ntoken".into());
        assert!(matches!(
            HttpRemote::new(&config),
            Err(RemoteError::InvalidToken)
        ));
    }

    #[test]
    fn trims_trailing_slash() {
        let remote = HttpRemote::new(&RemoteConfig::new("https://example.com/api/")).unwrap();
        assert_eq!(remote.base_url(), "https://example.com/api");
        assert_eq!(remote.endpoint(), "https://example.com/api");
    }
}
