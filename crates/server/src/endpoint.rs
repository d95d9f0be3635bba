//! HTTP serving endpoint
//!
//! Serves `GET /blobs/<hex key>?offset=..&length=..` to local clients
//! and peers, authenticated with the cluster's shared bearer token.
//! Each request is handled independently on its own task.

use crate::error::{Result, ServerError};
use crate::metrics::{BYTES_SERVED, READ_LATENCY, READ_REQUESTS, UNAUTHORIZED_REQUESTS};
use bytes::Bytes;
use http_body_util::Full;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{header, Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use peercache_fetch::{BlobReader, FetchError};
use peercache_types::BlobKey;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

/// Serving endpoint configuration
#[derive(Debug, Clone)]
pub struct ServeConfig {
    /// Listen address, e.g. `0.0.0.0:19145`
    pub listen: SocketAddr,
    /// Shared cluster credential; empty disables authentication
    pub auth_token: String,
    /// This node's reachable address, advertised so sibling selectors
    /// can designate it as a candidate
    pub advertise_addr: String,
}

struct AppState {
    reader: Arc<dyn BlobReader>,
    auth_token: String,
    advertise_addr: String,
}

/// HTTP server for blob range reads
pub struct BlobServer {
    listener: TcpListener,
    state: Arc<AppState>,
}

impl BlobServer {
    /// Bind the listener. Serving starts with [`run`](Self::run).
    pub async fn bind(config: ServeConfig, reader: Arc<dyn BlobReader>) -> Result<Self> {
        if config.advertise_addr.is_empty() {
            return Err(ServerError::Config(
                "advertise_addr cannot be empty".to_string(),
            ));
        }
        if config.auth_token.is_empty() {
            warn!("no auth token configured, serving unauthenticated");
        }

        let listener = TcpListener::bind(config.listen).await?;
        info!(
            listen = %listener.local_addr()?,
            advertise = %config.advertise_addr,
            "serving endpoint listening"
        );

        Ok(Self {
            listener,
            state: Arc::new(AppState {
                reader,
                auth_token: config.auth_token,
                advertise_addr: config.advertise_addr,
            }),
        })
    }

    /// The bound listen address (useful when binding port 0).
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// The address this node advertises to sibling selectors.
    pub fn advertised_addr(&self) -> &str {
        &self.state.advertise_addr
    }

    /// Accept loop; runs until the listener fails.
    pub async fn run(self) -> Result<()> {
        loop {
            let (stream, remote) = self.listener.accept().await?;
            let io = TokioIo::new(stream);
            let state = Arc::clone(&self.state);

            tokio::spawn(async move {
                let service = service_fn(move |req| {
                    let state = Arc::clone(&state);
                    async move { Ok::<_, Infallible>(handle_request(req, state).await) }
                });
                if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                    debug!(remote = %remote, error = %err, "connection error");
                }
            });
        }
    }
}

async fn handle_request<B>(req: Request<B>, state: Arc<AppState>) -> Response<Full<Bytes>> {
    let path = req.uri().path().to_string();
    match (req.method(), path.as_str()) {
        (&Method::GET, "/healthz") => text_response(StatusCode::OK, "ok"),
        (&Method::GET, "/metrics") => metrics_response(),
        (&Method::GET, p) if p.starts_with("/blobs/") => handle_read(req, state).await,
        _ => text_response(StatusCode::NOT_FOUND, "no such route"),
    }
}

async fn handle_read<B>(req: Request<B>, state: Arc<AppState>) -> Response<Full<Bytes>> {
    READ_REQUESTS.inc();
    let started = Instant::now();

    if !authorized(&req, &state.auth_token) {
        UNAUTHORIZED_REQUESTS.inc();
        return text_response(StatusCode::UNAUTHORIZED, "invalid or missing credential");
    }

    let hex_key = req.uri().path().trim_start_matches("/blobs/");
    let Some(blob) = decode_blob_key(hex_key) else {
        return text_response(StatusCode::BAD_REQUEST, "blob key must be hex-encoded");
    };

    let Some((offset, length)) = parse_range_query(req.uri().query().unwrap_or("")) else {
        return text_response(
            StatusCode::BAD_REQUEST,
            "offset and length query parameters are required",
        );
    };
    if offset.checked_add(length).is_none() {
        return text_response(StatusCode::BAD_REQUEST, "offset plus length overflows");
    }

    match state.reader.read_range(&blob, offset, length).await {
        Ok(body) => {
            BYTES_SERVED.inc_by(body.len() as f64);
            READ_LATENCY.observe(started.elapsed().as_secs_f64());
            debug!(blob = %blob, offset, length, bytes = body.len(), "served range");
            bytes_response(StatusCode::OK, body)
        }
        Err(e) => {
            debug!(blob = %blob, offset, length, error = %e, "read failed");
            let status = match e {
                FetchError::NotFound => StatusCode::NOT_FOUND,
                FetchError::ExhaustedSources { .. } => StatusCode::BAD_GATEWAY,
                FetchError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            };
            text_response(status, &e.to_string())
        }
    }
}

/// Constant shared-credential check. An empty configured token
/// disables authentication (testnet-style deployments).
fn authorized<B>(req: &Request<B>, token: &str) -> bool {
    if token.is_empty() {
        return true;
    }
    let expected = format!("Bearer {token}");
    req.headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(|v| v == expected)
        .unwrap_or(false)
}

fn decode_blob_key(hex_key: &str) -> Option<BlobKey> {
    let raw = hex::decode(hex_key).ok()?;
    let key = String::from_utf8(raw).ok()?;
    if key.is_empty() {
        return None;
    }
    Some(BlobKey::new(key))
}

/// Parse `offset=<u64>&length=<u64>`; both are required.
fn parse_range_query(query: &str) -> Option<(u64, u64)> {
    let mut offset = None;
    let mut length = None;
    for pair in query.split('&') {
        match pair.split_once('=') {
            Some(("offset", v)) => offset = v.parse::<u64>().ok(),
            Some(("length", v)) => length = v.parse::<u64>().ok(),
            _ => {}
        }
    }
    Some((offset?, length?))
}

fn metrics_response() -> Response<Full<Bytes>> {
    use prometheus::{Encoder, TextEncoder};

    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        warn!(error = %e, "failed to encode metrics");
        return text_response(StatusCode::INTERNAL_SERVER_ERROR, "encode failure");
    }
    bytes_response(StatusCode::OK, Bytes::from(buffer))
}

fn text_response(status: StatusCode, body: &str) -> Response<Full<Bytes>> {
    bytes_response(status, Bytes::from(body.to_string()))
}

fn bytes_response(status: StatusCode, body: Bytes) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body));
    *response.status_mut() = status;
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use peercache_fetch::Result as FetchResult;

    struct MockReader {
        result: std::result::Result<Vec<u8>, FetchError>,
    }

    #[async_trait]
    impl BlobReader for MockReader {
        async fn read_range(&self, _: &BlobKey, _: u64, _: u64) -> FetchResult<Bytes> {
            self.result.clone().map(Bytes::from)
        }
    }

    fn state(token: &str, result: std::result::Result<Vec<u8>, FetchError>) -> Arc<AppState> {
        Arc::new(AppState {
            reader: Arc::new(MockReader { result }),
            auth_token: token.to_string(),
            advertise_addr: "10.0.0.1:19145".to_string(),
        })
    }

    fn read_request(token: Option<&str>, path_and_query: &str) -> Request<()> {
        let mut builder = Request::builder()
            .method(Method::GET)
            .uri(path_and_query);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        builder.body(()).unwrap()
    }

    fn blob_path(key: &str, offset: u64, length: u64) -> String {
        format!(
            "/blobs/{}?offset={}&length={}",
            hex::encode(key.as_bytes()),
            offset,
            length
        )
    }

    #[tokio::test]
    async fn test_read_happy_path() {
        let state = state("secret", Ok(b"payload".to_vec()));
        let req = read_request(Some("secret"), &blob_path("sha256:x", 0, 7));
        let resp = handle_request(req, state).await;
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_missing_token_is_unauthorized() {
        let state = state("secret", Ok(b"payload".to_vec()));
        let req = read_request(None, &blob_path("sha256:x", 0, 7));
        let resp = handle_request(req, state).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_wrong_token_is_unauthorized() {
        let state = state("secret", Ok(b"payload".to_vec()));
        let req = read_request(Some("wrong"), &blob_path("sha256:x", 0, 7));
        let resp = handle_request(req, state).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_empty_token_disables_auth() {
        let state = state("", Ok(b"payload".to_vec()));
        let req = read_request(None, &blob_path("sha256:x", 0, 7));
        let resp = handle_request(req, state).await;
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_malformed_key_is_bad_request() {
        let state = state("secret", Ok(vec![]));
        let req = read_request(Some("secret"), "/blobs/zz-not-hex?offset=0&length=1");
        let resp = handle_request(req, state).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_missing_params_is_bad_request() {
        let state = state("secret", Ok(vec![]));
        let hex_key = hex::encode("sha256:x");
        let req = read_request(Some("secret"), &format!("/blobs/{hex_key}?offset=0"));
        let resp = handle_request(req, state).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_overflowing_range_is_bad_request() {
        let state = state("secret", Ok(vec![]));
        let req = read_request(Some("secret"), &blob_path("sha256:x", u64::MAX - 1, 3));
        let resp = handle_request(req, state).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_not_found_maps_to_404() {
        let state = state("secret", Err(FetchError::NotFound));
        let req = read_request(Some("secret"), &blob_path("sha256:x", 0, 7));
        let resp = handle_request(req, state).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_exhausted_maps_to_502() {
        let state = state(
            "secret",
            Err(FetchError::ExhaustedSources {
                last_error: "connection refused".to_string(),
            }),
        );
        let req = read_request(Some("secret"), &blob_path("sha256:x", 0, 7));
        let resp = handle_request(req, state).await;
        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn test_health_route() {
        let state = state("secret", Ok(vec![]));
        let req = Request::builder()
            .method(Method::GET)
            .uri("/healthz")
            .body(())
            .unwrap();
        let resp = handle_request(req, state).await;
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[test]
    fn test_parse_range_query() {
        assert_eq!(parse_range_query("offset=0&length=10"), Some((0, 10)));
        assert_eq!(parse_range_query("length=10&offset=5"), Some((5, 10)));
        assert_eq!(parse_range_query("offset=0"), None);
        assert_eq!(parse_range_query("offset=x&length=10"), None);
        assert_eq!(parse_range_query(""), None);
    }
}
