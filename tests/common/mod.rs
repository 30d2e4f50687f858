//! Shared utilities for integration testing.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{HeaderMap, Request, StatusCode};
use axum::response::Response;
use axum::Router;
use http_body_util::BodyExt;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tower::ServiceExt;

use waf_gateway::data::file::DataSnapshot;
use waf_gateway::data::FileDataSource;
use waf_gateway::lifecycle::startup::DataHandle;
use waf_gateway::lifecycle::Runtime;
use waf_gateway::waf::PolicyMatcher;
use waf_gateway::{GatewayConfig, HttpServer};

/// Address the gateway sees as the client.
pub const CLIENT: &str = "203.0.113.7:40000";

/// A request as seen by a mock backend.
#[derive(Debug, Clone)]
pub struct Recorded {
    pub path_and_query: String,
    pub headers: HeaderMap,
}

/// Mock backend that records every request and answers with a fixed reply.
pub struct MockBackend {
    pub addr: SocketAddr,
    hits: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<Recorded>>>,
}

impl MockBackend {
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().unwrap().clone()
    }
}

/// Start a mock backend on an ephemeral port.
pub async fn start_mock_backend(
    status: StatusCode,
    content_type: &'static str,
    body: &'static str,
) -> MockBackend {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let hits = Arc::new(AtomicUsize::new(0));
    let requests = Arc::new(Mutex::new(Vec::new()));

    let app = {
        let hits = hits.clone();
        let requests = requests.clone();
        Router::new().fallback(move |req: Request<Body>| {
            let hits = hits.clone();
            let requests = requests.clone();
            async move {
                hits.fetch_add(1, Ordering::SeqCst);
                requests.lock().unwrap().push(Recorded {
                    path_and_query: req
                        .uri()
                        .path_and_query()
                        .map(|p| p.as_str().to_string())
                        .unwrap_or_default(),
                    headers: req.headers().clone(),
                });
                Response::builder()
                    .status(status)
                    .header("content-type", content_type)
                    .body(Body::from(body))
                    .unwrap()
            }
        })
    };

    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    MockBackend {
        addr,
        hits,
        requests,
    }
}

/// Data set with the given domains, applications and policies.
pub fn snapshot(value: serde_json::Value) -> DataSnapshot {
    serde_json::from_value(value).unwrap()
}

/// Gateway configuration with the static cache rooted in `dir`.
pub fn config(dir: &TempDir) -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.cdn.root = dir.path().join("cache").to_string_lossy().into_owned();
    config.cdn.warning_page = dir.path().join("warning.html").to_string_lossy().into_owned();
    config.session.secret = "integration-secret".to_string();
    config.observability.metrics_enabled = false;
    config.oauth.enabled = true;
    config.oauth.provider = "ldap".to_string();
    config.timeouts.connect_secs = 2;
    config.timeouts.idle_secs = 2;
    config
}

/// A loaded gateway plus the router clients talk to.
pub struct TestGateway {
    pub runtime: Arc<Runtime>,
    pub router: Router,
    pub dir: TempDir,
}

impl TestGateway {
    pub async fn start(
        config: GatewayConfig,
        dir: TempDir,
        data: DataSnapshot,
        matcher: Arc<dyn PolicyMatcher>,
    ) -> Self {
        let handle = DataHandle {
            source: Arc::new(FileDataSource::in_memory(data)),
            file: None,
        };
        let runtime = Arc::new(Runtime::build(&config, handle, matcher).unwrap());
        runtime.reload().await;
        let router = HttpServer::build_router(&config, runtime.gateway.clone(), false);
        Self {
            runtime,
            router,
            dir,
        }
    }

    /// Send a request as if it arrived from [`CLIENT`].
    pub async fn send(&self, mut req: Request<Body>) -> Response {
        let peer: SocketAddr = CLIENT.parse().unwrap();
        req.extensions_mut().insert(ConnectInfo(peer));
        self.router.clone().oneshot(req).await.unwrap()
    }
}

/// GET `path` on `host`.
pub fn get(host: &str, path: &str) -> Request<Body> {
    Request::get(path)
        .header("host", host)
        .header("user-agent", "integration-test")
        .body(Body::empty())
        .unwrap()
}

pub async fn body_bytes(resp: Response) -> bytes::Bytes {
    resp.into_body().collect().await.unwrap().to_bytes()
}

pub async fn body_string(resp: Response) -> String {
    String::from_utf8_lossy(&body_bytes(resp).await).into_owned()
}
