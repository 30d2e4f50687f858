//! The per-request pipeline.
//!
//! # Data Flow
//! ```text
//! Request
//!     → redirect.rs  (domain redirect 301 / unknown host page / HTTPS upgrade 301)
//!     → cdn          (GET of a cacheable asset: serve from cache, maybe gzip)
//!     → client_ip.rs (per-application IP source)
//!     → waf          (CC, then content policies)
//!     → auth         (OAuth login flow for protected applications)
//!     → proxy        (static / FastCGI / reverse proxy)
//! ```
//!
//! Each stage either answers the request or hands it to the next one.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::extract::{ConnectInfo, Extension, State};
use axum::http::{header, Method, Request};
use axum::response::Response;

use crate::auth::{inject_identity, AuthOutcome, AuthRequest, OAuthGate};
use crate::cdn::service::request_head;
use crate::cdn::CdnService;
use crate::domain::resolver::strip_port;
use crate::domain::DomainResolver;
use crate::http::client_ip::client_ip;
use crate::http::redirect::{moved_permanently, route_host, HostRouting};
use crate::observability::metrics;
use crate::proxy::transport::ensure_host_header;
use crate::proxy::{with_kind, Backends, ForwardContext, RouteKind};
use crate::waf::{block_page, Decision, HitInfo, RequestInfo, WafGuard};

/// Everything a request may touch.
pub struct Gateway {
    pub domains: DomainResolver,
    /// Absent when the static cache is disabled.
    pub cdn: Option<CdnService>,
    pub waf: WafGuard,
    pub oauth: OAuthGate,
    pub backends: Backends,
}

/// Which listener accepted the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Listener {
    pub tls: bool,
}

/// Catch-all handler.
pub async fn dispatch(
    State(gateway): State<Arc<Gateway>>,
    Extension(listener): Extension<Listener>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    req: Request<Body>,
) -> Response {
    let start = Instant::now();
    let method = req.method().to_string();

    let resp = gateway.handle(req, peer, listener.tls).await;

    let kind = resp.extensions().get::<RouteKind>().map(|k| k.0).unwrap_or("none");
    metrics::record_request(&method, resp.status().as_u16(), kind, start);
    resp
}

impl Gateway {
    pub async fn handle(&self, mut req: Request<Body>, peer: SocketAddr, tls: bool) -> Response {
        let host = request_host(&req);
        let path = req.uri().path().to_string();
        let query = req.uri().query().map(str::to_string);

        let app = match route_host(self.domains.resolve(&host), &host, &path, query.as_deref(), tls) {
            HostRouting::Redirect(location) => {
                tracing::debug!(host = %host, location = %location, "Redirecting");
                return with_kind(moved_permanently(&location), "redirect");
            }
            HostRouting::UnknownHost => {
                tracing::debug!(host = %host, "Unknown host");
                return with_kind(block_page(&HitInfo::unknown_host()), "unknown_host");
            }
            HostRouting::Proceed { app, .. } => app,
        };

        if let Some(cdn) = &self.cdn {
            if req.method() == Method::GET && cdn.is_cacheable(&path, query.as_deref()) {
                if let Some(resp) = cdn.serve(&app, &host, request_head(&req)).await {
                    return with_kind(resp, "cdn");
                }
            }
        }

        let ip = client_ip(req.headers(), peer, app.client_ip_method);

        let info = RequestInfo {
            method: req.method().clone(),
            host: host.clone(),
            path: path.clone(),
            query: query.clone(),
            headers: req.headers().clone(),
        };
        if let Decision::Respond(resp) = self.waf.evaluate(&info, &app, &ip) {
            return with_kind(resp, "waf");
        }

        if self.oauth.applies_to(&app) {
            let scheme = if tls { "https" } else { "http" };
            let full_url = match &query {
                Some(q) if !q.is_empty() => format!("{scheme}://{host}{path}?{q}"),
                _ => format!("{scheme}://{host}{path}"),
            };
            let auth = AuthRequest {
                client_ip: &ip,
                full_url: &full_url,
                user_agent: info.user_agent(),
                headers: req.headers(),
            };
            match self.oauth.check(&auth, &app) {
                AuthOutcome::Respond(resp) => return with_kind(resp, "oauth"),
                AuthOutcome::Proceed { user_id, access_token } => {
                    inject_identity(req.headers_mut(), &user_id, &access_token);
                }
            }
        }

        ensure_host_header(&mut req, &host);
        let ctx = ForwardContext {
            host: strip_port(&host),
            client_addr: peer,
            tls,
        };
        self.backends.serve(&app, req, &ctx).await
    }
}

/// Host the client asked for: the Host header, else the URI authority
/// (HTTP/2).
pub fn request_host(req: &Request<Body>) -> String {
    req.headers()
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or_else(|| req.uri().authority().map(|a| a.as_str().to_string()))
        .unwrap_or_default()
}
