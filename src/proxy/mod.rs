//! Backend route selection and proxy strategies.
//!
//! # Data Flow
//! ```text
//! (Application, path)
//!     → route.rs (longest request_route prefix, ties round-robin)
//!     → Static      → static_files.rs (ServeDir / default document)
//!     → FastCgi     → fastcgi.rs (responder over a fresh TCP connection)
//!     → ReverseProxy→ transport.rs (fresh connection, TLS + ALPN, h2/http1)
//! ```
//!
//! # Design Decisions
//! - Exactly one strategy serves a request
//! - Transport failures become 502, timeouts 504

pub mod error;
pub mod fastcgi;
pub mod route;
pub mod static_files;
pub mod transport;

use std::net::SocketAddr;

use axum::body::Body;
use axum::http::Request;
use axum::response::{IntoResponse, Response};

use crate::data::{Application, RouteType};

pub use error::ProxyError;
pub use fastcgi::{CgiContext, FastCgiClient};
pub use route::RouteSelector;
pub use transport::{UpstreamTarget, UpstreamTransport};

/// The three backend strategies behind one entry point.
pub struct Backends {
    pub routes: RouteSelector,
    pub fastcgi: FastCgiClient,
    pub transport: UpstreamTransport,
}

/// Connection facts the strategies need besides the request.
#[derive(Debug, Clone)]
pub struct ForwardContext<'a> {
    /// Inbound host without port.
    pub host: &'a str,
    pub client_addr: SocketAddr,
    pub tls: bool,
}

impl Backends {
    /// Pick the destination for `req` and hand it to that destination's
    /// strategy. The response carries a [`RouteKind`] extension.
    pub async fn serve(&self, app: &Application, req: Request<Body>, ctx: &ForwardContext<'_>) -> Response {
        let Some(dest) = self.routes.select(app, req.uri().path()) else {
            tracing::warn!(app_id = app.id, path = %req.uri().path(), "No destination matched");
            return with_kind(ProxyError::NoRoute.into_response(), "none");
        };

        match dest.route_type {
            RouteType::Static => with_kind(static_files::serve_static(dest, req).await, "static"),
            RouteType::FastCgi => {
                let cgi = CgiContext {
                    client_addr: ctx.client_addr,
                    server_name: ctx.host.to_string(),
                    tls: ctx.tls,
                };
                let resp = match self.fastcgi.forward(dest, req, &cgi).await {
                    Ok(resp) => resp,
                    Err(e) => e.into_response(),
                };
                with_kind(resp, "fastcgi")
            }
            RouteType::ReverseProxy => {
                let target = UpstreamTarget {
                    destination: &dest.destination,
                    scheme: app.internal_scheme,
                    server_name: ctx.host,
                    client_addr: ctx.client_addr,
                };
                let resp = match self.transport.forward(req, &target).await {
                    Ok(resp) => resp,
                    Err(e) => e.into_response(),
                };
                with_kind(resp, "proxy")
            }
        }
    }
}

/// Which strategy produced a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteKind(pub &'static str);

/// Tag a response with the stage that produced it.
pub fn with_kind(mut resp: Response, kind: &'static str) -> Response {
    resp.extensions_mut().insert(RouteKind(kind));
    resp
}
