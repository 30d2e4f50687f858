//! Proxy transport errors.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// Failure talking to a backend.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("no destination serves this path")]
    NoRoute,

    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("timed out connecting to {0}")]
    ConnectTimeout(String),

    #[error("invalid TLS server name: {0}")]
    InvalidServerName(String),

    #[error("TLS handshake with {addr} failed: {source}")]
    TlsHandshake {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("timed out during TLS handshake with {0}")]
    TlsTimeout(String),

    #[error("upstream HTTP handshake failed: {0}")]
    Handshake(#[source] hyper::Error),

    #[error("upstream request failed: {0}")]
    Upstream(#[source] hyper::Error),

    #[error("timed out waiting for upstream response")]
    ResponseTimeout,

    #[error("failed to build upstream request: {0}")]
    InvalidRequest(String),

    #[error("failed to read request body: {0}")]
    RequestBody(#[source] axum::Error),

    #[error("FastCGI I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("FastCGI protocol error: {0}")]
    FastCgi(String),

    #[error("backend response exceeds {0} bytes")]
    ResponseTooLarge(usize),
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::ConnectTimeout(_)
            | ProxyError::TlsTimeout(_)
            | ProxyError::ResponseTimeout => StatusCode::GATEWAY_TIMEOUT,
            ProxyError::RequestBody(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = self.status();
        tracing::warn!(error = %self, status = %status, "Backend request failed");
        let reason = status.canonical_reason().unwrap_or("Bad Gateway");
        (status, reason).into_response()
    }
}
