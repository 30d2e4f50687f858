//! Reverse proxy transport.
//!
//! # Responsibilities
//! - Open a fresh connection per request to the route's destination
//! - Negotiate TLS (SNI = inbound host, ALPN `h2`, `http/1.1`) for https apps
//! - Speak HTTP/2 when negotiated, HTTP/1.1 otherwise
//! - Bound connect, TLS handshake and response-head waits
//!
//! # Design Decisions
//! - The destination address is dialled regardless of the Host header, and
//!   the inbound Host is forwarded unchanged
//! - Connections are not pooled; the connection task ends with the response
//!   body, and a dropped handler future cancels in-flight I/O
//! - A failed handshake drops the socket

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, uri::PathAndQuery, HeaderValue, Request, Response, Uri, Version};
use hyper::client::conn::{http1, http2};
use hyper_util::rt::{TokioExecutor, TokioIo};
use rustls::pki_types::ServerName;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;

use crate::config::TimeoutConfig;
use crate::data::InternalScheme;
use crate::proxy::ProxyError;
use crate::security::headers::{prepare_upstream_headers, strip_hop_by_hop};

/// Upstream connection settings shared by all requests.
#[derive(Clone)]
pub struct UpstreamTransport {
    tls: TlsConnector,
    connect_timeout: Duration,
    tls_timeout: Duration,
    idle_timeout: Duration,
}

/// Where and how to send one request.
#[derive(Debug, Clone)]
pub struct UpstreamTarget<'a> {
    pub destination: &'a str,
    pub scheme: InternalScheme,
    /// Inbound host without port; used for SNI and certificate verification.
    pub server_name: &'a str,
    pub client_addr: SocketAddr,
}

impl UpstreamTransport {
    pub fn new(timeouts: &TimeoutConfig) -> Result<Self, rustls::Error> {
        Ok(Self::with_tls_config(timeouts, client_tls_config()?))
    }

    pub fn with_tls_config(timeouts: &TimeoutConfig, tls: rustls::ClientConfig) -> Self {
        Self {
            tls: TlsConnector::from(Arc::new(tls)),
            connect_timeout: Duration::from_secs(timeouts.connect_secs),
            tls_timeout: Duration::from_secs(timeouts.tls_handshake_secs),
            idle_timeout: Duration::from_secs(timeouts.idle_secs),
        }
    }

    /// Forward `req` to the target and return the upstream response.
    pub async fn forward(
        &self,
        req: Request<Body>,
        target: &UpstreamTarget<'_>,
    ) -> Result<Response<Body>, ProxyError> {
        let addr = with_default_port(target.destination, target.scheme);
        let tcp = tokio::time::timeout(self.connect_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| ProxyError::ConnectTimeout(addr.clone()))?
            .map_err(|source| ProxyError::Connect {
                addr: addr.clone(),
                source,
            })?;
        let _ = tcp.set_nodelay(true);

        let mut req = req;
        prepare_upstream_headers(req.headers_mut(), &target.client_addr.ip().to_string());

        let resp = match target.scheme {
            InternalScheme::Http => self.send_http1(tcp, req).await?,
            InternalScheme::Https => {
                let server_name = ServerName::try_from(target.server_name.to_string())
                    .map_err(|_| ProxyError::InvalidServerName(target.server_name.to_string()))?;
                let tls = tokio::time::timeout(self.tls_timeout, self.tls.connect(server_name, tcp))
                    .await
                    .map_err(|_| ProxyError::TlsTimeout(addr.clone()))?
                    .map_err(|source| ProxyError::TlsHandshake {
                        addr: addr.clone(),
                        source,
                    })?;

                let h2 = tls.get_ref().1.alpn_protocol() == Some(b"h2".as_slice());
                if h2 {
                    self.send_http2(tls, req, target.server_name).await?
                } else {
                    self.send_http1(tls, req).await?
                }
            }
        };

        let (mut parts, body) = resp.into_parts();
        strip_hop_by_hop(&mut parts.headers);
        Ok(Response::from_parts(parts, Body::new(body)))
    }

    async fn send_http1<S>(
        &self,
        io: S,
        mut req: Request<Body>,
    ) -> Result<Response<hyper::body::Incoming>, ProxyError>
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
    {
        let (mut sender, conn) = http1::handshake(TokioIo::new(io))
            .await
            .map_err(ProxyError::Handshake)?;
        tokio::spawn(async move {
            if let Err(e) = conn.await {
                tracing::debug!(error = %e, "Upstream HTTP/1 connection closed with error");
            }
        });

        // origin-form for HTTP/1
        let path = path_and_query(req.uri());
        *req.uri_mut() = Uri::from(path);
        *req.version_mut() = Version::HTTP_11;

        self.await_head(sender.send_request(req)).await
    }

    async fn send_http2<S>(
        &self,
        io: S,
        mut req: Request<Body>,
        authority: &str,
    ) -> Result<Response<hyper::body::Incoming>, ProxyError>
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
    {
        let (mut sender, conn) = http2::handshake(TokioExecutor::new(), TokioIo::new(io))
            .await
            .map_err(ProxyError::Handshake)?;
        tokio::spawn(async move {
            if let Err(e) = conn.await {
                tracing::debug!(error = %e, "Upstream HTTP/2 connection closed with error");
            }
        });

        // absolute-form; the inbound Host becomes :authority
        let host = req
            .headers_mut()
            .remove(header::HOST)
            .and_then(|v| v.to_str().map(str::to_string).ok())
            .unwrap_or_else(|| authority.to_string());
        let uri = Uri::builder()
            .scheme("https")
            .authority(host)
            .path_and_query(path_and_query(req.uri()))
            .build()
            .map_err(|e| ProxyError::InvalidRequest(e.to_string()))?;
        *req.uri_mut() = uri;
        *req.version_mut() = Version::HTTP_2;

        self.await_head(sender.send_request(req)).await
    }

    async fn await_head(
        &self,
        fut: impl std::future::Future<Output = Result<Response<hyper::body::Incoming>, hyper::Error>>,
    ) -> Result<Response<hyper::body::Incoming>, ProxyError> {
        tokio::time::timeout(self.idle_timeout, fut)
            .await
            .map_err(|_| ProxyError::ResponseTimeout)?
            .map_err(ProxyError::Upstream)
    }
}

/// Make sure the request carries a Host header before it leaves HTTP/2 framing
/// behind (inbound HTTP/2 requests carry the host in the URI).
pub fn ensure_host_header(req: &mut Request<Body>, host: &str) {
    if !req.headers().contains_key(header::HOST) {
        if let Ok(value) = HeaderValue::from_str(host) {
            req.headers_mut().insert(header::HOST, value);
        }
    }
}

fn path_and_query(uri: &Uri) -> PathAndQuery {
    uri.path_and_query()
        .cloned()
        .unwrap_or_else(|| PathAndQuery::from_static("/"))
}

fn with_default_port(destination: &str, scheme: InternalScheme) -> String {
    let has_port = destination
        .rsplit_once(':')
        .is_some_and(|(_, port)| !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()));
    if has_port {
        return destination.to_string();
    }
    match scheme {
        InternalScheme::Http => format!("{destination}:80"),
        InternalScheme::Https => format!("{destination}:443"),
    }
}

/// Client TLS settings: platform roots, ALPN `h2` then `http/1.1`.
pub fn client_tls_config() -> Result<rustls::ClientConfig, rustls::Error> {
    let mut roots = rustls::RootCertStore::empty();
    let native = rustls_native_certs::load_native_certs();
    for e in &native.errors {
        tracing::warn!(error = %e, "Failed to load a platform root certificate");
    }
    let (added, ignored) = roots.add_parsable_certificates(native.certs);
    tracing::debug!(added, ignored, "Loaded platform root certificates");

    let mut config = rustls::ClientConfig::builder_with_provider(Arc::new(
        rustls::crypto::aws_lc_rs::default_provider(),
    ))
    .with_safe_default_protocol_versions()?
    .with_root_certificates(roots)
    .with_no_client_auth();
    config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn transport(idle_secs: u64) -> UpstreamTransport {
        let timeouts = TimeoutConfig {
            connect_secs: 2,
            tls_handshake_secs: 2,
            idle_secs,
            request_secs: 10,
        };
        let tls = rustls::ClientConfig::builder_with_provider(Arc::new(
            rustls::crypto::aws_lc_rs::default_provider(),
        ))
        .with_safe_default_protocol_versions()
        .unwrap()
        .with_root_certificates(rustls::RootCertStore::empty())
        .with_no_client_auth();
        UpstreamTransport::with_tls_config(&timeouts, tls)
    }

    fn target(destination: &str) -> UpstreamTarget<'_> {
        UpstreamTarget {
            destination,
            scheme: InternalScheme::Http,
            server_name: "www.example.com",
            client_addr: "203.0.113.7:40000".parse().unwrap(),
        }
    }

    #[test]
    fn test_default_port() {
        assert_eq!(with_default_port("10.0.0.1", InternalScheme::Http), "10.0.0.1:80");
        assert_eq!(with_default_port("origin.local", InternalScheme::Https), "origin.local:443");
        assert_eq!(with_default_port("10.0.0.1:8080", InternalScheme::Https), "10.0.0.1:8080");
    }

    #[tokio::test]
    async fn test_forward_http1_preserves_host_and_appends_xff() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let backend = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let n = socket.read(&mut buf).await.unwrap();
            socket
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\nKeep-Alive: timeout=5\r\n\r\nok")
                .await
                .unwrap();
            String::from_utf8_lossy(&buf[..n]).to_string()
        });

        let req = Request::get("http://www.example.com/api?q=1")
            .header(header::HOST, "www.example.com")
            .header("x-forwarded-for", "198.51.100.1")
            .header(header::CONNECTION, "keep-alive")
            .body(Body::empty())
            .unwrap();
        let resp = transport(5).forward(req, &target(&addr)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(resp.headers().get("keep-alive").is_none());

        let raw = backend.await.unwrap().to_ascii_lowercase();
        assert!(raw.starts_with("get /api?q=1 http/1.1"));
        assert!(raw.contains("host: www.example.com"));
        assert!(raw.contains("x-forwarded-for: 198.51.100.1, 203.0.113.7"));
    }

    #[tokio::test]
    async fn test_connection_refused_is_502() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let req = Request::get("/").body(Body::empty()).unwrap();
        let err = transport(5).forward(req, &target(&addr)).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn test_silent_backend_is_504() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
            drop(socket);
        });

        let req = Request::get("/").body(Body::empty()).unwrap();
        let err = transport(1).forward(req, &target(&addr)).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::GATEWAY_TIMEOUT);
    }
}
