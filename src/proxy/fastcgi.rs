//! FastCGI responder client.
//!
//! # Responsibilities
//! - Map an HTTP request to CGI parameters
//! - Speak the FastCGI record protocol over a fresh TCP connection
//! - Turn the CGI response (headers, blank line, body) into an HTTP response
//!
//! # Design Decisions
//! - One request per connection (`FCGI_KEEP_CONN` unset); the backend closes
//!   the socket after `END_REQUEST`
//! - The request body is buffered before the exchange starts, bounded by the
//!   listener body limit; the CGI output is buffered under the same limit
//! - Records with another version or request id end the exchange with a 502
//! - Every socket operation is bounded by the idle timeout

use std::net::SocketAddr;
use std::time::Duration;

use axum::body::Body;
use axum::http::{HeaderName, HeaderValue, Request, Response, StatusCode};
use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::data::Destination;
use crate::proxy::ProxyError;

const VERSION: u8 = 1;
const BEGIN_REQUEST: u8 = 1;
const END_REQUEST: u8 = 3;
const PARAMS: u8 = 4;
const STDIN: u8 = 5;
const STDOUT: u8 = 6;
const STDERR: u8 = 7;
const ROLE_RESPONDER: u16 = 1;
const REQUEST_ID: u16 = 1;
const MAX_CONTENT: usize = 65535;

/// Per-request values that do not come from the HTTP request itself.
#[derive(Debug, Clone)]
pub struct CgiContext {
    pub client_addr: SocketAddr,
    pub server_name: String,
    pub tls: bool,
}

/// FastCGI strategy settings.
#[derive(Debug, Clone, Copy)]
pub struct FastCgiClient {
    pub connect_timeout: Duration,
    pub idle_timeout: Duration,
    pub max_body_bytes: usize,
}

impl FastCgiClient {
    pub async fn forward(
        &self,
        dest: &Destination,
        req: Request<Body>,
        ctx: &CgiContext,
    ) -> Result<Response<Body>, ProxyError> {
        let (parts, body) = req.into_parts();
        let body = axum::body::to_bytes(body, self.max_body_bytes)
            .await
            .map_err(ProxyError::RequestBody)?;

        let script_path = script_path(&dest.request_route, parts.uri.path());
        let params = build_params(&parts, &body, dest, &script_path, ctx);

        let addr = dest.destination.clone();
        let mut stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| ProxyError::ConnectTimeout(addr.clone()))?
            .map_err(|source| ProxyError::Connect {
                addr: addr.clone(),
                source,
            })?;

        tracing::debug!(backend = %addr, script = %params_script(&params), "FastCGI request");

        let request = encode_request(&params, &body);
        self.bounded(stream.write_all(&request)).await?;
        self.bounded(stream.flush()).await?;

        let stdout = self.read_response(&mut stream).await?;
        parse_cgi_response(stdout)
    }

    async fn bounded<T>(
        &self,
        fut: impl std::future::Future<Output = std::io::Result<T>>,
    ) -> Result<T, ProxyError> {
        tokio::time::timeout(self.idle_timeout, fut)
            .await
            .map_err(|_| ProxyError::ResponseTimeout)?
            .map_err(ProxyError::Io)
    }

    async fn read_response<S>(&self, stream: &mut S) -> Result<BytesMut, ProxyError>
    where
        S: AsyncRead + Unpin,
    {
        let mut stdout = BytesMut::new();
        loop {
            let mut header = [0u8; 8];
            self.bounded(stream.read_exact(&mut header)).await?;
            if header[0] != VERSION {
                return Err(ProxyError::FastCgi(format!("unsupported version {}", header[0])));
            }
            let record_type = header[1];
            let request_id = u16::from_be_bytes([header[2], header[3]]);
            if request_id != REQUEST_ID {
                return Err(ProxyError::FastCgi(format!("unexpected request id {request_id}")));
            }
            let content_len = u16::from_be_bytes([header[4], header[5]]) as usize;
            let padding_len = header[6] as usize;

            let mut content = vec![0u8; content_len + padding_len];
            self.bounded(stream.read_exact(&mut content)).await?;
            content.truncate(content_len);

            match record_type {
                STDOUT => {
                    if stdout.len() + content.len() > self.max_body_bytes {
                        return Err(ProxyError::ResponseTooLarge(self.max_body_bytes));
                    }
                    stdout.extend_from_slice(&content);
                }
                STDERR => {
                    tracing::warn!(stderr = %String::from_utf8_lossy(&content), "FastCGI stderr");
                }
                END_REQUEST => return Ok(stdout),
                other => {
                    return Err(ProxyError::FastCgi(format!("unexpected record type {other}")));
                }
            }
        }
    }
}

/// Script path seen by the backend: the matched prefix is replaced by `/`.
pub fn script_path(request_route: &str, path: &str) -> String {
    match path.strip_prefix(request_route) {
        Some(rest) if request_route != "/" => format!("/{}", rest.trim_start_matches('/')),
        _ => path.to_string(),
    }
}

fn build_params(
    parts: &axum::http::request::Parts,
    body: &Bytes,
    dest: &Destination,
    script_path: &str,
    ctx: &CgiContext,
) -> Vec<(String, String)> {
    let uri = &parts.uri;
    let request_uri = uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| uri.path().to_string());
    let content_type = parts
        .headers
        .get(axum::http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    let mut params = vec![
        ("GATEWAY_INTERFACE".to_string(), "CGI/1.1".to_string()),
        ("SERVER_SOFTWARE".to_string(), "waf-gateway".to_string()),
        ("SERVER_PROTOCOL".to_string(), format!("{:?}", parts.version)),
        ("SERVER_NAME".to_string(), ctx.server_name.clone()),
        ("REQUEST_METHOD".to_string(), parts.method.to_string()),
        ("REQUEST_URI".to_string(), request_uri),
        ("QUERY_STRING".to_string(), uri.query().unwrap_or_default().to_string()),
        ("DOCUMENT_ROOT".to_string(), dest.backend_route.clone()),
        ("DOCUMENT_URI".to_string(), script_path.to_string()),
        ("SCRIPT_NAME".to_string(), script_path.to_string()),
        (
            "SCRIPT_FILENAME".to_string(),
            format!("{}{}", dest.backend_route, script_path),
        ),
        ("REMOTE_ADDR".to_string(), ctx.client_addr.ip().to_string()),
        ("REMOTE_PORT".to_string(), ctx.client_addr.port().to_string()),
        ("CONTENT_TYPE".to_string(), content_type.to_string()),
        ("CONTENT_LENGTH".to_string(), body.len().to_string()),
    ];
    if ctx.tls {
        params.push(("HTTPS".to_string(), "on".to_string()));
    }

    for (name, value) in parts.headers.iter() {
        if name == axum::http::header::CONTENT_TYPE || name == axum::http::header::CONTENT_LENGTH {
            continue;
        }
        let Ok(value) = value.to_str() else { continue };
        let key = format!("HTTP_{}", name.as_str().to_ascii_uppercase().replace('-', "_"));
        match params.iter_mut().find(|(k, _)| *k == key) {
            Some((_, existing)) => {
                existing.push_str(", ");
                existing.push_str(value);
            }
            None => params.push((key, value.to_string())),
        }
    }
    params
}

fn params_script(params: &[(String, String)]) -> &str {
    params
        .iter()
        .find(|(k, _)| k == "SCRIPT_FILENAME")
        .map(|(_, v)| v.as_str())
        .unwrap_or_default()
}

fn put_record(buf: &mut BytesMut, record_type: u8, content: &[u8]) {
    let padding = (8 - content.len() % 8) % 8;
    buf.put_u8(VERSION);
    buf.put_u8(record_type);
    buf.put_u16(REQUEST_ID);
    buf.put_u16(content.len() as u16);
    buf.put_u8(padding as u8);
    buf.put_u8(0);
    buf.put_slice(content);
    buf.put_bytes(0, padding);
}

fn put_length(buf: &mut Vec<u8>, len: usize) {
    if len < 128 {
        buf.push(len as u8);
    } else {
        buf.extend_from_slice(&((len as u32) | 0x8000_0000).to_be_bytes());
    }
}

fn encode_params(params: &[(String, String)]) -> Vec<u8> {
    let mut out = Vec::new();
    for (name, value) in params {
        put_length(&mut out, name.len());
        put_length(&mut out, value.len());
        out.extend_from_slice(name.as_bytes());
        out.extend_from_slice(value.as_bytes());
    }
    out
}

/// Serialize a full responder request: begin, params, stdin.
fn encode_request(params: &[(String, String)], body: &[u8]) -> BytesMut {
    let mut buf = BytesMut::with_capacity(1024 + body.len());

    let mut begin = [0u8; 8];
    begin[..2].copy_from_slice(&ROLE_RESPONDER.to_be_bytes());
    put_record(&mut buf, BEGIN_REQUEST, &begin);

    let encoded = encode_params(params);
    for chunk in encoded.chunks(MAX_CONTENT) {
        put_record(&mut buf, PARAMS, chunk);
    }
    put_record(&mut buf, PARAMS, &[]);

    for chunk in body.chunks(MAX_CONTENT) {
        put_record(&mut buf, STDIN, chunk);
    }
    put_record(&mut buf, STDIN, &[]);
    buf
}

/// Split CGI output into status, headers and body.
pub fn parse_cgi_response(mut stdout: BytesMut) -> Result<Response<Body>, ProxyError> {
    let (head_len, sep_len) = match find(&stdout, b"\r\n\r\n") {
        Some(i) => (i, 4),
        None => match find(&stdout, b"\n\n") {
            Some(i) => (i, 2),
            None => return Err(ProxyError::FastCgi("missing CGI header terminator".into())),
        },
    };
    let head = stdout.split_to(head_len);
    let _ = stdout.split_to(sep_len);
    let head = String::from_utf8_lossy(&head);

    let mut builder = Response::builder();
    let mut status = None;
    let mut has_location = false;
    for line in head.lines() {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        if name.eq_ignore_ascii_case("status") {
            let code = value.split_whitespace().next().unwrap_or_default();
            status = code.parse::<u16>().ok().and_then(|c| StatusCode::from_u16(c).ok());
            continue;
        }
        if name.eq_ignore_ascii_case("location") {
            has_location = true;
        }
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.trim().as_bytes()),
            HeaderValue::from_str(value),
        ) {
            builder = builder.header(name, value);
        }
    }

    let status = status.unwrap_or(if has_location {
        StatusCode::FOUND
    } else {
        StatusCode::OK
    });

    builder
        .status(status)
        .body(Body::from(stdout.freeze()))
        .map_err(|e| ProxyError::FastCgi(e.to_string()))
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}
