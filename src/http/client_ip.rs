//! Client address extraction.

use std::net::SocketAddr;

use axum::http::HeaderMap;

use crate::data::ClientIpMethod;

/// Client IP as configured for the application. Empty or missing header
/// values fall back to the socket peer.
pub fn client_ip(headers: &HeaderMap, peer: SocketAddr, method: ClientIpMethod) -> String {
    let from_header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .unwrap_or_default()
            .to_string()
    };

    let ip = match method {
        ClientIpMethod::RemoteAddr => String::new(),
        ClientIpMethod::XForwardedFor => from_header("x-forwarded-for")
            .rsplit(',')
            .next()
            .map(|last| last.trim().to_string())
            .unwrap_or_default(),
        ClientIpMethod::XRealIp => from_header("x-real-ip"),
        ClientIpMethod::RealIp => from_header("real-ip"),
    };

    if ip.is_empty() {
        peer.ip().to_string()
    } else {
        ip
    }
}
