//! Records exchanged with the data layer.
//!
//! These are the shapes returned by `DataSource` implementations, whether read
//! from the local data file on a primary node or fetched over RPC on a
//! secondary node. They derive Serde traits for both transports.

use serde::{Deserialize, Serialize};

/// Domain row as stored by the data layer.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct DomainRecord {
    pub id: i64,
    pub name: String,
    pub app_id: i64,
    pub cert_id: i64,
    #[serde(default)]
    pub redirect: bool,
    #[serde(default)]
    pub location: String,
}

/// Fields needed to create or update a domain.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct DomainUpdate {
    /// Zero for a new domain.
    #[serde(default)]
    pub id: i64,
    pub name: String,
    pub cert_id: i64,
    #[serde(default)]
    pub redirect: bool,
    #[serde(default)]
    pub location: String,
}

/// Scheme used between the gateway and an application's backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InternalScheme {
    #[default]
    Http,
    Https,
}

impl InternalScheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            InternalScheme::Http => "http",
            InternalScheme::Https => "https",
        }
    }
}

/// Where the client IP is taken from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientIpMethod {
    #[default]
    RemoteAddr,
    XForwardedFor,
    XRealIp,
    RealIp,
}

/// Backend strategy for a destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteType {
    #[default]
    ReverseProxy,
    Static,
    FastCgi,
}

/// One backend target of an application.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Destination {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub route_type: RouteType,
    /// Path prefix this destination answers for, e.g. `/` or `/api/`.
    #[serde(default = "default_request_route")]
    pub request_route: String,
    /// Static root or FastCGI script root.
    #[serde(default)]
    pub backend_route: String,
    /// `host:port` for proxy and FastCGI routes, default document for static routes.
    pub destination: String,
}

fn default_request_route() -> String {
    "/".to_string()
}

/// A tenant application fronted by the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Application {
    pub id: i64,
    #[serde(default)]
    pub name: String,
    pub destinations: Vec<Destination>,
    #[serde(default)]
    pub internal_scheme: InternalScheme,
    #[serde(default)]
    pub waf_enabled: bool,
    #[serde(default)]
    pub oauth_required: bool,
    /// Lifetime of an authenticated session cookie.
    #[serde(default = "default_session_seconds")]
    pub session_seconds: u64,
    #[serde(default)]
    pub client_ip_method: ClientIpMethod,
    #[serde(default)]
    pub redirect_https: bool,
}

fn default_session_seconds() -> u64 {
    7200
}

/// PEM material for a certificate, before parsing.
#[derive(Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct CertificateRecord {
    pub id: i64,
    #[serde(default)]
    pub common_name: String,
    pub cert_content: String,
    pub priv_key_content: String,
}

impl std::fmt::Debug for CertificateRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateRecord")
            .field("id", &self.id)
            .field("common_name", &self.common_name)
            .finish_non_exhaustive()
    }
}
