//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for the gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener configuration (bind addresses, body limit).
    pub listener: ListenerConfig,

    /// Node role and data source.
    pub node: NodeConfig,

    /// Pull-through static asset cache.
    pub cdn: CdnConfig,

    /// WAF settings shared by all applications.
    pub waf: WafConfig,

    /// OAuth login for protected applications.
    pub oauth: OAuthConfig,

    /// Session cookie signing.
    pub session: SessionConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Plaintext bind address (e.g., "0.0.0.0:80").
    pub http_address: String,

    /// TLS bind address. Certificates come from the domain table.
    pub https_address: Option<String>,

    /// Maximum request body accepted from clients.
    pub max_body_bytes: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            http_address: "0.0.0.0:8080".to_string(),
            https_address: None,
            max_body_bytes: 10 * 1024 * 1024,
        }
    }
}

/// Role of this node in a deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    /// Owns the data file.
    #[default]
    Primary,
    /// Reads everything from a primary node over RPC.
    Secondary,
}

/// Node role and data source configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct NodeConfig {
    pub role: NodeRole,

    /// JSON data file (primary nodes).
    pub data_file: String,

    /// Reload when the data file changes (primary nodes).
    pub watch_data_file: bool,

    /// RPC endpoint of the primary node (secondary nodes).
    pub rpc_url: String,

    /// Shared key presented to the primary node.
    pub rpc_key: String,

    /// RPC request timeout in seconds.
    pub rpc_timeout_secs: u64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            role: NodeRole::Primary,
            data_file: "./data.json".to_string(),
            watch_data_file: true,
            rpc_url: String::new(),
            rpc_key: String::new(),
            rpc_timeout_secs: 10,
        }
    }
}

/// Static asset cache configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CdnConfig {
    pub enabled: bool,

    /// Cache root; assets land in `<root>/<app id>/<path>`.
    pub root: String,

    /// Extensions eligible for caching.
    pub extensions: Vec<String>,

    /// Origin content types accepted into the cache.
    pub accepted_content_types: Vec<String>,

    /// Origin fetch timeout in seconds.
    pub fetch_timeout_secs: u64,

    /// Page served for unsafe cache paths.
    pub warning_page: String,

    /// Compressors kept in the gzip pool.
    pub gzip_pool_size: usize,
}

impl Default for CdnConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            root: "./cdn_static_files".to_string(),
            extensions: ["js", "css", "png", "svg", "jpg", "jpeg", "ttf", "otf"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            accepted_content_types: [
                "image/png",
                "image/jpeg",
                "image/svg+xml",
                "text/css",
                "text/css; charset=utf-8",
                "application/javascript",
                "binary/octet-stream",
                "application/octet-stream",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            fetch_timeout_secs: 30,
            warning_page: "./cdn_static_files/warning.html".to_string(),
            gzip_pool_size: 64,
        }
    }
}

/// WAF configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WafConfig {
    /// Where challenged clients are sent, with `?id=<client id>` appended.
    pub captcha_entrance: String,

    /// Extensions treated as static resources and skipped by the WAF.
    pub static_extensions: Vec<String>,

    /// Sweep interval for idle CC counters and expired challenges.
    pub sweep_interval_secs: u64,
}

impl Default for WafConfig {
    fn default() -> Self {
        Self {
            captcha_entrance: "/captcha/get".to_string(),
            static_extensions: [
                "js", "css", "png", "jpg", "jpeg", "gif", "bmp", "ico", "svg", "webp", "woff",
                "woff2", "ttf", "otf", "eot", "map",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            sweep_interval_secs: 60,
        }
    }
}

/// OAuth configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct OAuthConfig {
    pub enabled: bool,

    /// One of `wxwork`, `dingtalk`, `feishu`, `ldap`.
    pub provider: String,

    /// Lifetime of a pending login in seconds.
    pub state_ttl_secs: u64,

    /// Sweep interval for expired pending logins.
    pub sweep_interval_secs: u64,

    pub wxwork: WxWorkConfig,
    pub dingtalk: DingTalkConfig,
    pub feishu: FeishuConfig,
    pub ldap: LdapConfig,
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            provider: "ldap".to_string(),
            state_ttl_secs: 300,
            sweep_interval_secs: 600,
            wxwork: WxWorkConfig::default(),
            dingtalk: DingTalkConfig::default(),
            feishu: FeishuConfig::default(),
            ldap: LdapConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct WxWorkConfig {
    pub corp_id: String,
    pub agent_id: String,
    pub callback: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct DingTalkConfig {
    pub app_id: String,
    pub callback: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct FeishuConfig {
    pub app_id: String,
    pub callback: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LdapConfig {
    /// Login page path.
    pub entrance: String,
}

impl Default for LdapConfig {
    fn default() -> Self {
        Self {
            entrance: "/ldap/login".to_string(),
        }
    }
}

/// Session cookie configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionConfig {
    /// HMAC key for the session cookie. A random key is generated when empty,
    /// which logs everyone out on restart.
    pub secret: String,
}

/// Timeout configuration for various operations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Upstream connection establishment timeout in seconds.
    pub connect_secs: u64,

    /// Upstream TLS handshake timeout in seconds.
    pub tls_handshake_secs: u64,

    /// Wait for upstream response headers, and FastCGI I/O, in seconds.
    pub idle_secs: u64,

    /// End-to-end request deadline in seconds.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: 10,
            tls_handshake_secs: 10,
            idle_secs: 30,
            request_secs: 120,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
