//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate bind addresses and value ranges (timeouts > 0)
//! - Check that the selected node role has what it needs
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GatewayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use crate::config::schema::{GatewayConfig, NodeRole};

const PROVIDERS: [&str; 4] = ["wxwork", "dingtalk", "feishu", "ldap"];

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

/// Check a parsed configuration, collecting every problem found.
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.http_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.http_address",
            format!("invalid socket address '{}'", config.listener.http_address),
        ));
    }
    if let Some(addr) = &config.listener.https_address {
        if addr.parse::<SocketAddr>().is_err() {
            errors.push(ValidationError::new(
                "listener.https_address",
                format!("invalid socket address '{}'", addr),
            ));
        }
    }

    match config.node.role {
        NodeRole::Primary if config.node.data_file.trim().is_empty() => {
            errors.push(ValidationError::new("node.data_file", "required on a primary node"));
        }
        NodeRole::Secondary => {
            if url::Url::parse(&config.node.rpc_url).is_err() {
                errors.push(ValidationError::new(
                    "node.rpc_url",
                    format!("invalid URL '{}'", config.node.rpc_url),
                ));
            }
        }
        _ => {}
    }

    let timeouts = [
        ("timeouts.connect_secs", config.timeouts.connect_secs),
        ("timeouts.tls_handshake_secs", config.timeouts.tls_handshake_secs),
        ("timeouts.idle_secs", config.timeouts.idle_secs),
        ("timeouts.request_secs", config.timeouts.request_secs),
        ("cdn.fetch_timeout_secs", config.cdn.fetch_timeout_secs),
        ("waf.sweep_interval_secs", config.waf.sweep_interval_secs),
        ("oauth.state_ttl_secs", config.oauth.state_ttl_secs),
        ("oauth.sweep_interval_secs", config.oauth.sweep_interval_secs),
    ];
    for (field, value) in timeouts {
        if value == 0 {
            errors.push(ValidationError::new(field, "must be greater than zero"));
        }
    }

    if config.cdn.gzip_pool_size == 0 {
        errors.push(ValidationError::new("cdn.gzip_pool_size", "must be greater than zero"));
    }

    if !config.waf.captcha_entrance.starts_with('/') && url::Url::parse(&config.waf.captcha_entrance).is_err() {
        errors.push(ValidationError::new(
            "waf.captcha_entrance",
            "must be an absolute path or URL",
        ));
    }

    if config.oauth.enabled && !PROVIDERS.contains(&config.oauth.provider.as_str()) {
        errors.push(ValidationError::new(
            "oauth.provider",
            format!("unsupported provider '{}'", config.oauth.provider),
        ));
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("invalid socket address '{}'", config.observability.metrics_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
