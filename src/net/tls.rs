//! TLS termination with per-domain certificates.
//!
//! The server certificate is chosen from the SNI name of each handshake,
//! looked up in the resolver's current snapshot, so reloads take effect on
//! the next handshake without restarting the listener.

use std::sync::Arc;

use axum_server::tls_rustls::RustlsConfig;
use rustls::server::{ClientHello, ResolvesServerCert};
use rustls::sign::CertifiedKey;

use crate::domain::DomainResolver;

/// Serves certificates from the domain table.
pub struct SniResolver {
    domains: DomainResolver,
}

impl SniResolver {
    pub fn new(domains: DomainResolver) -> Self {
        Self { domains }
    }
}

impl std::fmt::Debug for SniResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SniResolver")
            .field("domains", &self.domains.snapshot().len())
            .finish()
    }
}

impl ResolvesServerCert for SniResolver {
    fn resolve(&self, hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        let Some(name) = hello.server_name() else {
            tracing::debug!("TLS handshake without SNI rejected");
            return None;
        };
        let cert = self.domains.certificate_for(name);
        if cert.is_none() {
            tracing::debug!(server_name = %name, "No certificate for server name");
        }
        cert.map(|c| c.key.clone())
    }
}

/// rustls server settings backed by the domain table.
pub fn server_config(domains: DomainResolver) -> Result<rustls::ServerConfig, rustls::Error> {
    let mut config = rustls::ServerConfig::builder_with_provider(Arc::new(
        rustls::crypto::aws_lc_rs::default_provider(),
    ))
    .with_safe_default_protocol_versions()?
    .with_no_client_auth()
    .with_cert_resolver(Arc::new(SniResolver::new(domains)));
    config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];
    Ok(config)
}

/// Listener TLS settings for `axum-server`.
pub fn rustls_config(domains: DomainResolver) -> Result<RustlsConfig, rustls::Error> {
    Ok(RustlsConfig::from_config(Arc::new(server_config(domains)?)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::file::{DataSnapshot, FileDataSource};

    #[test]
    fn test_server_config_advertises_h2() {
        let source = Arc::new(FileDataSource::in_memory(DataSnapshot::default()));
        let config = server_config(DomainResolver::new(source)).unwrap();
        assert_eq!(config.alpn_protocols[0], b"h2".to_vec());
    }
}
