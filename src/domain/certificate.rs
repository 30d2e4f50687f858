//! Parsing PEM certificate records into TLS credentials.

use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::sign::CertifiedKey;

use crate::data::CertificateRecord;

/// Errors raised while turning PEM material into a TLS credential.
#[derive(Debug, thiserror::Error)]
pub enum CertificateError {
    #[error("failed to parse certificate PEM: {0}")]
    CertPem(std::io::Error),

    #[error("no certificates found in PEM")]
    EmptyChain,

    #[error("failed to parse private key PEM: {0}")]
    KeyPem(std::io::Error),

    #[error("no private key found in PEM")]
    MissingKey,

    #[error("unsupported private key: {0}")]
    UnsupportedKey(String),
}

/// A certificate usable for TLS termination.
#[derive(Clone)]
pub struct Certificate {
    pub id: i64,
    pub common_name: String,
    pub key: Arc<CertifiedKey>,
}

impl std::fmt::Debug for Certificate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Certificate")
            .field("id", &self.id)
            .field("common_name", &self.common_name)
            .field("chain_len", &self.key.cert.len())
            .finish()
    }
}

impl Certificate {
    /// Parse the PEM chain and private key of a stored certificate.
    pub fn from_record(record: &CertificateRecord) -> Result<Self, CertificateError> {
        let cert_chain: Vec<CertificateDer<'static>> =
            rustls_pemfile::certs(&mut record.cert_content.as_bytes())
                .collect::<Result<Vec<_>, _>>()
                .map_err(CertificateError::CertPem)?;

        if cert_chain.is_empty() {
            return Err(CertificateError::EmptyChain);
        }

        let private_key: PrivateKeyDer<'static> =
            rustls_pemfile::private_key(&mut record.priv_key_content.as_bytes())
                .map_err(CertificateError::KeyPem)?
                .ok_or(CertificateError::MissingKey)?;

        let signing_key = rustls::crypto::aws_lc_rs::sign::any_supported_type(&private_key)
            .map_err(|e| CertificateError::UnsupportedKey(e.to_string()))?;

        Ok(Self {
            id: record.id,
            common_name: record.common_name.clone(),
            key: Arc::new(CertifiedKey::new(cert_chain, signing_key)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(cert: &str, key: &str) -> CertificateRecord {
        CertificateRecord {
            id: 1,
            common_name: "example.com".into(),
            cert_content: cert.into(),
            priv_key_content: key.into(),
        }
    }

    #[test]
    fn test_empty_chain_rejected() {
        let err = Certificate::from_record(&record("", "")).unwrap_err();
        assert!(matches!(err, CertificateError::EmptyChain));
    }

    #[test]
    fn test_garbage_pem_rejected() {
        let pem = "-----BEGIN CERTIFICATE-----\n!!!!\n-----END CERTIFICATE-----\n";
        assert!(Certificate::from_record(&record(pem, "")).is_err());
    }
}
