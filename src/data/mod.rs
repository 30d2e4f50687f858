//! Data layer subsystem.
//!
//! # Data Flow
//! ```text
//! primary node:   data file (JSON) ──▶ file.rs (FileDataSource) ──┐
//!                                                                  ├──▶ DataSource ──▶ resolver / WAF engine
//! secondary node: primary RPC API  ──▶ rpc.rs  (RpcDataSource)  ──┘
//!
//! watcher.rs: data file changed ──▶ reload request ──▶ resolver.reload()
//! ```
//!
//! # Design Decisions
//! - One trait for both node roles so the resolver never knows where rows come from
//! - Read errors on a secondary node are logged and yield empty results
//! - Mutations are only possible on a primary node

pub mod file;
pub mod model;
pub mod rpc;
pub mod watcher;

use async_trait::async_trait;

pub use file::FileDataSource;
pub use model::{
    Application, CertificateRecord, ClientIpMethod, Destination, DomainRecord, DomainUpdate,
    InternalScheme, RouteType,
};
pub use rpc::RpcDataSource;

use crate::waf::model::{CcPolicy, Policy, VulnType};

/// Errors raised by the data layer.
#[derive(Debug, thiserror::Error)]
pub enum DataError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Data file is malformed: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("RPC request failed: {0}")]
    Rpc(String),

    #[error("Domain name already exists: {0}")]
    DuplicateDomain(String),

    #[error("Domain not found: {0}")]
    DomainNotFound(i64),

    #[error("Data source is read-only on a secondary node")]
    ReadOnly,
}

/// Source of domains, applications, certificates and WAF policies.
#[async_trait]
pub trait DataSource: Send + Sync {
    async fn select_domains(&self) -> Result<Vec<DomainRecord>, DataError>;

    async fn get_cert_by_id(&self, id: i64) -> Result<Option<CertificateRecord>, DataError>;

    async fn get_application_by_id(&self, id: i64) -> Result<Option<Application>, DataError>;

    /// Returns the id assigned to the new domain.
    async fn insert_domain(&self, app_id: i64, domain: &DomainUpdate) -> Result<i64, DataError>;

    async fn update_domain(&self, app_id: i64, domain: &DomainUpdate) -> Result<(), DataError>;

    async fn delete_domain_by_app_id(&self, app_id: i64) -> Result<(), DataError>;

    async fn select_cc_policies(&self) -> Result<Vec<CcPolicy>, DataError>;

    async fn select_policies(&self) -> Result<Vec<Policy>, DataError>;

    async fn select_vuln_types(&self) -> Result<Vec<VulnType>, DataError>;
}
