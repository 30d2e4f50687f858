//! File-backed data source for primary nodes.
//!
//! The whole data set lives in one JSON document which is loaded at startup and
//! rewritten on every mutation. Writes go to a sibling temporary file that is
//! renamed over the original, so a crash never leaves a truncated document.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::data::model::{Application, CertificateRecord, DomainRecord, DomainUpdate};
use crate::data::{DataError, DataSource};
use crate::waf::model::{CcPolicy, Policy, VulnType};

/// On-disk layout of the data file.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct DataSnapshot {
    pub domains: Vec<DomainRecord>,
    pub applications: Vec<Application>,
    pub certificates: Vec<CertificateRecord>,
    pub cc_policies: Vec<CcPolicy>,
    pub policies: Vec<Policy>,
    pub vuln_types: Vec<VulnType>,
}

/// Data source over a JSON file, or purely in memory when no path is given.
pub struct FileDataSource {
    path: Option<PathBuf>,
    data: RwLock<DataSnapshot>,
}

impl FileDataSource {
    /// Open the data file. A missing file starts an empty data set.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, DataError> {
        let path = path.as_ref().to_path_buf();
        let data = if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            serde_json::from_str(&content)?
        } else {
            tracing::warn!(path = ?path, "Data file not found, starting with an empty data set");
            DataSnapshot::default()
        };

        tracing::info!(
            path = ?path,
            domains = data.domains.len(),
            applications = data.applications.len(),
            "Data file loaded"
        );

        Ok(Self {
            path: Some(path),
            data: RwLock::new(data),
        })
    }

    /// In-memory data source, used by tests and embedders.
    pub fn in_memory(data: DataSnapshot) -> Self {
        Self {
            path: None,
            data: RwLock::new(data),
        }
    }

    /// Re-read the data file, replacing the in-memory copy.
    pub async fn refresh(&self) -> Result<(), DataError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let content = tokio::fs::read_to_string(path).await?;
        let fresh: DataSnapshot = serde_json::from_str(&content)?;
        *self.data.write().await = fresh;
        Ok(())
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    async fn persist(&self, data: &DataSnapshot) -> Result<(), DataError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let encoded = serde_json::to_vec_pretty(data)?;
        let tmp = path.with_extension(format!("tmp{}", fastrand::u32(..)));
        tokio::fs::write(&tmp, &encoded).await?;
        if let Err(e) = tokio::fs::rename(&tmp, path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }
}

#[async_trait]
impl DataSource for FileDataSource {
    async fn select_domains(&self) -> Result<Vec<DomainRecord>, DataError> {
        Ok(self.data.read().await.domains.clone())
    }

    async fn get_cert_by_id(&self, id: i64) -> Result<Option<CertificateRecord>, DataError> {
        let data = self.data.read().await;
        Ok(data.certificates.iter().find(|c| c.id == id).cloned())
    }

    async fn get_application_by_id(&self, id: i64) -> Result<Option<Application>, DataError> {
        let data = self.data.read().await;
        Ok(data.applications.iter().find(|a| a.id == id).cloned())
    }

    async fn insert_domain(&self, app_id: i64, domain: &DomainUpdate) -> Result<i64, DataError> {
        let mut data = self.data.write().await;
        let name = domain.name.to_ascii_lowercase();
        if data.domains.iter().any(|d| d.name.eq_ignore_ascii_case(&name)) {
            return Err(DataError::DuplicateDomain(name));
        }

        let id = data.domains.iter().map(|d| d.id).max().unwrap_or(0) + 1;
        data.domains.push(DomainRecord {
            id,
            name,
            app_id,
            cert_id: domain.cert_id,
            redirect: domain.redirect,
            location: domain.location.clone(),
        });
        self.persist(&data).await?;
        Ok(id)
    }

    async fn update_domain(&self, app_id: i64, domain: &DomainUpdate) -> Result<(), DataError> {
        let mut data = self.data.write().await;
        let name = domain.name.to_ascii_lowercase();
        if data
            .domains
            .iter()
            .any(|d| d.name.eq_ignore_ascii_case(&name) && d.id != domain.id)
        {
            return Err(DataError::DuplicateDomain(name));
        }

        let record = data
            .domains
            .iter_mut()
            .find(|d| d.id == domain.id)
            .ok_or(DataError::DomainNotFound(domain.id))?;
        record.name = name;
        record.app_id = app_id;
        record.cert_id = domain.cert_id;
        record.redirect = domain.redirect;
        record.location = domain.location.clone();
        self.persist(&data).await
    }

    async fn delete_domain_by_app_id(&self, app_id: i64) -> Result<(), DataError> {
        let mut data = self.data.write().await;
        data.domains.retain(|d| d.app_id != app_id);
        self.persist(&data).await
    }

    async fn select_cc_policies(&self) -> Result<Vec<CcPolicy>, DataError> {
        Ok(self.data.read().await.cc_policies.clone())
    }

    async fn select_policies(&self) -> Result<Vec<Policy>, DataError> {
        Ok(self.data.read().await.policies.clone())
    }

    async fn select_vuln_types(&self) -> Result<Vec<VulnType>, DataError> {
        Ok(self.data.read().await.vuln_types.clone())
    }
}
