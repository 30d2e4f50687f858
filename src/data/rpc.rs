//! RPC data source for secondary nodes.
//!
//! A secondary node holds no data of its own. Every read is a `POST` to the
//! primary node's RPC endpoint:
//!
//! ```text
//! request:  {"action": "getdomains", "object": null}
//! response: {"object": [...]}
//! ```
//!
//! Transport failures, non-200 statuses and undecodable bodies are logged and
//! read as an empty result, so a flapping primary degrades a secondary node to
//! "no domains" instead of crashing it.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::data::model::{Application, CertificateRecord, DomainRecord, DomainUpdate};
use crate::data::{DataError, DataSource};
use crate::waf::model::{CcPolicy, Policy, VulnType};

/// Header carrying the shared node key.
pub const NODE_KEY_HEADER: &str = "x-node-key";

#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    action: &'a str,
    object: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    object: Option<T>,
}

/// Client for the primary node's RPC endpoint.
pub struct RpcDataSource {
    client: Client,
    url: String,
    node_key: String,
}

impl RpcDataSource {
    pub fn new(url: &str, node_key: &str, timeout: Duration) -> Result<Self, DataError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DataError::Rpc(e.to_string()))?;
        Ok(Self {
            client,
            url: url.to_string(),
            node_key: node_key.to_string(),
        })
    }

    async fn call<T: DeserializeOwned>(
        &self,
        action: &str,
        object: serde_json::Value,
    ) -> Result<T, DataError> {
        let resp = self
            .client
            .post(&self.url)
            .header(NODE_KEY_HEADER, &self.node_key)
            .json(&RpcRequest { action, object })
            .send()
            .await
            .map_err(|e| DataError::Rpc(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(DataError::Rpc(format!("{} returned status {}", action, status)));
        }

        let body = resp
            .bytes()
            .await
            .map_err(|e| DataError::Rpc(e.to_string()))?;
        let decoded: RpcResponse<T> = serde_json::from_slice(&body)?;
        decoded
            .object
            .ok_or_else(|| DataError::Rpc(format!("{} returned no object", action)))
    }

    /// Call an action, logging failures and substituting the fallback value.
    async fn call_or<T: DeserializeOwned>(
        &self,
        action: &str,
        object: serde_json::Value,
        fallback: T,
    ) -> T {
        match self.call(action, object).await {
            Ok(value) => value,
            Err(e) => {
                tracing::error!(action = action, error = %e, "RPC call failed");
                fallback
            }
        }
    }
}

#[async_trait]
impl DataSource for RpcDataSource {
    async fn select_domains(&self) -> Result<Vec<DomainRecord>, DataError> {
        Ok(self
            .call_or("getdomains", serde_json::Value::Null, Vec::new())
            .await)
    }

    async fn get_cert_by_id(&self, id: i64) -> Result<Option<CertificateRecord>, DataError> {
        Ok(self.call_or("getcert", id.into(), None).await)
    }

    async fn get_application_by_id(&self, id: i64) -> Result<Option<Application>, DataError> {
        Ok(self.call_or("getapp", id.into(), None).await)
    }

    async fn insert_domain(&self, _app_id: i64, _domain: &DomainUpdate) -> Result<i64, DataError> {
        Err(DataError::ReadOnly)
    }

    async fn update_domain(&self, _app_id: i64, _domain: &DomainUpdate) -> Result<(), DataError> {
        Err(DataError::ReadOnly)
    }

    async fn delete_domain_by_app_id(&self, _app_id: i64) -> Result<(), DataError> {
        Err(DataError::ReadOnly)
    }

    async fn select_cc_policies(&self) -> Result<Vec<CcPolicy>, DataError> {
        Ok(self
            .call_or("getccpolicies", serde_json::Value::Null, Vec::new())
            .await)
    }

    async fn select_policies(&self) -> Result<Vec<Policy>, DataError> {
        Ok(self
            .call_or("getgrouppolicies", serde_json::Value::Null, Vec::new())
            .await)
    }

    async fn select_vuln_types(&self) -> Result<Vec<VulnType>, DataError> {
        Ok(self
            .call_or("getvulntypes", serde_json::Value::Null, Vec::new())
            .await)
    }
}
