//! Host-to-application resolution over an atomically swapped snapshot.
//!
//! # Responsibilities
//! - Map an inbound host to its domain, application and certificate
//! - Rebuild the whole table from the data source on reload
//! - Apply administrative domain changes without a full reload
//! - Serve SNI certificate lookups
//!
//! # Design Decisions
//! - Readers load an `Arc<DomainTable>` and never block
//! - Writers build a complete new table and publish it with one store, so a
//!   reader sees either the old table or the new one, never a half-cleared mix
//! - Writers are serialized by a mutex to avoid lost updates
//! - A failed reload keeps the previous table
//! - Host names are unique: a reload keeps the first record of a name, and
//!   saving a name owned by another domain is rejected

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use tokio::sync::Mutex;

use crate::data::{Application, DataError, DataSource, DomainRecord, DomainUpdate};
use crate::domain::certificate::Certificate;
use crate::observability::metrics;

/// A served domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Domain {
    pub id: i64,
    pub name: String,
    pub app_id: i64,
    pub cert_id: i64,
    pub redirect: bool,
    pub location: String,
}

impl From<&DomainRecord> for Domain {
    fn from(record: &DomainRecord) -> Self {
        Self {
            id: record.id,
            name: record.name.to_ascii_lowercase(),
            app_id: record.app_id,
            cert_id: record.cert_id,
            redirect: record.redirect,
            location: record.location.clone(),
        }
    }
}

/// Everything attached to one host name.
#[derive(Debug, Clone)]
pub struct DomainEntry {
    pub domain: Arc<Domain>,
    /// Absent only for pure redirect domains.
    pub app: Option<Arc<Application>>,
    pub cert: Option<Arc<Certificate>>,
}

/// Outcome of a host lookup.
#[derive(Debug, Clone)]
pub enum Resolution {
    Found(DomainEntry),
    UnknownHost,
}

/// Immutable domain table. The list and the name map are built together.
#[derive(Debug, Default)]
pub struct DomainTable {
    domains: Vec<Arc<Domain>>,
    by_name: HashMap<String, DomainEntry>,
}

impl DomainTable {
    /// Build a table. A name claimed twice keeps its first entry.
    fn from_entries(entries: Vec<DomainEntry>) -> Self {
        let mut domains = Vec::with_capacity(entries.len());
        let mut by_name: HashMap<String, DomainEntry> = HashMap::with_capacity(entries.len());
        for entry in entries {
            if let Some(kept) = by_name.get(&entry.domain.name) {
                tracing::warn!(
                    domain = %entry.domain.name,
                    id = entry.domain.id,
                    kept_id = kept.domain.id,
                    "Duplicate domain name, skipping"
                );
                continue;
            }
            domains.push(entry.domain.clone());
            by_name.insert(entry.domain.name.clone(), entry);
        }
        Self { domains, by_name }
    }

    fn entries(&self) -> Vec<DomainEntry> {
        self.domains
            .iter()
            .filter_map(|d| self.by_name.get(&d.name).cloned())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.domains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.domains.is_empty()
    }

    pub fn domains(&self) -> &[Arc<Domain>] {
        &self.domains
    }

    pub fn get(&self, name: &str) -> Option<&DomainEntry> {
        self.by_name.get(name)
    }
}

/// Shared resolver. Cheap to clone.
#[derive(Clone)]
pub struct DomainResolver {
    table: Arc<ArcSwap<DomainTable>>,
    source: Arc<dyn DataSource>,
    write_lock: Arc<Mutex<()>>,
}

impl DomainResolver {
    /// Create a resolver with an empty table. Call [`reload`](Self::reload) to populate it.
    pub fn new(source: Arc<dyn DataSource>) -> Self {
        Self {
            table: Arc::new(ArcSwap::from_pointee(DomainTable::default())),
            source,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Current snapshot.
    pub fn snapshot(&self) -> Arc<DomainTable> {
        self.table.load_full()
    }

    /// Resolve an inbound `Host` value. Matching is case-insensitive; the host
    /// is tried as given, then without its port.
    pub fn resolve(&self, host: &str) -> Resolution {
        let host = host.trim().to_ascii_lowercase();
        let table = self.table.load();

        if let Some(entry) = table.by_name.get(&host) {
            return Resolution::Found(entry.clone());
        }
        let bare = strip_port(&host);
        if bare != host {
            if let Some(entry) = table.by_name.get(bare) {
                return Resolution::Found(entry.clone());
            }
        }
        Resolution::UnknownHost
    }

    /// Certificate for a TLS server name.
    pub fn certificate_for(&self, server_name: &str) -> Option<Arc<Certificate>> {
        let name = server_name.to_ascii_lowercase();
        self.table
            .load()
            .by_name
            .get(&name)
            .and_then(|entry| entry.cert.clone())
    }

    /// Rebuild the table from the data source and publish it.
    ///
    /// On error the previous table stays in place.
    pub async fn reload(&self) -> Result<usize, DataError> {
        let _guard = self.write_lock.lock().await;

        let records = self.source.select_domains().await?;
        let mut apps: HashMap<i64, Option<Arc<Application>>> = HashMap::new();
        let mut certs: HashMap<i64, Option<Arc<Certificate>>> = HashMap::new();
        let mut entries = Vec::with_capacity(records.len());

        for record in &records {
            let app = match apps.get(&record.app_id) {
                Some(app) => app.clone(),
                None => {
                    let app = self
                        .source
                        .get_application_by_id(record.app_id)
                        .await?
                        .map(Arc::new);
                    apps.insert(record.app_id, app.clone());
                    app
                }
            };
            let cert = match certs.get(&record.cert_id) {
                Some(cert) => cert.clone(),
                None => {
                    let cert = self.load_certificate(record.cert_id).await?;
                    certs.insert(record.cert_id, cert.clone());
                    cert
                }
            };

            if app.is_none() && !record.redirect {
                tracing::warn!(
                    domain = %record.name,
                    app_id = record.app_id,
                    "Domain references a missing application, skipping"
                );
                continue;
            }

            entries.push(DomainEntry {
                domain: Arc::new(Domain::from(record)),
                app,
                cert,
            });
        }

        let table = DomainTable::from_entries(entries);
        let count = table.len();
        self.table.store(Arc::new(table));
        metrics::record_domains_loaded(count);

        tracing::info!(domains = count, "Domain table reloaded");
        Ok(count)
    }

    /// Insert (id 0) or update a domain of `app`, then publish the change.
    pub async fn upsert_domain(
        &self,
        app: Arc<Application>,
        update: &DomainUpdate,
    ) -> Result<Arc<Domain>, DataError> {
        let _guard = self.write_lock.lock().await;

        let name = update.name.to_ascii_lowercase();
        if let Some(owner) = self.table.load().get(&name) {
            if owner.domain.id != update.id {
                return Err(DataError::DuplicateDomain(name));
            }
        }

        let id = if update.id == 0 {
            self.source.insert_domain(app.id, update).await?
        } else {
            self.source.update_domain(app.id, update).await?;
            update.id
        };
        let cert = self.load_certificate(update.cert_id).await?;

        let domain = Arc::new(Domain {
            id,
            name,
            app_id: app.id,
            cert_id: update.cert_id,
            redirect: update.redirect,
            location: update.location.clone(),
        });

        let current = self.table.load_full();
        let mut entries: Vec<DomainEntry> = current
            .entries()
            .into_iter()
            .filter(|e| e.domain.id != id)
            .collect();
        entries.push(DomainEntry {
            domain: domain.clone(),
            app: Some(app),
            cert,
        });

        let table = DomainTable::from_entries(entries);
        metrics::record_domains_loaded(table.len());
        self.table.store(Arc::new(table));

        tracing::info!(domain = %domain.name, id = domain.id, "Domain saved");
        Ok(domain)
    }

    /// Delete every domain of an application, then publish the change.
    pub async fn delete_domains_by_app(&self, app_id: i64) -> Result<(), DataError> {
        let _guard = self.write_lock.lock().await;

        self.source.delete_domain_by_app_id(app_id).await?;

        let current = self.table.load_full();
        let entries: Vec<DomainEntry> = current
            .entries()
            .into_iter()
            .filter(|e| e.domain.app_id != app_id)
            .collect();

        let table = DomainTable::from_entries(entries);
        metrics::record_domains_loaded(table.len());
        self.table.store(Arc::new(table));

        tracing::info!(app_id, "Domains of application deleted");
        Ok(())
    }

    async fn load_certificate(&self, cert_id: i64) -> Result<Option<Arc<Certificate>>, DataError> {
        if cert_id == 0 {
            return Ok(None);
        }
        let Some(record) = self.source.get_cert_by_id(cert_id).await? else {
            tracing::warn!(cert_id, "Certificate not found");
            return Ok(None);
        };
        match Certificate::from_record(&record) {
            Ok(cert) => Ok(Some(Arc::new(cert))),
            Err(e) => {
                tracing::error!(cert_id, error = %e, "Failed to parse certificate");
                Ok(None)
            }
        }
    }
}

/// Strip a trailing `:port`, leaving bracketed IPv6 literals intact.
pub fn strip_port(host: &str) -> &str {
    if let Some(rest) = host.strip_prefix('[') {
        return match rest.find(']') {
            Some(end) => &host[..end + 2],
            None => host,
        };
    }
    match host.rfind(':') {
        Some(idx) if host[idx + 1..].chars().all(|c| c.is_ascii_digit()) => &host[..idx],
        _ => host,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::file::{DataSnapshot, FileDataSource};

    fn app(id: i64) -> Application {
        serde_json::from_value(serde_json::json!({
            "id": id,
            "destinations": [{"destination": "127.0.0.1:8080"}]
        }))
        .unwrap()
    }

    fn domain(id: i64, name: &str, app_id: i64) -> DomainRecord {
        DomainRecord {
            id,
            name: name.into(),
            app_id,
            cert_id: 0,
            redirect: false,
            location: String::new(),
        }
    }

    fn resolver(snapshot: DataSnapshot) -> DomainResolver {
        DomainResolver::new(Arc::new(FileDataSource::in_memory(snapshot)))
    }

    #[tokio::test]
    async fn test_resolve_case_insensitive_with_port() {
        let r = resolver(DataSnapshot {
            domains: vec![domain(1, "www.example.com", 1)],
            applications: vec![app(1)],
            ..Default::default()
        });
        r.reload().await.unwrap();

        assert!(matches!(r.resolve("WWW.Example.com"), Resolution::Found(_)));
        assert!(matches!(r.resolve("www.example.com:8443"), Resolution::Found(_)));
        assert!(matches!(r.resolve("other.example.com"), Resolution::UnknownHost));
    }

    #[tokio::test]
    async fn test_domain_without_app_skipped() {
        let r = resolver(DataSnapshot {
            domains: vec![domain(1, "a.example.com", 1), domain(2, "b.example.com", 9)],
            applications: vec![app(1)],
            ..Default::default()
        });
        assert_eq!(r.reload().await.unwrap(), 1);
        assert!(matches!(r.resolve("b.example.com"), Resolution::UnknownHost));
    }

    #[tokio::test]
    async fn test_upsert_and_delete() {
        let r = resolver(DataSnapshot {
            applications: vec![app(1)],
            ..Default::default()
        });
        r.reload().await.unwrap();

        let update = DomainUpdate {
            id: 0,
            name: "New.example.com".into(),
            cert_id: 0,
            redirect: false,
            location: String::new(),
        };
        let saved = r.upsert_domain(Arc::new(app(1)), &update).await.unwrap();
        assert!(matches!(r.resolve("new.example.com"), Resolution::Found(_)));

        let rename = DomainUpdate {
            id: saved.id,
            name: "renamed.example.com".into(),
            ..update
        };
        r.upsert_domain(Arc::new(app(1)), &rename).await.unwrap();
        assert!(matches!(r.resolve("new.example.com"), Resolution::UnknownHost));
        assert!(matches!(r.resolve("renamed.example.com"), Resolution::Found(_)));
        assert_eq!(r.snapshot().len(), 1);

        r.delete_domains_by_app(1).await.unwrap();
        assert!(r.snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_names_keep_first_domain() {
        let r = resolver(DataSnapshot {
            domains: vec![domain(1, "shop.example.com", 1), domain(2, "SHOP.example.com", 2)],
            applications: vec![app(1), app(2)],
            ..Default::default()
        });
        assert_eq!(r.reload().await.unwrap(), 1);
        let Resolution::Found(entry) = r.resolve("shop.example.com") else {
            panic!("expected shop.example.com to resolve");
        };
        assert_eq!(entry.domain.id, 1);
        assert_eq!(r.snapshot().domains().len(), 1);
    }

    #[tokio::test]
    async fn test_upsert_rejects_name_owned_by_other_domain() {
        let r = resolver(DataSnapshot {
            domains: vec![domain(1, "taken.example.com", 1), domain(2, "free.example.com", 2)],
            applications: vec![app(1), app(2)],
            ..Default::default()
        });
        r.reload().await.unwrap();

        let steal = DomainUpdate {
            id: 2,
            name: "Taken.example.com".into(),
            cert_id: 0,
            redirect: false,
            location: String::new(),
        };
        let err = r.upsert_domain(Arc::new(app(2)), &steal).await;
        assert!(matches!(err, Err(DataError::DuplicateDomain(_))));

        let insert = DomainUpdate { id: 0, ..steal };
        let err = r.upsert_domain(Arc::new(app(2)), &insert).await;
        assert!(matches!(err, Err(DataError::DuplicateDomain(_))));

        let Resolution::Found(entry) = r.resolve("taken.example.com") else {
            panic!("expected taken.example.com to resolve");
        };
        assert_eq!(entry.domain.app_id, 1);
        assert!(matches!(r.resolve("free.example.com"), Resolution::Found(_)));
        assert_eq!(r.snapshot().len(), 2);
    }

    #[tokio::test]
    async fn test_reload_replaces_table() {
        let source = Arc::new(FileDataSource::in_memory(DataSnapshot {
            domains: vec![domain(1, "a.example.com", 1)],
            applications: vec![app(1)],
            ..Default::default()
        }));
        let r = DomainResolver::new(source.clone());
        r.reload().await.unwrap();
        let before = r.snapshot();

        source.delete_domain_by_app_id(1).await.unwrap();
        r.reload().await.unwrap();

        // old readers keep their snapshot intact
        assert_eq!(before.len(), 1);
        assert!(before.get("a.example.com").is_some());
        assert!(r.snapshot().is_empty());
    }

    #[test]
    fn test_strip_port() {
        assert_eq!(strip_port("example.com:8080"), "example.com");
        assert_eq!(strip_port("example.com"), "example.com");
        assert_eq!(strip_port("[::1]:443"), "[::1]");
    }
}
