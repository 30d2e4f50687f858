//! Pull-through cache of static assets.
//!
//! # Responsibilities
//! - Decide which requests are cacheable static assets
//! - Map a request path to `<root>/<app id>/<path>` without escaping the root
//! - Fetch missing assets from the application's first destination
//! - Persist accepted assets atomically
//!
//! # Design Decisions
//! - The requester waits for the fetch; concurrent misses on the same file
//!   share one fetch
//! - Only `200` responses with an accepted content type are stored; anything
//!   else makes the request fall through to the dynamic path
//! - Bodies stream into a temporary file in the target directory which is
//!   renamed into place, so readers never see a partial asset
//! - The per-file lock and the temporary file are owned by drop guards, so a
//!   failed or cancelled fetch leaves neither behind

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use axum::http::header;
use dashmap::DashMap;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::config::CdnConfig;
use crate::data::Application;
use crate::domain::resolver::strip_port;

/// Errors raised by the static asset cache.
#[derive(Debug, thiserror::Error)]
pub enum CdnError {
    #[error("unsafe cache path: {0}")]
    UnsafePath(String),

    #[error("cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("origin fetch failed: {0}")]
    Fetch(#[from] reqwest::Error),
}

/// Result of making sure an asset is present locally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheLookup {
    /// Already on disk.
    Hit(PathBuf),
    /// Fetched from the origin by this request.
    Populated(PathBuf),
    /// The origin response was not cacheable; serve the request dynamically.
    NotStatic,
}

/// Pull-through asset cache rooted at one directory.
pub struct StaticCache {
    root: PathBuf,
    extensions: Vec<String>,
    accepted_content_types: Vec<String>,
    client: reqwest::Client,
    inflight: DashMap<PathBuf, Arc<Mutex<()>>>,
}

impl StaticCache {
    pub fn new(config: &CdnConfig) -> Result<Self, CdnError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.fetch_timeout_secs))
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self {
            root: PathBuf::from(&config.root),
            extensions: config
                .extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
                .collect(),
            accepted_content_types: config.accepted_content_types.clone(),
            client,
            inflight: DashMap::new(),
        })
    }

    /// A request is cacheable when it has no query string and its path ends
    /// in a cacheable extension.
    pub fn is_cacheable(&self, path: &str, query: Option<&str>) -> bool {
        if query.is_some_and(|q| !q.is_empty()) {
            return false;
        }
        let Some((_, ext)) = path.rsplit_once('.') else {
            return false;
        };
        !ext.contains('/') && self.extensions.iter().any(|e| e.eq_ignore_ascii_case(ext))
    }

    /// Local file for an asset, or `None` if the path would leave the root.
    pub fn local_path(&self, app_id: i64, path: &str) -> Option<PathBuf> {
        let relative = Path::new(path.trim_start_matches('/'));
        let mut local = self.root.join(app_id.to_string());
        for component in relative.components() {
            match component {
                Component::Normal(part) => local.push(part),
                Component::CurDir => {}
                _ => return None,
            }
        }
        Some(local)
    }

    /// Make sure the asset at `path` of `app` is present locally.
    pub async fn ensure(
        &self,
        app: &Application,
        inbound_host: &str,
        path: &str,
    ) -> Result<CacheLookup, CdnError> {
        let local = self
            .local_path(app.id, path)
            .ok_or_else(|| CdnError::UnsafePath(path.to_string()))?;

        if tokio::fs::try_exists(&local).await? {
            return Ok(CacheLookup::Hit(local));
        }

        let inflight = InflightGuard::join(&self.inflight, local.clone());
        let _held = inflight.lock.lock().await;
        // a concurrent miss may have populated it while we waited
        if tokio::fs::try_exists(&local).await? {
            return Ok(CacheLookup::Hit(local));
        }
        self.populate(app, inbound_host, path, &local).await
    }

    async fn populate(
        &self,
        app: &Application,
        inbound_host: &str,
        path: &str,
        local: &Path,
    ) -> Result<CacheLookup, CdnError> {
        let Some(destination) = app.destinations.first() else {
            return Ok(CacheLookup::NotStatic);
        };
        let url = format!(
            "{}://{}{}",
            app.internal_scheme.as_str(),
            destination.destination,
            path
        );
        let host = origin_host(&destination.destination, inbound_host);

        tracing::info!(url = %url, host = %host, "Static asset missing, fetching from origin");
        let mut resp = self.client.get(&url).header(header::HOST, host).send().await?;

        if resp.status() != reqwest::StatusCode::OK {
            tracing::info!(url = %url, status = %resp.status(), "Origin status not cacheable");
            return Ok(CacheLookup::NotStatic);
        }
        if let Some(content_type) = resp.headers().get(header::CONTENT_TYPE) {
            let content_type = content_type.to_str().unwrap_or_default();
            if !self.accepted_content_types.iter().any(|t| t == content_type) {
                tracing::info!(url = %url, content_type = %content_type, "Origin content type not cacheable");
                return Ok(CacheLookup::NotStatic);
            }
        }

        let dir = local.parent().unwrap_or(&self.root);
        tokio::fs::create_dir_all(dir).await?;
        let file_name = local
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let tmp = TempFile::new(dir.join(format!(".{}.{}.tmp", file_name, fastrand::u64(..))));

        let mut file = tokio::fs::File::create(&tmp.path).await?;
        let mut size = 0u64;
        while let Some(chunk) = resp.chunk().await? {
            file.write_all(&chunk).await?;
            size += chunk.len() as u64;
        }
        file.flush().await?;
        file.sync_all().await?;
        drop(file);
        tmp.persist(local).await?;

        tracing::info!(url = %url, path = ?local, size, "Static asset cached");
        Ok(CacheLookup::Populated(local.to_path_buf()))
    }
}

/// Membership in the per-file fetch lock.
///
/// Dropping the last member removes the lock from the map, whether the fetch
/// finished, failed or was cancelled. A lock that replaced ours is left alone.
struct InflightGuard<'a> {
    map: &'a DashMap<PathBuf, Arc<Mutex<()>>>,
    key: PathBuf,
    lock: Arc<Mutex<()>>,
}

impl<'a> InflightGuard<'a> {
    fn join(map: &'a DashMap<PathBuf, Arc<Mutex<()>>>, key: PathBuf) -> Self {
        let lock = map.entry(key.clone()).or_default().clone();
        Self { map, key, lock }
    }
}

impl Drop for InflightGuard<'_> {
    fn drop(&mut self) {
        let ours = Arc::downgrade(&std::mem::take(&mut self.lock));
        self.map.remove_if(&self.key, |_, current| {
            std::ptr::eq(Arc::as_ptr(current), ours.as_ptr()) && Arc::strong_count(current) == 1
        });
    }
}

/// Temporary download file, deleted on drop unless persisted.
struct TempFile {
    path: PathBuf,
    persisted: bool,
}

impl TempFile {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            persisted: false,
        }
    }

    async fn persist(mut self, target: &Path) -> std::io::Result<()> {
        tokio::fs::rename(&self.path, target).await?;
        self.persisted = true;
        Ok(())
    }
}

impl Drop for TempFile {
    fn drop(&mut self) {
        if !self.persisted {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

/// Host header for an origin fetch: the destination's own name when it is a
/// domain name, else the host the client asked for.
pub fn origin_host(destination: &str, inbound_host: &str) -> String {
    let dest_host = strip_port(destination);
    if dest_host.chars().any(|c| c.is_ascii_alphabetic()) {
        dest_host.to_string()
    } else {
        inbound_host.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache(root: &Path) -> StaticCache {
        let config = CdnConfig {
            root: root.to_string_lossy().into_owned(),
            ..CdnConfig::default()
        };
        StaticCache::new(&config).unwrap()
    }

    #[test]
    fn test_is_cacheable() {
        let dir = tempfile::tempdir().unwrap();
        let c = cache(dir.path());
        assert!(c.is_cacheable("/static/app.js", None));
        assert!(c.is_cacheable("/logo.PNG", Some("")));
        assert!(!c.is_cacheable("/app.js", Some("v=2")));
        assert!(!c.is_cacheable("/index.html", None));
        assert!(!c.is_cacheable("/v1.0/api", None));
    }

    #[test]
    fn test_local_path_rejects_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let c = cache(dir.path());
        assert_eq!(
            c.local_path(3, "/css/site.css").unwrap(),
            dir.path().join("3").join("css").join("site.css")
        );
        assert!(c.local_path(3, "/../../etc/passwd.css").is_none());
        assert!(c.local_path(3, "/a/../b.css").is_none());
    }

    #[test]
    fn test_origin_host_rule() {
        assert_eq!(origin_host("origin.example.com:8080", "www.example.com"), "origin.example.com");
        assert_eq!(origin_host("10.0.0.5:8080", "www.example.com"), "www.example.com");
        assert_eq!(origin_host("10.0.0.5", "www.example.com"), "www.example.com");
    }

    #[tokio::test]
    async fn test_existing_file_is_hit() {
        let dir = tempfile::tempdir().unwrap();
        let c = cache(dir.path());
        let app: Application = serde_json::from_value(serde_json::json!({
            "id": 4,
            "destinations": [{"destination": "127.0.0.1:1"}]
        }))
        .unwrap();
        std::fs::create_dir_all(dir.path().join("4")).unwrap();
        std::fs::write(dir.path().join("4").join("app.js"), "x").unwrap();

        let lookup = c.ensure(&app, "www.example.com", "/app.js").await.unwrap();
        assert_eq!(lookup, CacheLookup::Hit(dir.path().join("4").join("app.js")));
        assert_eq!(c.inflight.len(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_fetch_releases_lock_and_temp_file() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let origin = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let mut buf = [0u8; 1024];
                    let _ = tokio::io::AsyncReadExt::read(&mut socket, &mut buf).await;
                    let head = "HTTP/1.1 200 OK\r\nContent-Type: application/javascript\r\nContent-Length: 1000\r\n\r\npartial";
                    let _ = socket.write_all(head.as_bytes()).await;
                    tokio::time::sleep(Duration::from_secs(30)).await;
                });
            }
        });

        let dir = tempfile::tempdir().unwrap();
        let c = cache(dir.path());
        let app: Application = serde_json::from_value(serde_json::json!({
            "id": 4,
            "destinations": [{"destination": origin.to_string()}]
        }))
        .unwrap();

        let fetch = c.ensure(&app, "www.example.com", "/slow.js");
        let result = tokio::time::timeout(Duration::from_millis(200), fetch).await;
        assert!(result.is_err());

        assert_eq!(c.inflight.len(), 0);
        let leftovers: Vec<_> = std::fs::read_dir(dir.path().join("4"))
            .map(|entries| entries.filter_map(Result::ok).collect())
            .unwrap_or_default();
        assert!(leftovers.is_empty(), "left behind {:?}", leftovers);
    }

    #[test]
    fn test_inflight_lock_removed_by_last_member_only() {
        let map = DashMap::new();
        let key = PathBuf::from("/cache/1/a.js");

        let first = InflightGuard::join(&map, key.clone());
        let second = InflightGuard::join(&map, key.clone());
        assert!(Arc::ptr_eq(&first.lock, &second.lock));
        drop(first);
        assert_eq!(map.len(), 1);
        drop(second);
        assert_eq!(map.len(), 0);

        // a stale member must not remove a newer lock
        let stale = InflightGuard::join(&map, key.clone());
        map.insert(key.clone(), Arc::new(Mutex::new(())));
        drop(stale);
        assert_eq!(map.len(), 1);
    }
}
