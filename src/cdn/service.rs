//! Serving cached assets to clients.

use std::path::PathBuf;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderValue, Request, StatusCode};
use axum::response::Response;

use crate::cdn::{gzip_body, CacheLookup, CdnError, GzipPool, StaticCache};
use crate::config::CdnConfig;
use crate::data::Application;
use crate::observability::metrics;
use crate::proxy::static_files::serve_file;

/// Static asset branch of the dispatcher.
pub struct CdnService {
    cache: StaticCache,
    pool: Arc<GzipPool>,
    warning_page: PathBuf,
}

impl CdnService {
    pub fn new(config: &CdnConfig) -> Result<Self, CdnError> {
        Ok(Self {
            cache: StaticCache::new(config)?,
            pool: GzipPool::new(config.gzip_pool_size),
            warning_page: PathBuf::from(&config.warning_page),
        })
    }

    pub fn cache(&self) -> &StaticCache {
        &self.cache
    }

    pub fn is_cacheable(&self, path: &str, query: Option<&str>) -> bool {
        self.cache.is_cacheable(path, query)
    }

    /// Serve a cacheable GET given its request head. `None` means the origin
    /// did not hand back a cacheable asset and the request continues down the
    /// dynamic path.
    pub async fn serve(&self, app: &Application, host: &str, head: Request<()>) -> Option<Response> {
        let gzip = accepts_gzip(head.headers());
        let path = head.uri().path().to_string();
        let file = match self.cache.ensure(app, host, &path).await {
            Ok(CacheLookup::Hit(file)) => {
                metrics::record_cdn_lookup("hit");
                file
            }
            Ok(CacheLookup::Populated(file)) => {
                metrics::record_cdn_lookup("populated");
                file
            }
            Ok(CacheLookup::NotStatic) => {
                metrics::record_cdn_lookup("not_static");
                return None;
            }
            Err(CdnError::UnsafePath(path)) => {
                metrics::record_cdn_lookup("unsafe");
                tracing::warn!(path = %path, app_id = app.id, "Unsafe static path");
                return Some(serve_file(&self.warning_page, file_request(head)).await);
            }
            Err(e) => {
                metrics::record_cdn_lookup("error");
                tracing::warn!(error = %e, path = %path, app_id = app.id, "Static cache failed, serving dynamically");
                return None;
            }
        };

        let resp = serve_file(&file, file_request(head)).await;
        if resp.status() == StatusCode::OK && gzip {
            return Some(self.compress(resp));
        }
        Some(resp)
    }

    fn compress(&self, resp: Response) -> Response {
        let (mut parts, body) = resp.into_parts();
        parts.headers.remove(header::CONTENT_LENGTH);
        parts.headers.remove(header::ACCEPT_RANGES);
        parts
            .headers
            .insert(header::CONTENT_ENCODING, HeaderValue::from_static("gzip"));
        parts
            .headers
            .insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
        parts
            .headers
            .insert(header::VARY, HeaderValue::from_static("Accept-Encoding"));
        Response::from_parts(parts, gzip_body(body, &self.pool))
    }
}

/// Client asked for gzip.
pub fn accepts_gzip(headers: &HeaderMap) -> bool {
    headers
        .get_all(header::ACCEPT_ENCODING)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .any(|v| v.contains("gzip"))
}

/// Copy of the request head without its body, for the cache branch.
pub fn request_head(req: &Request<Body>) -> Request<()> {
    let mut head = Request::new(());
    *head.method_mut() = req.method().clone();
    *head.uri_mut() = req.uri().clone();
    *head.version_mut() = req.version();
    *head.headers_mut() = req.headers().clone();
    head
}

fn file_request(head: Request<()>) -> Request<Body> {
    let mut req = head.map(|()| Body::empty());
    // compressed output cannot honour byte ranges of the raw file
    if accepts_gzip(req.headers()) {
        req.headers_mut().remove(header::RANGE);
    }
    req
}
