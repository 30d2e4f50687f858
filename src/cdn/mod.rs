//! Static asset cache (pull-through CDN).
//!
//! # Data Flow
//! ```text
//! GET /app.js (no query)
//!     → cache.rs (local file? else fetch origin, gate, write atomically)
//!     → service.rs (ServeFile; warning page for unsafe paths)
//!     → gzip.rs (pooled deflate, when the client accepts gzip)
//! ```

pub mod cache;
pub mod gzip;
pub mod service;

pub use cache::{CacheLookup, CdnError, StaticCache};
pub use gzip::{gzip_body, GzipPool};
pub use service::CdnService;
