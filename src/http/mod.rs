//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP/TLS connection
//!     → server.rs (Axum setup, middleware, listeners)
//!     → dispatch.rs (per-request pipeline)
//!         → redirect.rs (host-level redirects)
//!         → client_ip.rs (client address per application)
//!     → Send to client
//! ```

pub mod client_ip;
pub mod dispatch;
pub mod redirect;
pub mod server;

pub use dispatch::{Gateway, Listener};
pub use server::HttpServer;
