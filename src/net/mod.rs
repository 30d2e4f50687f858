//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection (TLS listener)
//!     → tls.rs (SNI → certificate from the domain table, ALPN h2/http1.1)
//!     → Hand off to HTTP layer
//! ```

pub mod tls;

pub use tls::{rustls_config, server_config, SniResolver};
