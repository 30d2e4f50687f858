//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Upstream hop:
//!     → headers.rs (strip hop-by-hop, append X-Forwarded-For)
//!
//! Client fingerprints (challenge ids, OAuth state):
//!     → digest.rs (SHA-256 hex)
//! ```
//!
//! The WAF decision pipeline lives in `crate::waf`; this module only holds
//! the primitives it and the proxy share.

pub mod digest;
pub mod headers;

pub use digest::sha256_hex;
