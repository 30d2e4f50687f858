//! Domain and application resolution.
//!
//! # Data Flow
//! ```text
//! DataSource ──reload()──▶ DomainTable (Arc) ──ArcSwap──▶ resolve(host)
//!                                                 └──────▶ certificate_for(sni)
//! ```

pub mod certificate;
pub mod resolver;

pub use certificate::{Certificate, CertificateError};
pub use resolver::{Domain, DomainEntry, DomainResolver, DomainTable, Resolution};
