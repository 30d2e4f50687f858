//! Multi-tenant WAF gateway library.

pub mod auth;
pub mod cdn;
pub mod config;
pub mod data;
pub mod domain;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod proxy;
pub mod security;
pub mod store;
pub mod waf;

pub use config::schema::GatewayConfig;
pub use http::{Gateway, HttpServer};
pub use lifecycle::Shutdown;
