//! Shared in-memory stores.

pub mod expiring;

pub use expiring::{deadline_after, ExpiringMap, MAX_TTL};
