//! CAPTCHA challenge bookkeeping.
//!
//! A challenged request is remembered under its client id until the external
//! verification endpoint takes it or the entry expires.

use std::time::Duration;

use crate::lifecycle::Shutdown;
use crate::security::sha256_hex;
use crate::store::ExpiringMap;
use crate::waf::model::HitInfo;

/// Deterministic client id: SHA-256 over ip, path, user agent and cookie.
pub fn client_id(client_ip: &str, path: &str, user_agent: &str, cookie: &str) -> String {
    let mut material = String::with_capacity(client_ip.len() + path.len() + user_agent.len() + cookie.len());
    material.push_str(client_ip);
    material.push_str(path);
    material.push_str(user_agent);
    material.push_str(cookie);
    sha256_hex(&material)
}

/// Hit records awaiting CAPTCHA verification, keyed by client id.
#[derive(Clone, Default)]
pub struct ChallengeStore {
    pending: ExpiringMap<String, HitInfo>,
}

impl ChallengeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(&self, hit: HitInfo, ttl: Duration) {
        self.pending.insert(hit.client_id.clone(), hit, ttl);
    }

    pub fn get(&self, client_id: &str) -> Option<HitInfo> {
        self.pending.get(&client_id.to_string())
    }

    /// Remove the record once the client has been verified.
    pub fn take(&self, client_id: &str) -> Option<HitInfo> {
        self.pending.take(&client_id.to_string())
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn spawn_sweeper(&self, interval: Duration, shutdown: &Shutdown) {
        self.pending.spawn_sweeper("captcha", interval, shutdown);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_id_deterministic() {
        let a = client_id("1.2.3.4", "/login", "curl/8", "a=b");
        let b = client_id("1.2.3.4", "/login", "curl/8", "a=b");
        let c = client_id("1.2.3.4", "/login", "curl/8", "a=c");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
        assert_eq!(a, sha256_hex("1.2.3.4/logincurl/8a=b"));
    }

    #[test]
    fn test_store_and_take() {
        let store = ChallengeStore::new();
        let mut hit = HitInfo::unknown_host();
        hit.client_id = "abc".into();
        store.store(hit.clone(), Duration::from_secs(60));

        assert_eq!(store.get("abc"), Some(hit.clone()));
        assert_eq!(store.take("abc"), Some(hit));
        assert!(store.take("abc").is_none());
    }
}
