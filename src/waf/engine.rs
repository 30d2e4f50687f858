//! WAF engine: CC classification, static detection and content policies.
//!
//! # Responsibilities
//! - Classify clients exceeding a CC policy's request budget as attackers
//! - Recognise static resources that skip the WAF
//! - Evaluate content policies through a pluggable matcher
//! - Write interception log records
//!
//! # Design Decisions
//! - Counters are fixed windows keyed by app id and client fingerprint
//! - A classified client stays blocked for the policy's block window; only the
//!   request that triggers classification asks for a log record
//! - What makes a content policy "hit" is decided by [`PolicyMatcher`], not here

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use axum::http::{header, HeaderMap, Method};
use dashmap::DashMap;

use crate::data::{DataError, DataSource};
use crate::lifecycle::Shutdown;
use crate::security::sha256_hex;
use crate::store::deadline_after;
use crate::waf::model::{CcPolicy, Policy};

/// Request attributes the WAF inspects.
#[derive(Debug, Clone)]
pub struct RequestInfo {
    pub method: Method,
    pub host: String,
    pub path: String,
    pub query: Option<String>,
    pub headers: HeaderMap,
}

impl RequestInfo {
    /// Path plus `?query` when present.
    pub fn target_url(&self) -> String {
        match &self.query {
            Some(q) if !q.is_empty() => format!("{}?{}", self.path, q),
            _ => self.path.clone(),
        }
    }

    pub fn user_agent(&self) -> &str {
        self.header_str(header::USER_AGENT)
    }

    pub fn cookie(&self) -> &str {
        self.header_str(header::COOKIE)
    }

    fn header_str(&self, name: header::HeaderName) -> &str {
        self.headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
    }
}

/// A client classified as a CC attacker.
#[derive(Debug, Clone)]
pub struct CcHit {
    pub policy: CcPolicy,
    pub client_id: String,
    /// True only on the request that triggered classification.
    pub should_log: bool,
}

/// Interface between the dispatcher and a WAF implementation.
pub trait WafEngine: Send + Sync {
    fn is_static_resource(&self, req: &RequestInfo) -> bool;

    fn is_cc_attack(&self, req: &RequestInfo, app_id: i64, client_ip: &str) -> Option<CcHit>;

    fn is_request_hit_policy(&self, req: &RequestInfo, app_id: i64, client_ip: &str)
        -> Option<Policy>;

    fn log_cc_request(&self, req: &RequestInfo, app_id: i64, client_ip: &str, policy: &CcPolicy);

    fn log_group_hit_request(&self, req: &RequestInfo, app_id: i64, client_ip: &str, policy: &Policy);

    fn vuln_name(&self, vuln_id: i64) -> Option<String>;
}

/// Decides whether a content policy matches a request.
pub trait PolicyMatcher: Send + Sync {
    fn matches(&self, policy: &Policy, req: &RequestInfo, client_ip: &str) -> bool;
}

impl<F> PolicyMatcher for F
where
    F: Fn(&Policy, &RequestInfo, &str) -> bool + Send + Sync,
{
    fn matches(&self, policy: &Policy, req: &RequestInfo, client_ip: &str) -> bool {
        self(policy, req, client_ip)
    }
}

/// Matcher that never reports a hit.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMatcher;

impl PolicyMatcher for NoopMatcher {
    fn matches(&self, _policy: &Policy, _req: &RequestInfo, _client_ip: &str) -> bool {
        false
    }
}

#[derive(Debug)]
struct CcCounter {
    window_start: Instant,
    count: u64,
    blocked_until: Option<Instant>,
    interval: Duration,
}

impl CcCounter {
    fn is_idle(&self, now: Instant) -> bool {
        let blocked = self.blocked_until.is_some_and(|until| until > now);
        !blocked && now.duration_since(self.window_start) >= self.interval
    }
}

#[derive(Debug, Default)]
struct PolicySet {
    /// CC policy per app id; app id 0 is the global fallback.
    cc: HashMap<i64, CcPolicy>,
    content: Vec<Policy>,
    vulns: HashMap<i64, String>,
}

/// In-process WAF engine.
pub struct LocalWafEngine {
    policies: ArcSwap<PolicySet>,
    counters: DashMap<String, CcCounter>,
    matcher: Arc<dyn PolicyMatcher>,
    static_extensions: Vec<String>,
}

impl LocalWafEngine {
    pub fn new(matcher: Arc<dyn PolicyMatcher>, static_extensions: Vec<String>) -> Self {
        Self {
            policies: ArcSwap::from_pointee(PolicySet::default()),
            counters: DashMap::new(),
            matcher,
            static_extensions: static_extensions
                .into_iter()
                .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
                .collect(),
        }
    }

    /// Replace the policy set with the one held by the data source.
    pub async fn reload(&self, source: &dyn DataSource) -> Result<(), DataError> {
        let cc_policies = source.select_cc_policies().await?;
        let policies = source.select_policies().await?;
        let vuln_types = source.select_vuln_types().await?;
        self.set_policies(cc_policies, policies, vuln_types.into_iter().map(|v| (v.id, v.name)));
        Ok(())
    }

    /// Install a policy set directly.
    pub fn set_policies(
        &self,
        cc_policies: Vec<CcPolicy>,
        policies: Vec<Policy>,
        vulns: impl IntoIterator<Item = (i64, String)>,
    ) {
        let set = PolicySet {
            cc: cc_policies
                .into_iter()
                .filter(|p| p.enabled)
                .map(|p| (p.app_id, p))
                .collect(),
            content: policies,
            vulns: vulns.into_iter().collect(),
        };
        tracing::info!(
            cc_policies = set.cc.len(),
            policies = set.content.len(),
            "WAF policies loaded"
        );
        self.policies.store(Arc::new(set));
    }

    /// Drop counters that are neither blocking nor inside a live window.
    pub fn sweep_counters(&self) -> usize {
        let now = Instant::now();
        let before = self.counters.len();
        self.counters.retain(|_, c| !c.is_idle(now));
        before.saturating_sub(self.counters.len())
    }

    /// Spawn the counter sweeper. It stops when `shutdown` fires.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration, shutdown: &Shutdown) {
        let engine = self.clone();
        let mut shutdown_rx = shutdown.subscribe();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let removed = engine.sweep_counters();
                        if removed > 0 {
                            tracing::debug!(removed, "Swept idle CC counters");
                        }
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
        });
    }

    fn cc_client_id(policy: &CcPolicy, req: &RequestInfo, client_ip: &str) -> String {
        let mut fingerprint = client_ip.to_string();
        if policy.stat_by_url {
            fingerprint.push_str(&req.path);
        }
        if policy.stat_by_user_agent {
            fingerprint.push_str(req.user_agent());
        }
        if policy.stat_by_cookie {
            fingerprint.push_str(req.cookie());
        }
        sha256_hex(&fingerprint)
    }
}

impl WafEngine for LocalWafEngine {
    fn is_static_resource(&self, req: &RequestInfo) -> bool {
        if req.query.as_deref().is_some_and(|q| !q.is_empty()) {
            return false;
        }
        let Some((_, ext)) = req.path.rsplit_once('.') else {
            return false;
        };
        if ext.contains('/') {
            return false;
        }
        let ext = ext.to_ascii_lowercase();
        self.static_extensions.iter().any(|e| *e == ext)
    }

    fn is_cc_attack(&self, req: &RequestInfo, app_id: i64, client_ip: &str) -> Option<CcHit> {
        let set = self.policies.load();
        let policy = set.cc.get(&app_id).or_else(|| set.cc.get(&0))?;

        let client_id = Self::cc_client_id(policy, req, client_ip);
        let key = format!("{}:{}", app_id, client_id);
        let interval = Duration::from_millis(policy.interval_ms.max(1));
        let now = Instant::now();

        let mut counter = self.counters.entry(key).or_insert_with(|| CcCounter {
            window_start: now,
            count: 0,
            blocked_until: None,
            interval,
        });
        counter.interval = interval;

        if let Some(until) = counter.blocked_until {
            if until > now {
                return Some(CcHit {
                    policy: policy.clone(),
                    client_id,
                    should_log: false,
                });
            }
            counter.blocked_until = None;
            counter.window_start = now;
            counter.count = 0;
        }

        if now.duration_since(counter.window_start) >= interval {
            counter.window_start = now;
            counter.count = 0;
        }

        counter.count += 1;
        if counter.count > policy.max_count {
            counter.blocked_until = Some(deadline_after(now, Duration::from_secs(policy.block_secs)));
            return Some(CcHit {
                policy: policy.clone(),
                client_id,
                should_log: true,
            });
        }
        None
    }

    fn is_request_hit_policy(
        &self,
        req: &RequestInfo,
        app_id: i64,
        client_ip: &str,
    ) -> Option<Policy> {
        let set = self.policies.load();
        set.content
            .iter()
            .filter(|p| p.app_id == 0 || p.app_id == app_id)
            .find(|p| self.matcher.matches(p, req, client_ip))
            .cloned()
    }

    fn log_cc_request(&self, req: &RequestInfo, app_id: i64, client_ip: &str, policy: &CcPolicy) {
        tracing::warn!(
            target: "waf",
            kind = "cc",
            app_id,
            client_ip = %client_ip,
            method = %req.method,
            host = %req.host,
            url = %req.target_url(),
            user_agent = %req.user_agent(),
            policy_id = policy.id,
            action = policy.action.as_str(),
            "CC attack detected"
        );
    }

    fn log_group_hit_request(&self, req: &RequestInfo, app_id: i64, client_ip: &str, policy: &Policy) {
        let vuln = self.vuln_name(policy.vuln_id).unwrap_or_default();
        tracing::warn!(
            target: "waf",
            kind = "policy",
            app_id,
            client_ip = %client_ip,
            method = %req.method,
            host = %req.host,
            url = %req.target_url(),
            user_agent = %req.user_agent(),
            policy_id = policy.id,
            vuln = %vuln,
            action = policy.action.as_str(),
            "Content policy hit"
        );
    }

    fn vuln_name(&self, vuln_id: i64) -> Option<String> {
        self.policies.load().vulns.get(&vuln_id).cloned()
    }
}
