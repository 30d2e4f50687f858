//! Turning WAF findings into a verdict and a response.
//!
//! # Data Flow
//! ```text
//! RequestInfo ──▶ is_static_resource? ──yes──▶ Continue
//!                        │ no
//!                        ▼
//!                 is_cc_attack ──hit──▶ Verdict ──terminal──▶ Respond
//!                        │ miss / non-terminal
//!                        ▼
//!             is_request_hit_policy ──hit──▶ Verdict ──▶ Continue | Respond
//! ```
//!
//! # Design Decisions
//! - CC runs first; a terminal CC verdict skips content policies entirely
//! - Both sources share one verdict type and one handler
//! - Log records are written by detached tasks, dispatched before the
//!   response is built and never awaited

use std::sync::Arc;
use std::time::Duration;

use axum::http::{header, HeaderValue, StatusCode};
use axum::body::Body;
use axum::response::Response;

use crate::auth::session::unix_now;
use crate::data::Application;
use crate::observability::metrics;
use crate::waf::block_page::block_page;
use crate::waf::challenge::{client_id, ChallengeStore};
use crate::waf::engine::{CcHit, RequestInfo, WafEngine};
use crate::waf::model::{HitInfo, HitType, Policy, PolicyAction};

/// Fallback name for a content policy whose vulnerability type is unknown.
pub const GROUP_POLICY_HIT: &str = "Group Policy Hit";

/// Outcome of one WAF check.
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Pass,
    Block(HitInfo),
    BypassAndLog,
    Challenge(HitInfo),
}

impl Verdict {
    fn from_action(action: PolicyAction, hit: HitInfo) -> Self {
        match action {
            PolicyAction::Block => Verdict::Block(hit),
            PolicyAction::BypassAndLog => Verdict::BypassAndLog,
            PolicyAction::Captcha => Verdict::Challenge(hit),
            PolicyAction::Pass => Verdict::Pass,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Verdict::Block(_) | Verdict::Challenge(_))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Pass => "pass",
            Verdict::Block(_) => "block",
            Verdict::BypassAndLog => "bypass_and_log",
            Verdict::Challenge(_) => "challenge",
        }
    }
}

/// What the dispatcher does next.
#[derive(Debug)]
pub enum Decision {
    Continue,
    Respond(Response),
}

/// Shared WAF state used by the dispatcher.
#[derive(Clone)]
pub struct WafGuard {
    engine: Arc<dyn WafEngine>,
    challenges: ChallengeStore,
    captcha_entrance: String,
}

impl WafGuard {
    pub fn new(engine: Arc<dyn WafEngine>, challenges: ChallengeStore, captcha_entrance: &str) -> Self {
        Self {
            engine,
            challenges,
            captcha_entrance: captcha_entrance.to_string(),
        }
    }

    pub fn engine(&self) -> &Arc<dyn WafEngine> {
        &self.engine
    }

    pub fn challenges(&self) -> &ChallengeStore {
        &self.challenges
    }

    /// Run the CC and content checks for a request to `app`.
    pub fn evaluate(&self, req: &RequestInfo, app: &Application, client_ip: &str) -> Decision {
        if !app.waf_enabled || self.engine.is_static_resource(req) {
            return Decision::Continue;
        }

        if let Some(hit) = self.engine.is_cc_attack(req, app.id, client_ip) {
            let verdict = self.cc_verdict(req, app, client_ip, hit);
            metrics::record_waf_verdict("cc", verdict.as_str());
            if verdict.is_terminal() {
                return self.handle(verdict, app);
            }
        }

        if let Some(policy) = self.engine.is_request_hit_policy(req, app.id, client_ip) {
            let verdict = self.policy_verdict(req, app, client_ip, policy);
            metrics::record_waf_verdict("policy", verdict.as_str());
            return self.handle(verdict, app);
        }

        Decision::Continue
    }

    fn cc_verdict(&self, req: &RequestInfo, app: &Application, client_ip: &str, hit: CcHit) -> Verdict {
        let CcHit {
            policy,
            client_id,
            should_log,
        } = hit;

        if should_log && policy.action != PolicyAction::Pass {
            let engine = self.engine.clone();
            let req = req.clone();
            let ip = client_ip.to_string();
            let app_id = app.id;
            let policy = policy.clone();
            tokio::spawn(async move {
                engine.log_cc_request(&req, app_id, &ip, &policy);
            });
        }

        let hit = HitInfo {
            hit_type: Some(HitType::Cc),
            policy_id: policy.id,
            vuln_name: "CC".to_string(),
            action: Some(policy.action),
            client_id,
            target_url: req.target_url(),
            block_time: unix_now(),
        };
        Verdict::from_action(policy.action, hit)
    }

    fn policy_verdict(&self, req: &RequestInfo, app: &Application, client_ip: &str, policy: Policy) -> Verdict {
        if policy.action != PolicyAction::Pass {
            let engine = self.engine.clone();
            let req = req.clone();
            let ip = client_ip.to_string();
            let app_id = app.id;
            let policy = policy.clone();
            tokio::spawn(async move {
                engine.log_group_hit_request(&req, app_id, &ip, &policy);
            });
        }

        let vuln_name = self
            .engine
            .vuln_name(policy.vuln_id)
            .unwrap_or_else(|| GROUP_POLICY_HIT.to_string());
        let hit = HitInfo {
            hit_type: Some(HitType::ContentPolicy),
            policy_id: policy.id,
            vuln_name,
            action: Some(policy.action),
            client_id: client_id(client_ip, &req.path, req.user_agent(), req.cookie()),
            target_url: req.target_url(),
            block_time: unix_now(),
        };
        Verdict::from_action(policy.action, hit)
    }

    /// Single handler for every verdict.
    pub fn handle(&self, verdict: Verdict, app: &Application) -> Decision {
        match verdict {
            Verdict::Pass | Verdict::BypassAndLog => Decision::Continue,
            Verdict::Block(hit) => Decision::Respond(block_page(&hit)),
            Verdict::Challenge(hit) => {
                let location = format!("{}?id={}", self.captcha_entrance, hit.client_id);
                self.challenges
                    .store(hit, Duration::from_secs(app.session_seconds.max(1)));
                Decision::Respond(temporary_redirect(&location))
            }
        }
    }
}

/// `307 Temporary Redirect` to `location`.
pub fn temporary_redirect(location: &str) -> Response {
    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::TEMPORARY_REDIRECT;
    if let Ok(value) = HeaderValue::from_str(location) {
        response.headers_mut().insert(header::LOCATION, value);
    }
    response
}
