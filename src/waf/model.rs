//! WAF policy and interception records.

use serde::{Deserialize, Serialize};

/// Action attached to a CC or content policy.
///
/// Serialized as the numeric codes used by the policy store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(try_from = "u16", into = "u16")]
pub enum PolicyAction {
    Block,
    BypassAndLog,
    Captcha,
    Pass,
}

impl PolicyAction {
    pub fn code(&self) -> u16 {
        match self {
            PolicyAction::Block => 100,
            PolicyAction::BypassAndLog => 200,
            PolicyAction::Captcha => 300,
            PolicyAction::Pass => 400,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PolicyAction::Block => "block",
            PolicyAction::BypassAndLog => "bypass_and_log",
            PolicyAction::Captcha => "captcha",
            PolicyAction::Pass => "pass",
        }
    }
}

impl TryFrom<u16> for PolicyAction {
    type Error = String;

    fn try_from(code: u16) -> Result<Self, Self::Error> {
        match code {
            100 => Ok(PolicyAction::Block),
            200 => Ok(PolicyAction::BypassAndLog),
            300 => Ok(PolicyAction::Captcha),
            400 => Ok(PolicyAction::Pass),
            other => Err(format!("unknown policy action code {}", other)),
        }
    }
}

impl From<PolicyAction> for u16 {
    fn from(action: PolicyAction) -> Self {
        action.code()
    }
}

/// Rate-style (challenge control) policy of one application.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct CcPolicy {
    pub id: i64,
    pub app_id: i64,
    /// Counting window in milliseconds.
    pub interval_ms: u64,
    /// Requests allowed inside one window.
    pub max_count: u64,
    /// How long a client stays classified as an attacker.
    pub block_secs: u64,
    pub action: PolicyAction,
    #[serde(default)]
    pub stat_by_url: bool,
    #[serde(default)]
    pub stat_by_user_agent: bool,
    #[serde(default)]
    pub stat_by_cookie: bool,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

/// Content-matching policy. The predicate deciding a hit lives outside the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Policy {
    pub id: i64,
    /// Zero applies to every application.
    #[serde(default)]
    pub app_id: i64,
    pub vuln_id: i64,
    pub action: PolicyAction,
    #[serde(default)]
    pub description: String,
}

/// Vulnerability category referenced by content policies.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct VulnType {
    pub id: i64,
    pub name: String,
}

/// Which check intercepted a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum HitType {
    Cc,
    ContentPolicy,
}

impl HitType {
    pub fn as_str(&self) -> &'static str {
        match self {
            HitType::Cc => "cc",
            HitType::ContentPolicy => "policy",
        }
    }
}

/// Why a request was intercepted. Rendered into a block page or held for a CAPTCHA.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HitInfo {
    pub hit_type: Option<HitType>,
    pub policy_id: i64,
    pub vuln_name: String,
    pub action: Option<PolicyAction>,
    pub client_id: String,
    pub target_url: String,
    /// Seconds since epoch.
    pub block_time: u64,
}

impl HitInfo {
    /// Hit info for a host the gateway does not serve.
    pub fn unknown_host() -> Self {
        Self {
            hit_type: None,
            policy_id: 0,
            vuln_name: "Unknown Host".to_string(),
            action: None,
            client_id: String::new(),
            target_url: String::new(),
            block_time: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_codes() {
        let policy: CcPolicy = serde_json::from_str(
            r#"{"id":1,"app_id":2,"interval_ms":100,"max_count":5,"block_secs":60,"action":300}"#,
        )
        .unwrap();
        assert_eq!(policy.action, PolicyAction::Captcha);
        assert!(policy.enabled);
        assert_eq!(serde_json::to_string(&PolicyAction::Block).unwrap(), "100");
    }

    #[test]
    fn test_unknown_action_rejected() {
        let res: Result<PolicyAction, _> = serde_json::from_str("150");
        assert!(res.is_err());
    }
}
