//! WAF checks through the full router.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::http::{header, StatusCode};
use serde_json::json;

use common::*;
use waf_gateway::waf::challenge::client_id;
use waf_gateway::waf::{Policy, PolicyMatcher, RequestInfo};

fn data(backend: &MockBackend, cc_action: u16, policy_action: u16) -> serde_json::Value {
    json!({
        "domains": [{"id": 1, "name": "shop.example.com", "app_id": 1, "cert_id": 0}],
        "applications": [{
            "id": 1, "waf_enabled": true,
            "destinations": [{"destination": backend.addr.to_string()}]
        }],
        "cc_policies": [{
            "id": 7, "app_id": 0, "interval_ms": 60000, "max_count": 2,
            "block_secs": 60, "action": cc_action
        }],
        "policies": [{"id": 11, "app_id": 0, "vuln_id": 3, "action": policy_action}],
        "vuln_types": [{"id": 3, "name": "SQL Injection"}]
    })
}

async fn start(data: serde_json::Value, matcher: Arc<dyn PolicyMatcher>) -> TestGateway {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config(&dir);
    config.cdn.enabled = false;
    TestGateway::start(config, dir, snapshot(data), matcher).await
}

/// Matcher hitting paths that start with `/login` and counting its calls.
fn login_matcher(calls: Arc<AtomicUsize>) -> Arc<dyn PolicyMatcher> {
    Arc::new(move |_: &Policy, req: &RequestInfo, _: &str| {
        calls.fetch_add(1, Ordering::SeqCst);
        req.path.starts_with("/login")
    })
}

#[tokio::test]
async fn test_cc_block_short_circuits_content_check() {
    let backend = start_mock_backend(StatusCode::OK, "text/plain", "ok").await;
    let calls = Arc::new(AtomicUsize::new(0));
    let gw = start(data(&backend, 100, 100), login_matcher(calls.clone())).await;

    for _ in 0..2 {
        let resp = gw.send(get("shop.example.com", "/catalog")).await;
        assert_eq!(resp.status(), StatusCode::OK);
    }
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    let resp = gw.send(get("shop.example.com", "/catalog")).await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    assert!(body_string(resp).await.contains("CC"));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(backend.hits(), 2);

    // still blocked inside the block window
    let resp = gw.send(get("shop.example.com", "/catalog")).await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_content_policy_block_page_names_vulnerability() {
    let backend = start_mock_backend(StatusCode::OK, "text/plain", "ok").await;
    let calls = Arc::new(AtomicUsize::new(0));
    let gw = start(data(&backend, 400, 100), login_matcher(calls)).await;

    let resp = gw.send(get("shop.example.com", "/login?user=admin")).await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    let body = body_string(resp).await;
    assert!(body.contains("SQL Injection"));
    assert!(body.contains("11"));
    assert_eq!(backend.hits(), 0);
}

#[tokio::test]
async fn test_captcha_redirect_records_hit() {
    let backend = start_mock_backend(StatusCode::OK, "text/plain", "ok").await;
    let calls = Arc::new(AtomicUsize::new(0));
    let gw = start(data(&backend, 400, 300), login_matcher(calls)).await;

    let resp = gw.send(get("shop.example.com", "/login")).await;
    assert_eq!(resp.status(), StatusCode::TEMPORARY_REDIRECT);

    let id = client_id("203.0.113.7", "/login", "integration-test", "");
    assert_eq!(
        resp.headers()[header::LOCATION],
        format!("/captcha/get?id={}", id).as_str()
    );

    let hit = gw.runtime.gateway.waf.challenges().get(&id).unwrap();
    assert_eq!(hit.policy_id, 11);
    assert_eq!(hit.vuln_name, "SQL Injection");
    assert_eq!(backend.hits(), 0);
}

#[tokio::test]
async fn test_bypass_and_log_forwards() {
    let backend = start_mock_backend(StatusCode::OK, "text/plain", "ok").await;
    let calls = Arc::new(AtomicUsize::new(0));
    let gw = start(data(&backend, 400, 200), login_matcher(calls)).await;

    let resp = gw.send(get("shop.example.com", "/login")).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(backend.hits(), 1);
}

#[tokio::test]
async fn test_static_resource_skips_checks() {
    let backend = start_mock_backend(StatusCode::OK, "image/png", "png").await;
    let calls = Arc::new(AtomicUsize::new(0));
    let gw = start(data(&backend, 100, 100), login_matcher(calls.clone())).await;

    for _ in 0..5 {
        let resp = gw.send(get("shop.example.com", "/login/logo.png")).await;
        assert_eq!(resp.status(), StatusCode::OK);
    }
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(backend.hits(), 5);
}

#[tokio::test]
async fn test_waf_disabled_application_is_not_checked() {
    let backend = start_mock_backend(StatusCode::OK, "text/plain", "ok").await;
    let calls = Arc::new(AtomicUsize::new(0));
    let mut data = data(&backend, 100, 100);
    data["applications"][0]["waf_enabled"] = json!(false);
    let gw = start(data, login_matcher(calls.clone())).await;

    for _ in 0..4 {
        let resp = gw.send(get("shop.example.com", "/login")).await;
        assert_eq!(resp.status(), StatusCode::OK);
    }
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}
