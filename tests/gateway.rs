//! Host routing and backend strategies through the full router.

mod common;

use std::sync::Arc;

use axum::http::{header, StatusCode};
use serde_json::json;

use common::*;
use waf_gateway::waf::NoopMatcher;

async fn start(data: serde_json::Value) -> TestGateway {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config(&dir);
    config.cdn.enabled = false;
    TestGateway::start(config, dir, snapshot(data), Arc::new(NoopMatcher)).await
}

#[tokio::test]
async fn test_unknown_host_gets_block_page() {
    let gw = start(json!({})).await;

    let resp = gw.send(get("nowhere.example.com", "/")).await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    let body = body_string(resp).await;
    assert!(body.contains("Unknown Host"));
}

#[tokio::test]
async fn test_redirect_domain_keeps_query() {
    let gw = start(json!({
        "domains": [{
            "id": 1, "name": "old.example.com", "app_id": 0, "cert_id": 0,
            "redirect": true, "location": "https://new.example.com/landing"
        }]
    }))
    .await;

    let resp = gw.send(get("old.example.com", "/anything?ref=mail")).await;
    assert_eq!(resp.status(), StatusCode::MOVED_PERMANENTLY);
    assert_eq!(
        resp.headers()[header::LOCATION],
        "https://new.example.com/landing?ref=mail"
    );
}

#[tokio::test]
async fn test_plain_request_upgraded_to_https() {
    let gw = start(json!({
        "domains": [{"id": 1, "name": "secure.example.com", "app_id": 1, "cert_id": 0}],
        "applications": [{
            "id": 1, "redirect_https": true,
            "destinations": [{"destination": "127.0.0.1:9"}]
        }]
    }))
    .await;

    let resp = gw.send(get("secure.example.com", "/account?tab=2")).await;
    assert_eq!(resp.status(), StatusCode::MOVED_PERMANENTLY);
    assert_eq!(
        resp.headers()[header::LOCATION],
        "https://secure.example.com/account?tab=2"
    );
}

#[tokio::test]
async fn test_reverse_proxy_forwards_request() {
    let backend = start_mock_backend(StatusCode::OK, "text/plain", "from backend").await;
    let gw = start(json!({
        "domains": [{"id": 1, "name": "www.example.com", "app_id": 1, "cert_id": 0}],
        "applications": [{
            "id": 1,
            "destinations": [{"destination": backend.addr.to_string()}]
        }]
    }))
    .await;

    let resp = gw.send(get("www.example.com", "/orders?page=3")).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_string(resp).await, "from backend");

    let seen = backend.requests();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].path_and_query, "/orders?page=3");
    assert_eq!(seen[0].headers[header::HOST], "www.example.com");
    let forwarded = seen[0].headers["x-forwarded-for"].to_str().unwrap();
    assert!(forwarded.contains("203.0.113.7"));
}

#[tokio::test]
async fn test_static_and_proxy_routes_are_exclusive() {
    let backend = start_mock_backend(StatusCode::OK, "text/plain", "dynamic").await;
    let site = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(site.path().join("docs")).unwrap();
    std::fs::write(site.path().join("docs").join("readme.txt"), "static readme").unwrap();
    std::fs::write(site.path().join("docs").join("index.html"), "docs index").unwrap();

    let gw = start(json!({
        "domains": [{"id": 1, "name": "www.example.com", "app_id": 1, "cert_id": 0}],
        "applications": [{
            "id": 1,
            "destinations": [
                {"id": 1, "request_route": "/", "destination": backend.addr.to_string()},
                {
                    "id": 2, "route_type": "static", "request_route": "/docs/",
                    "backend_route": site.path().to_string_lossy(),
                    "destination": "index.html"
                }
            ]
        }]
    }))
    .await;

    let resp = gw.send(get("www.example.com", "/docs/readme.txt")).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_string(resp).await, "static readme");

    let resp = gw.send(get("www.example.com", "/docs/")).await;
    assert_eq!(body_string(resp).await, "docs index");
    assert_eq!(backend.hits(), 0);

    let resp = gw.send(get("www.example.com", "/api/items")).await;
    assert_eq!(body_string(resp).await, "dynamic");
    assert_eq!(backend.hits(), 1);
}

#[tokio::test]
async fn test_unmatched_route_is_bad_gateway() {
    let gw = start(json!({
        "domains": [{"id": 1, "name": "www.example.com", "app_id": 1, "cert_id": 0}],
        "applications": [{
            "id": 1,
            "destinations": [{"request_route": "/api/", "destination": "127.0.0.1:9"}]
        }]
    }))
    .await;

    let resp = gw.send(get("www.example.com", "/home")).await;
    assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn test_unreachable_backend_is_bad_gateway() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let gw = start(json!({
        "domains": [{"id": 1, "name": "www.example.com", "app_id": 1, "cert_id": 0}],
        "applications": [{"id": 1, "destinations": [{"destination": addr.to_string()}]}]
    }))
    .await;

    let resp = gw.send(get("www.example.com", "/")).await;
    assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn test_request_id_is_propagated() {
    let gw = start(json!({})).await;
    let resp = gw.send(get("nowhere.example.com", "/")).await;
    assert!(resp.headers().contains_key("x-request-id"));
}

#[tokio::test]
async fn test_oversized_body_rejected_before_backend() {
    let backend = start_mock_backend(StatusCode::OK, "text/plain", "ok").await;
    let dir = tempfile::tempdir().unwrap();
    let mut config = config(&dir);
    config.cdn.enabled = false;
    config.listener.max_body_bytes = 16;
    let data = snapshot(json!({
        "domains": [{"id": 1, "name": "api.example.com", "app_id": 1, "cert_id": 0}],
        "applications": [{
            "id": 1,
            "destinations": [{"destination": backend.addr.to_string()}]
        }]
    }));
    let gw = TestGateway::start(config, dir, data, Arc::new(NoopMatcher)).await;

    let body = "x".repeat(64);
    let req = axum::http::Request::post("/upload")
        .header(header::HOST, "api.example.com")
        .header(header::CONTENT_LENGTH, body.len())
        .body(axum::body::Body::from(body))
        .unwrap();
    let resp = gw.send(req).await;
    assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(backend.hits(), 0);

    let resp = gw.send(get("api.example.com", "/upload")).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(backend.hits(), 1);
}
