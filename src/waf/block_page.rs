//! HTML block page for intercepted requests.

use axum::body::Body;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::Response;

use crate::waf::model::HitInfo;

/// Render the 403 block page describing `hit`.
pub fn block_page(hit: &HitInfo) -> Response {
    let html = render_block_page(hit);
    let mut response = Response::new(Body::from(html));
    *response.status_mut() = StatusCode::FORBIDDEN;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/html; charset=utf-8"),
    );
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    response
}

pub fn render_block_page(hit: &HitInfo) -> String {
    let reason = escape_html(&hit.vuln_name);
    let policy = if hit.policy_id > 0 {
        format!("<p>Policy ID: {}</p>", hit.policy_id)
    } else {
        String::new()
    };
    BLOCK_PAGE_HTML
        .replace("{reason}", &reason)
        .replace("{policy}", &policy)
}

fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

const BLOCK_PAGE_HTML: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="UTF-8">
  <title>Request Blocked</title>
  <style>
    body { font-family: sans-serif; background: #f9f9f9; margin: 2em; }
    .block-container { background: #fff; padding: 2em; border-radius: 8px; box-shadow: 0 2px 8px #ccc; max-width: 480px; margin: auto; }
    h1 { color: #c00; }
  </style>
</head>
<body>
  <div class="block-container">
    <h1>Request Blocked</h1>
    <p>Reason: {reason}</p>
    {policy}
    <p>If you believe this is an error, please contact the site administrator.</p>
  </div>
</body>
</html>
"#;
