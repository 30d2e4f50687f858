//! Host-level routing decided before any other processing.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::Response;

use crate::data::Application;
use crate::domain::{DomainEntry, Resolution};

/// What to do with a request given only its host and transport.
#[derive(Debug, Clone)]
pub enum HostRouting {
    /// `301` to this location.
    Redirect(String),
    UnknownHost,
    Proceed {
        entry: DomainEntry,
        app: Arc<Application>,
    },
}

/// Decide host-level routing. Redirect locations keep the query string.
pub fn route_host(
    resolution: Resolution,
    host: &str,
    path: &str,
    query: Option<&str>,
    tls: bool,
) -> HostRouting {
    let entry = match resolution {
        Resolution::Found(entry) => entry,
        Resolution::UnknownHost => return HostRouting::UnknownHost,
    };

    if entry.domain.redirect {
        return HostRouting::Redirect(with_query(entry.domain.location.clone(), query));
    }

    let Some(app) = entry.app.clone() else {
        return HostRouting::UnknownHost;
    };

    if !tls && app.redirect_https {
        return HostRouting::Redirect(with_query(format!("https://{host}{path}"), query));
    }

    HostRouting::Proceed { entry, app }
}

fn with_query(mut location: String, query: Option<&str>) -> String {
    if let Some(q) = query.filter(|q| !q.is_empty()) {
        location.push('?');
        location.push_str(q);
    }
    location
}

/// `301 Moved Permanently` to `location`.
pub fn moved_permanently(location: &str) -> Response {
    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::MOVED_PERMANENTLY;
    if let Ok(value) = HeaderValue::from_str(location) {
        response.headers_mut().insert(header::LOCATION, value);
    }
    response
}
