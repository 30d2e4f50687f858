//! Static website strategy.

use std::path::Path;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Response};
use tower::ServiceExt;
use tower_http::services::{ServeDir, ServeFile};

use crate::data::Destination;

/// Serve `req` from the destination's `backend_route` directory. A path
/// ending in `/` serves `backend_route + path + destination`, the default
/// document.
pub async fn serve_static(dest: &Destination, req: Request<Body>) -> Response {
    let path = req.uri().path().to_string();
    if path.split('/').any(|segment| segment == "..") {
        return StatusCode::NOT_FOUND.into_response();
    }

    if path.ends_with('/') {
        let file = format!("{}{}{}", dest.backend_route, path, dest.destination);
        return serve_file(Path::new(&file), req).await;
    }

    match ServeDir::new(&dest.backend_route).oneshot(req).await {
        Ok(resp) => resp.map(Body::new),
        Err(never) => match never {},
    }
}

/// Serve one file regardless of the request path.
pub async fn serve_file(file: &Path, req: Request<Body>) -> Response {
    match ServeFile::new(file).oneshot(req).await {
        Ok(resp) => resp.map(Body::new),
        Err(never) => match never {},
    }
}
