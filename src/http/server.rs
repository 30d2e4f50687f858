//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum Router (logout route + catch-all dispatcher)
//! - Wire up middleware (request ID, tracing, panic guard, timeout, body limit)
//! - Serve plaintext and TLS listeners with graceful shutdown

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::Extension;
use axum::http::StatusCode;
use axum::routing::any;
use axum::Router;
use axum_server::tls_rustls::RustlsConfig;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    catch_panic::CatchPanicLayer,
    limit::RequestBodyLimitLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::auth::logout_response;
use crate::config::GatewayConfig;
use crate::http::dispatch::{dispatch, Gateway, Listener};
use crate::lifecycle::Shutdown;

/// Path that ends the OAuth session.
pub const LOGOUT_PATH: &str = "/oauth/logout";

/// HTTP server for the gateway.
pub struct HttpServer {
    gateway: Arc<Gateway>,
    config: GatewayConfig,
}

impl HttpServer {
    pub fn new(config: GatewayConfig, gateway: Arc<Gateway>) -> Self {
        Self { gateway, config }
    }

    /// Build the Axum router with all middleware layers.
    pub fn build_router(config: &GatewayConfig, gateway: Arc<Gateway>, tls: bool) -> Router {
        Router::new()
            .route(LOGOUT_PATH, any(|| async { logout_response() }))
            .fallback(dispatch)
            .with_state(gateway)
            .layer(
                ServiceBuilder::new()
                    .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                    .layer(TraceLayer::new_for_http())
                    .layer(PropagateRequestIdLayer::x_request_id())
                    .layer(CatchPanicLayer::new())
                    .layer(RequestBodyLimitLayer::new(config.listener.max_body_bytes))
                    .layer(TimeoutLayer::with_status_code(
                        StatusCode::GATEWAY_TIMEOUT,
                        Duration::from_secs(config.timeouts.request_secs),
                    ))
                    .layer(Extension(Listener { tls })),
            )
    }

    /// Serve plaintext HTTP until shutdown.
    pub async fn run(&self, listener: TcpListener, shutdown: Shutdown) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP listener starting");

        let app = Self::build_router(&self.config, self.gateway.clone(), false)
            .into_make_service_with_connect_info::<SocketAddr>();

        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.triggered().await })
            .await?;

        tracing::info!(address = %addr, "HTTP listener stopped");
        Ok(())
    }

    /// Serve HTTPS until shutdown. Certificates come from `tls`.
    pub async fn run_tls(
        &self,
        addr: SocketAddr,
        tls: RustlsConfig,
        shutdown: Shutdown,
    ) -> Result<(), std::io::Error> {
        tracing::info!(address = %addr, "HTTPS listener starting");

        let handle = axum_server::Handle::new();
        let drain = handle.clone();
        tokio::spawn(async move {
            shutdown.triggered().await;
            drain.graceful_shutdown(Some(Duration::from_secs(10)));
        });

        let app = Self::build_router(&self.config, self.gateway.clone(), true)
            .into_make_service_with_connect_info::<SocketAddr>();

        axum_server::bind_rustls(addr, tls)
            .handle(handle)
            .serve(app)
            .await?;

        tracing::info!(address = %addr, "HTTPS listener stopped");
        Ok(())
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }
}
