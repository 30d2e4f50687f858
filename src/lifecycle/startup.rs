//! Startup orchestration.
//!
//! # Responsibilities
//! - Build the data source for the node's role
//! - Initialize subsystems in dependency order and load domains and policies
//! - Start background tasks (sweepers, reload loop, data file watcher)
//! - Bind listeners and begin accepting traffic
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Listeners start last (traffic only when ready)
//! - A failed reload keeps the previous domain table and policy set

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use crate::auth::{build_provider, OAuthGate, OAuthStateCache, SessionCodec};
use crate::cdn::{CdnError, CdnService};
use crate::config::{GatewayConfig, NodeRole};
use crate::data::watcher::{DataWatcher, ReloadTrigger};
use crate::data::{DataError, DataSource, FileDataSource, RpcDataSource};
use crate::domain::DomainResolver;
use crate::http::{Gateway, HttpServer};
use crate::lifecycle::{signals, Shutdown};
use crate::proxy::{Backends, FastCgiClient, RouteSelector, UpstreamTransport};
use crate::waf::{ChallengeStore, LocalWafEngine, NoopMatcher, PolicyMatcher, WafGuard};

/// Errors that abort startup.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("data source: {0}")]
    Data(#[from] DataError),

    #[error("static cache: {0}")]
    Cdn(#[from] CdnError),

    #[error("TLS setup: {0}")]
    Tls(#[from] rustls::Error),

    #[error("invalid session secret: {0}")]
    SessionSecret(String),

    #[error("invalid listen address {0}")]
    Address(String),

    #[error("data file watcher: {0}")]
    Watch(#[from] notify::Error),

    #[error("listener: {0}")]
    Io(#[from] std::io::Error),
}

/// A data source plus, on primary nodes, the file behind it.
#[derive(Clone)]
pub struct DataHandle {
    pub source: Arc<dyn DataSource>,
    pub file: Option<Arc<FileDataSource>>,
}

impl DataHandle {
    pub fn from_config(config: &GatewayConfig) -> Result<Self, DataError> {
        match config.node.role {
            NodeRole::Primary => {
                let file = Arc::new(FileDataSource::open(&config.node.data_file)?);
                Ok(Self {
                    source: file.clone(),
                    file: Some(file),
                })
            }
            NodeRole::Secondary => {
                let rpc = RpcDataSource::new(
                    &config.node.rpc_url,
                    &config.node.rpc_key,
                    Duration::from_secs(config.node.rpc_timeout_secs),
                )?;
                Ok(Self {
                    source: Arc::new(rpc),
                    file: None,
                })
            }
        }
    }
}

/// Assembled gateway plus the handles background tasks need.
pub struct Runtime {
    pub gateway: Arc<Gateway>,
    pub waf: Arc<LocalWafEngine>,
    pub data: DataHandle,
}

impl Runtime {
    /// Build every subsystem. Nothing is loaded and no task is spawned yet.
    pub fn build(
        config: &GatewayConfig,
        data: DataHandle,
        matcher: Arc<dyn PolicyMatcher>,
    ) -> Result<Self, StartupError> {
        let domains = DomainResolver::new(data.source.clone());

        let waf = Arc::new(LocalWafEngine::new(matcher, config.waf.static_extensions.clone()));
        let guard = WafGuard::new(waf.clone(), ChallengeStore::new(), &config.waf.captcha_entrance);

        let codec = SessionCodec::new(&session_secret(config))
            .map_err(|e| StartupError::SessionSecret(e.to_string()))?;
        let oauth = OAuthGate::new(
            config.oauth.enabled,
            build_provider(&config.oauth),
            OAuthStateCache::new(Duration::from_secs(config.oauth.state_ttl_secs)),
            codec,
        );

        let cdn = if config.cdn.enabled {
            Some(CdnService::new(&config.cdn)?)
        } else {
            None
        };

        let backends = Backends {
            routes: RouteSelector::new(),
            fastcgi: FastCgiClient {
                connect_timeout: Duration::from_secs(config.timeouts.connect_secs),
                idle_timeout: Duration::from_secs(config.timeouts.idle_secs),
                max_body_bytes: config.listener.max_body_bytes,
            },
            transport: UpstreamTransport::new(&config.timeouts)?,
        };

        Ok(Self {
            gateway: Arc::new(Gateway {
                domains,
                cdn,
                waf: guard,
                oauth,
                backends,
            }),
            waf,
            data,
        })
    }

    /// Reload domains and policies from the data source.
    pub async fn reload(&self) {
        if let Some(file) = &self.data.file {
            if let Err(e) = file.refresh().await {
                tracing::error!(error = %e, "Failed to re-read data file, keeping current data");
                return;
            }
        }
        match self.gateway.domains.reload().await {
            Ok(count) => tracing::info!(domains = count, "Domain table reloaded"),
            Err(e) => tracing::error!(error = %e, "Domain reload failed, keeping previous table"),
        }
        if let Err(e) = self.waf.reload(self.data.source.as_ref()).await {
            tracing::error!(error = %e, "Policy reload failed, keeping previous policies");
        }
    }

    /// Start sweepers for counters, challenges and pending logins.
    pub fn spawn_sweepers(&self, config: &GatewayConfig, shutdown: &Shutdown) {
        let waf_interval = Duration::from_secs(config.waf.sweep_interval_secs.max(1));
        self.waf.spawn_sweeper(waf_interval, shutdown);
        self.gateway.waf.challenges().spawn_sweeper(waf_interval, shutdown);
        self.gateway.oauth.cache().spawn_sweeper(
            Duration::from_secs(config.oauth.sweep_interval_secs.max(1)),
            shutdown,
        );
    }

    /// Run reloads requested by the watcher or SIGHUP until shutdown.
    pub fn spawn_reload_loop(
        self: &Arc<Self>,
        mut reload_rx: mpsc::UnboundedReceiver<ReloadTrigger>,
        shutdown: &Shutdown,
    ) {
        let runtime = self.clone();
        let mut shutdown_rx = shutdown.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    trigger = reload_rx.recv() => {
                        let Some(trigger) = trigger else { break };
                        // editors and renames emit bursts of events
                        tokio::time::sleep(Duration::from_millis(200)).await;
                        while reload_rx.try_recv().is_ok() {}
                        tracing::info!(trigger = ?trigger, "Reloading domains and policies");
                        runtime.reload().await;
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
        });
    }
}

/// HMAC key for session cookies. An empty configured secret gets a random
/// key, which invalidates sessions on restart.
pub fn session_secret(config: &GatewayConfig) -> Vec<u8> {
    if !config.session.secret.is_empty() {
        return config.session.secret.as_bytes().to_vec();
    }
    tracing::warn!("session.secret is empty, using a random key; sessions will not survive a restart");
    rand::thread_rng().gen::<[u8; 32]>().to_vec()
}

/// Run the gateway until a termination signal.
pub async fn run(config: GatewayConfig) -> Result<(), StartupError> {
    let shutdown = Shutdown::new();
    signals::spawn_shutdown_listener(&shutdown);

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse::<SocketAddr>() {
            Ok(addr) => crate::observability::metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let data = DataHandle::from_config(&config)?;
    let runtime = Arc::new(Runtime::build(&config, data, Arc::new(NoopMatcher))?);
    runtime.reload().await;
    runtime.spawn_sweepers(&config, &shutdown);

    let (reload_tx, reload_rx) = mpsc::unbounded_channel();
    signals::spawn_reload_listener(reload_tx.clone(), &shutdown);
    let _watcher = match (&runtime.data.file, config.node.watch_data_file) {
        (Some(file), true) => match file.path() {
            Some(path) => Some(DataWatcher::new(path, reload_tx.clone()).run()?),
            None => None,
        },
        _ => None,
    };
    runtime.spawn_reload_loop(reload_rx, &shutdown);

    let server = Arc::new(HttpServer::new(config.clone(), runtime.gateway.clone()));

    let https = match &config.listener.https_address {
        Some(address) => {
            let addr: SocketAddr = address
                .parse()
                .map_err(|_| StartupError::Address(address.clone()))?;
            let tls = crate::net::rustls_config(runtime.gateway.domains.clone())?;
            let server = server.clone();
            let shutdown = shutdown.clone();
            Some(tokio::spawn(async move { server.run_tls(addr, tls, shutdown).await }))
        }
        None => None,
    };

    let listener = TcpListener::bind(&config.listener.http_address).await?;
    server.run(listener, shutdown.clone()).await?;

    if let Some(https) = https {
        match https.await {
            Ok(result) => result?,
            Err(e) => tracing::error!(error = %e, "HTTPS listener task failed"),
        }
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
