//! HTTP server lifecycle

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use super::conn::{ConnectionLimits, serve_connection};
use super::router::{AppState, create_router};
use crate::config::Config;
use crate::metrics::{MetricsSink, PrometheusSink};
use crate::oauth::ClientRegistry;
use crate::{Error, Result};

/// Time allowed for in-flight requests after a shutdown signal
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Interval between background registry reload checks
pub const REGISTRY_RELOAD_INTERVAL: Duration = Duration::from_secs(30);

/// Omnidrop HTTP server
pub struct Server {
    config: Config,
}

impl Server {
    /// Create a server from validated configuration
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Bind, serve until SIGINT/SIGTERM, then drain
    pub async fn run(self) -> Result<()> {
        let host: IpAddr = self
            .config
            .host
            .parse()
            .map_err(|e| Error::Config(format!("Invalid host '{}': {e}", self.config.host)))?;
        let addr = SocketAddr::new(host, self.config.port);

        let metrics: Arc<dyn MetricsSink> = Arc::new(PrometheusSink::new());
        let state = Arc::new(AppState::from_config(&self.config, metrics)?);
        let registry = Arc::clone(&state.registry);
        let app = create_router(state);

        let listener = TcpListener::bind(addr).await?;

        info!("============================================================");
        info!("OMNIDROP v{}", env!("CARGO_PKG_VERSION"));
        info!("============================================================");
        info!(addr = %addr, environment = %self.config.environment, "Listening");
        info!(script = %self.config.script_path.display(), "Task bridge");
        info!(base_dir = %self.config.files_dir.display(), "File writes");
        info!(
            registry = %self.config.oauth_clients_file.display(),
            clients = registry.list().len(),
            token_expiry = %humantime::format_duration(self.config.token_expiry),
            "OAuth client credentials"
        );
        if self.config.legacy_auth_enabled {
            warn!("LEGACY AUTH enabled - the shared TOKEN is accepted after signed tokens");
        }
        info!("============================================================");

        let (shutdown_tx, _) = broadcast::channel(1);
        spawn_registry_reload(registry, shutdown_tx.subscribe());

        let limits = ConnectionLimits::default();
        let mut connections = JoinSet::new();
        let signal = shutdown_signal();
        tokio::pin!(signal);

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        connections.spawn(serve_connection(
                            stream,
                            peer,
                            app.clone(),
                            limits,
                            shutdown_tx.subscribe(),
                        ));
                    }
                    Err(e) => {
                        // EMFILE and friends; back off instead of spinning
                        warn!(error = %e, "Failed to accept connection");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                },
                Some(joined) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(e) = joined {
                        error!(error = %e, "Connection task failed");
                    }
                }
                () = &mut signal => break,
            }
        }

        drop(listener);
        info!(
            grace_secs = SHUTDOWN_GRACE.as_secs(),
            connections = connections.len(),
            "Draining in-flight requests"
        );
        let _ = shutdown_tx.send(());

        let drained = tokio::time::timeout(SHUTDOWN_GRACE, async {
            while connections.join_next().await.is_some() {}
        })
        .await;
        if drained.is_ok() {
            info!("Shutdown complete");
        } else {
            warn!(
                connections = connections.len(),
                "Grace period elapsed, closing remaining connections"
            );
            connections.abort_all();
        }
        Ok(())
    }
}

/// Re-check the registry file every [`REGISTRY_RELOAD_INTERVAL`] until shutdown
fn spawn_registry_reload(registry: Arc<ClientRegistry>, mut shutdown_rx: broadcast::Receiver<()>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(REGISTRY_RELOAD_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately; the registry was just loaded.
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let registry = Arc::clone(&registry);
                    match tokio::task::spawn_blocking(move || registry.reload()).await {
                        Ok(Ok(true)) => debug!("Client registry changed on disk"),
                        Ok(Ok(false)) => {}
                        Ok(Err(e)) => warn!(error = %e, "Client registry reload failed"),
                        Err(e) => error!(error = %e, "Client registry reload task failed"),
                    }
                }
                _ = shutdown_rx.recv() => {
                    debug!("Registry reload task stopped");
                    break;
                }
            }
        }
    });
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
}
