//! HTTP server bootstrap for the close reconciler.
//!
//! This module wires together:
//! - configuration
//! - the ledger gateway and proof oracle clients
//! - the reconciliation loop
//! - the Axum router

use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::{HeaderValue, Method};
use axum::Router;
use tokio::signal;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, Level};
use tracing_subscriber::EnvFilter;

use crate::config::{json_logs_from_env, AppConfig};
use crate::infra::{LedgerGateway, ProofOracle};
use crate::ledger::AlloyLedgerGateway;
use crate::metrics::MetricsRegistry;
use crate::oracle::{HttpProofOracle, ProofSource};
use crate::reconciler::Reconciler;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub reconciler: Arc<Reconciler>,
    pub metrics: Arc<MetricsRegistry>,
}

impl AppState {
    pub fn new(reconciler: Arc<Reconciler>, metrics: Arc<MetricsRegistry>) -> Self {
        Self {
            reconciler,
            metrics,
        }
    }
}

/// Start the HTTP server.
///
/// Logging is installed before anything else so startup failures reach it.
pub async fn run() -> anyhow::Result<()> {
    init_tracing(json_logs_from_env());

    info!("Starting close reconciler v{}", env!("CARGO_PKG_VERSION"));

    let (app, listen_addr) = match prepare() {
        Ok(prepared) => prepared,
        Err(e) => {
            error!(error = %e, "Startup failed");
            return Err(e);
        }
    };

    info!("Starting HTTP server on {}", listen_addr);
    let listener = tokio::net::TcpListener::bind(listen_addr).await?;

    info!("Close reconciler is ready to accept connections");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

/// Load configuration and build the application around the live clients.
fn prepare() -> anyhow::Result<(Router, SocketAddr)> {
    let config = AppConfig::from_env()?;

    info!("Configuration loaded");
    info!("  Listen address: {}", config.server.listen_addr);
    info!("  RPC URL: {}", config.ledger.rpc_url);
    info!("  Contract: {}", config.ledger.contract_address);
    info!("  Proof service: {}", config.oracle.base_url);
    info!("  Proof mode: {}", config.oracle.mode);
    info!(
        "  Submission: {} attempts, {:?} apart (x{}, cap {:?}), gas limit {}",
        config.reconciler.retry.max_attempts(),
        config.reconciler.retry.initial_delay,
        config.reconciler.retry.multiplier,
        config.reconciler.retry.max_delay,
        config.reconciler.gas_limit
    );

    let ledger: Arc<dyn LedgerGateway> = Arc::new(AlloyLedgerGateway::new(&config.ledger)?);
    let oracle: Arc<dyn ProofOracle> = Arc::new(HttpProofOracle::new(&config.oracle)?);
    let metrics = Arc::new(MetricsRegistry::new());

    let reconciler = Arc::new(Reconciler::new(
        ledger,
        ProofSource::new(config.oracle.mode, oracle),
        config.reconciler.clone(),
        metrics.clone(),
    ));

    let state = AppState::new(reconciler, metrics);
    let app = build_router(state, config.server.cors_allow_origins.as_deref())?;

    Ok((app, config.server.listen_addr))
}

fn init_tracing(json: bool) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(Level::INFO.to_string()));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_thread_ids(true);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Build the full application with middleware.
pub fn build_router(state: AppState, cors_allow_origins: Option<&str>) -> anyhow::Result<Router> {
    let mut router = crate::api::router().layer(TraceLayer::new_for_http());

    if let Some(cors_layer) = cors_layer(cors_allow_origins)? {
        router = router.layer(cors_layer);
    }

    Ok(router.with_state(state))
}

fn cors_layer(origins: Option<&str>) -> anyhow::Result<Option<CorsLayer>> {
    let origins = match origins.map(str::trim) {
        Some(v) if !v.is_empty() => v,
        _ => return Ok(None),
    };

    let allow_origin = if origins == "*" {
        AllowOrigin::any()
    } else {
        let origins: Vec<HeaderValue> = origins
            .split(',')
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(|s| {
                s.parse::<HeaderValue>()
                    .map_err(|e| anyhow::anyhow!("Invalid CORS origin {s:?}: {e}"))
            })
            .collect::<anyhow::Result<_>>()?;
        AllowOrigin::list(origins)
    };

    Ok(Some(
        CorsLayer::new()
            .allow_origin(allow_origin)
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers([axum::http::header::CONTENT_TYPE]),
    ))
}

/// Resolve on Ctrl+C or SIGTERM.
///
/// A pass already running finishes its current request before the process exits.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
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
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown...");
        }
    }
}
