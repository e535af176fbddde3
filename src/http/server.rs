//! HTTP server setup and wiring.
//!
//! # Responsibilities
//! - Construct the engine components from config
//! - Build the Axum router with all handlers
//! - Wire up middleware (trace, body limit, request timeout)
//! - Serve with graceful shutdown

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::audit::{AuditLog, AuditSink, JsonlFileSink};
use crate::config::KioskConfig;
use crate::coordinator::Coordinator;
use crate::decoder::DecodePipeline;
use crate::http::handlers;
use crate::inventory::{InventoryApi, InventoryClient, InventoryError};
use crate::security::rate_limit::{CounterStore, MemoryCounterStore, RateLimiter};
use crate::security::session::SessionManager;

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ArcSwap<KioskConfig>>,
    pub sessions: Arc<SessionManager>,
    pub coordinator: Coordinator,
    pub decoder: Arc<DecodePipeline>,
    pub limiter: Arc<RateLimiter>,
    pub inventory: Arc<dyn InventoryApi>,
    pub audit: AuditLog,
}

/// HTTP server for the kiosk engine.
pub struct HttpServer {
    router: Router,
    config: KioskConfig,
}

impl HttpServer {
    /// Wire the production components: HTTP inventory client, in-process
    /// counter store, JSONL audit file.
    pub fn new(config: KioskConfig) -> Result<Self, InventoryError> {
        let inventory: Arc<dyn InventoryApi> = Arc::new(InventoryClient::new(&config.inventory)?);
        let store: Arc<dyn CounterStore> = Arc::new(MemoryCounterStore::new());
        let sink = JsonlFileSink::open(std::path::Path::new(&config.audit.path))
            .map_err(|e| InventoryError::Configuration(format!("audit sink: {}", e)))?;
        Ok(Self::with_components(config, inventory, store, Box::new(sink)))
    }

    /// Wire the server around injected collaborators. Used by tests to swap
    /// in fakes (failing counter stores, scripted remotes, memory sinks).
    pub fn with_components(
        config: KioskConfig,
        inventory: Arc<dyn InventoryApi>,
        store: Arc<dyn CounterStore>,
        sink: Box<dyn AuditSink>,
    ) -> Self {
        let audit = AuditLog::new(sink);
        let limiter = Arc::new(RateLimiter::new(
            store,
            config.rate_limit.clone(),
            audit.clone(),
        ));
        let sessions = Arc::new(SessionManager::new(
            inventory.clone(),
            audit.clone(),
            config.session.clone(),
        ));
        let coordinator = Coordinator::new(
            inventory.clone(),
            limiter.clone(),
            audit.clone(),
            config.inventory.retries.clone(),
            config.decoder.max_code_len,
        );
        let decoder = Arc::new(DecodePipeline::new(config.decoder.clone()));

        let state = AppState {
            config: Arc::new(ArcSwap::from_pointee(config.clone())),
            sessions,
            coordinator,
            decoder,
            limiter,
            inventory,
            audit,
        };

        let router = Self::build_router(&config, state);
        Self { router, config }
    }

    /// Build the Axum router with all middleware layers.
    fn build_router(config: &KioskConfig, state: AppState) -> Router {
        Router::new()
            .route("/health", get(handlers::health))
            .route("/api/sign-in", post(handlers::sign_in))
            .route("/api/logout", post(handlers::logout))
            .route("/api/scan", post(handlers::scan))
            .route("/api/assets", get(handlers::my_assets))
            .route("/api/assets/{tag}", get(handlers::asset_info))
            .route("/api/public/assets/{tag}", get(handlers::public_asset_info))
            .route("/api/checkout", post(handlers::checkout))
            .route("/api/checkin", post(handlers::checkin))
            .route("/api/transfer", post(handlers::transfer))
            .with_state(state)
            .layer(
                tower::ServiceBuilder::new()
                    .layer(TraceLayer::new_for_http())
                    .layer(RequestBodyLimitLayer::new(config.security.max_body_size))
                    .layer(TimeoutLayer::new(Duration::from_secs(
                        config.listener.request_timeout_secs,
                    ))),
            )
    }

    /// Run the server, accepting connections on the given listener.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let app = self
            .router
            .into_make_service_with_connect_info::<SocketAddr>();

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("Shutdown signal received");
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    /// Get a reference to the config.
    pub fn config(&self) -> &KioskConfig {
        &self.config
    }
}
