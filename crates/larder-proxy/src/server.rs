use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use larder_core::HostSignals;
use larder_telemetry::TelemetryBuffer;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::fatsecret::FatSecretClient;
use crate::handlers::{self, ProxyState};

/// Proxy listener configuration.
#[derive(Clone, Debug)]
pub struct ProxyConfig {
    pub host: String,
    pub port: u16,
    pub default_max_results: u32,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 9092,
            default_max_results: 20,
        }
    }
}

/// Build the Axum router with all routes.
pub fn build_router(state: ProxyState) -> Router {
    Router::new()
        .route(
            "/food-search",
            post(handlers::food_search).options(handlers::preflight),
        )
        .route(
            "/barcode-lookup",
            post(handlers::barcode_lookup).options(handlers::preflight),
        )
        .route(
            "/food-details",
            post(handlers::food_details).options(handlers::preflight),
        )
        .route(
            "/health",
            get(handlers::health).options(handlers::preflight),
        )
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Bind and serve the proxy. Returns a handle to stop it.
///
/// The serve loop runs as a monitored task: if it ends with an error,
/// `signals` carries it out as an unhandled rejection.
pub async fn start(
    config: ProxyConfig,
    client: FatSecretClient,
    telemetry: Option<TelemetryBuffer>,
    signals: &HostSignals,
) -> Result<ServerHandle, std::io::Error> {
    if !client.is_configured() {
        tracing::warn!("FatSecret credentials not configured; proxy requests will fail");
    }

    let state = ProxyState {
        client: Arc::new(client),
        telemetry,
        default_max_results: config.default_max_results,
    };
    let router = build_router(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;
    tracing::info!(host = %config.host, port = local_addr.port(), "nutrition proxy started");

    let shutdown = CancellationToken::new();
    let server = {
        let shutdown = shutdown.clone();
        signals.spawn_monitored("nutrition_proxy", async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(shutdown.cancelled_owned())
                .await
                .inspect_err(|e| tracing::error!(error = %e, "nutrition proxy stopped with error"))
        })
    };

    Ok(ServerHandle {
        port: local_addr.port(),
        shutdown,
        server,
    })
}

/// Handle returned by `start()`.
pub struct ServerHandle {
    pub port: u16,
    shutdown: CancellationToken,
    server: tokio::task::JoinHandle<()>,
}

impl ServerHandle {
    /// Stop accepting connections and wait for in-flight requests.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        let _ = self.server.await;
        tracing::info!(port = self.port, "nutrition proxy stopped");
    }
}
