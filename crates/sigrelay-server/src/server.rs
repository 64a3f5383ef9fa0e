//! `RelayServer`: Axum HTTP + WebSocket listener.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use axum::extract::{Request, State};
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::http::header::{CONTENT_TYPE, UPGRADE};
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use metrics_exporter_prometheus::PrometheusHandle;
use sigrelay_settings::RelaySettings;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::bots::spawn_bot_sweeper;
use crate::cors::{self, CorsPolicy};
use crate::error::ServerError;
use crate::health::{self, StatusResponse};
use crate::hub::{HubConfig, SignalHub};
use crate::metrics::{record_scrape, render};
use crate::notify::{Notifier, TelegramNotifier};
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::{SocketSettings, serve_socket};

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Peer and bot state.
    pub hub: Arc<SignalHub>,
    /// When the server started.
    pub start_time: Instant,
    /// Prometheus handle, if a recorder was installed.
    pub metrics: Option<PrometheusHandle>,
    /// Per-socket transport settings.
    pub socket: SocketSettings,
}

/// The relay server.
pub struct RelayServer {
    settings: RelaySettings,
    hub: Arc<SignalHub>,
    cors: Arc<CorsPolicy>,
    metrics: Option<PrometheusHandle>,
    shutdown: Arc<ShutdownCoordinator>,
    start_time: Instant,
}

impl RelayServer {
    /// Create a server, with a Telegram notifier if notifications are
    /// enabled.
    pub fn new(settings: RelaySettings, metrics: Option<PrometheusHandle>) -> Self {
        let notifier: Option<Arc<dyn Notifier>> = if settings.notifications.enabled {
            match TelegramNotifier::new(&settings.notifications) {
                Ok(n) => Some(Arc::new(n)),
                Err(e) => {
                    warn!(error = %e, "notifications disabled");
                    None
                }
            }
        } else {
            None
        };
        Self::with_notifier(settings, metrics, notifier)
    }

    /// Create a server with an explicit notifier.
    pub fn with_notifier(
        settings: RelaySettings,
        metrics: Option<PrometheusHandle>,
        notifier: Option<Arc<dyn Notifier>>,
    ) -> Self {
        Self {
            hub: Arc::new(SignalHub::new(HubConfig::from(&settings), notifier)),
            cors: Arc::new(CorsPolicy::from_settings(&settings.cors)),
            settings,
            metrics,
            shutdown: Arc::new(ShutdownCoordinator::new()),
            start_time: Instant::now(),
        }
    }

    /// Build the Axum router with all routes.
    ///
    /// WebSocket upgrades are taken on every path before routing, so
    /// `/status` and `/metrics` only answer plain requests.
    pub fn router(&self) -> Router {
        let state = AppState {
            hub: Arc::clone(&self.hub),
            start_time: self.start_time,
            metrics: self.metrics.clone(),
            socket: SocketSettings::from(&self.settings.server),
        };

        Router::new()
            .route("/status", get(status_handler))
            .route("/metrics", get(metrics_handler))
            .fallback(fallback_handler)
            .with_state(state.clone())
            .layer(middleware::from_fn_with_state(state, upgrade_any_path))
            .layer(middleware::from_fn_with_state(
                Arc::clone(&self.cors),
                cors::enforce,
            ))
            .layer(TraceLayer::new_for_http())
    }

    /// Bind and start serving; also starts the bot sweeper when bots are
    /// enabled. Both stop when the shutdown coordinator fires.
    pub async fn listen(&self) -> Result<ServerHandle, ServerError> {
        let host = self.settings.server.host.as_str();
        let port = self.settings.server.port;
        let requested = format!("{host}:{port}");

        let listener = tokio::net::TcpListener::bind((host, port))
            .await
            .map_err(|e| ServerError::bind(&requested, e))?;
        let addr = listener
            .local_addr()
            .map_err(|e| ServerError::bind(&requested, e))?;

        let app = self
            .router()
            .into_make_service_with_connect_info::<SocketAddr>();
        let token = self.shutdown.token();
        let server = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(token.cancelled_owned())
                .await
            {
                error!(error = %ServerError::from(e), "relay listener stopped");
            }
        });

        let sweeper = self.settings.bots.enabled.then(|| {
            spawn_bot_sweeper(
                Arc::clone(&self.hub),
                Duration::from_millis(self.settings.bots.sweep_interval_ms),
                self.shutdown.token(),
            )
        });

        info!(%addr, bots = self.settings.bots.enabled, dev_mode = self.settings.cors.dev_mode, "relay listening");
        Ok(ServerHandle {
            addr,
            server,
            sweeper,
        })
    }

    /// Peer and bot state.
    pub fn hub(&self) -> &Arc<SignalHub> {
        &self.hub
    }

    /// Shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Effective settings.
    pub fn settings(&self) -> &RelaySettings {
        &self.settings
    }
}

/// Background tasks of a running server.
pub struct ServerHandle {
    /// Bound address (resolves port `0`).
    pub addr: SocketAddr,
    server: JoinHandle<()>,
    sweeper: Option<JoinHandle<()>>,
}

impl ServerHandle {
    /// Tasks to await on shutdown.
    pub fn into_tasks(self) -> Vec<JoinHandle<()>> {
        std::iter::once(self.server).chain(self.sweeper).collect()
    }
}

/// GET /status
async fn status_handler(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(health::status_report(state.start_time, state.hub.peer_count()))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => {
            record_scrape(state.start_time);
            (
                [(CONTENT_TYPE, "text/plain; version=0.0.4")],
                render(handle),
            )
                .into_response()
        }
        None => not_found(),
    }
}

/// `*/status` answers status; anything else is 404.
async fn fallback_handler(State(state): State<AppState>, uri: Uri) -> Response {
    if uri.path().ends_with("/status") {
        return status_handler(State(state)).await.into_response();
    }
    not_found()
}

/// Hand any `Upgrade: websocket` request to the socket loop, whatever its
/// path; everything else goes on to routing.
async fn upgrade_any_path(
    State(state): State<AppState>,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
    request: Request,
    next: Next,
) -> Response {
    if !wants_upgrade(request.headers()) {
        return next.run(request).await;
    }

    match upgrade {
        Ok(ws) => {
            let AppState { hub, socket, .. } = state;
            ws.on_failed_upgrade(|e| warn!(error = %e, "websocket upgrade failed"))
                .on_upgrade(move |stream| serve_socket(stream, hub, socket))
        }
        Err(rejection) => {
            warn!(error = %rejection, path = %request.uri().path(), "websocket upgrade rejected");
            (StatusCode::INTERNAL_SERVER_ERROR, "Upgrade failed").into_response()
        }
    }
}

fn wants_upgrade(headers: &HeaderMap) -> bool {
    headers
        .get(UPGRADE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("websocket"))
}

fn not_found() -> Response {
    (StatusCode::NOT_FOUND, "Not found").into_response()
}
