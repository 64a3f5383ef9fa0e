//! Prometheus metrics recorder and metric names.

use std::time::Instant;

use metrics::gauge;
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the handle used to render `/metrics`. Call once at startup,
/// before anything is recorded.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Render Prometheus text format from the installed recorder.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

/// Refresh the gauges that only change at scrape time: uptime since
/// `start_time`, and the up marker.
pub fn record_scrape(start_time: Instant) {
    gauge!(UPTIME_SECONDS).set(start_time.elapsed().as_secs_f64());
    gauge!(SERVER_STATUS).set(1.0);
}

// Metric name constants.

/// WebSocket connections accepted (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// WebSocket connections closed (counter).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Peers currently registered (gauge).
pub const CONNECTED_PEERS: &str = "signaling_server_connected_peers";
/// Peers that completed `hello` (counter).
pub const PEERS_ANNOUNCED_TOTAL: &str = "peers_announced_total";
/// Signals delivered to a live peer (counter).
pub const SIGNALS_FORWARDED_TOTAL: &str = "signals_forwarded_total";
/// Signals answered with "Peer not available" (counter).
pub const SIGNALS_REJECTED_TOTAL: &str = "signals_rejected_total";
/// Signals addressed to a bot and discarded (counter).
pub const SIGNALS_DROPPED_BOT_TOTAL: &str = "signals_dropped_bot_total";
/// Bots handed to lone peers (counter).
pub const BOTS_MINTED_TOTAL: &str = "bots_minted_total";
/// Bots removed by the expiry sweep (counter).
pub const BOTS_EXPIRED_TOTAL: &str = "bots_expired_total";
/// Outbound frames dropped on a full or closed queue (counter).
pub const WS_SEND_DROPS_TOTAL: &str = "ws_send_drops_total";
/// Inbound frames that were not valid JSON (counter).
pub const FRAMES_MALFORMED_TOTAL: &str = "frames_malformed_total";
/// Seconds since start, refreshed on each scrape (gauge).
pub const UPTIME_SECONDS: &str = "signaling_server_uptime_seconds";
/// Always 1 while the relay answers scrapes (gauge).
pub const SERVER_STATUS: &str = "signaling_server_status";
