//! `/status` endpoint.

use std::time::Instant;

use chrono::{SecondsFormat, Utc};
use serde::Serialize;

/// Status response body.
#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    /// Always `"healthy"` while the server is running.
    pub status: &'static str,
    /// Current UTC time, RFC 3339 with milliseconds.
    pub timestamp: String,
    /// Seconds since the server started.
    pub uptime: f64,
    /// Registered peers.
    pub peers: usize,
}

/// Build a status response from live counters.
pub fn status_report(start_time: Instant, peers: usize) -> StatusResponse {
    StatusResponse {
        status: "healthy",
        timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        uptime: start_time.elapsed().as_secs_f64(),
        peers,
    }
}
