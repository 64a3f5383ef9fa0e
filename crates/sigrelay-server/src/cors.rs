//! Cross-origin policy applied to every HTTP request.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::header::{
    ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN,
    ACCESS_CONTROL_REQUEST_HEADERS, HeaderValue, ORIGIN,
};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use sigrelay_settings::CorsSettings;
use tracing::warn;

/// Methods the relay answers.
pub const ALLOWED_METHODS: &str = "GET, OPTIONS";

/// Origin allowlist, or everything in dev mode.
#[derive(Debug, Clone)]
pub struct CorsPolicy {
    dev_mode: bool,
    allowed_origins: Vec<String>,
}

impl CorsPolicy {
    /// Policy from settings.
    pub fn from_settings(settings: &CorsSettings) -> Self {
        Self {
            dev_mode: settings.dev_mode,
            allowed_origins: settings.allowed_origins.clone(),
        }
    }

    /// Value for `Access-Control-Allow-Origin`, or `None` if the request's
    /// origin is not allowed.
    pub fn allowed_origin(&self, origin: Option<&str>) -> Option<String> {
        if self.dev_mode {
            return Some("*".into());
        }
        origin
            .filter(|o| self.allowed_origins.iter().any(|allowed| allowed == o))
            .map(str::to_owned)
    }
}

/// Best guess at the caller's address for logging.
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };
    if let Some(first) = header("x-forwarded-for").and_then(|v| v.split(',').next()) {
        return first.trim().to_owned();
    }
    if let Some(real) = header("x-real-ip") {
        return real.to_owned();
    }
    peer.map_or_else(|| "unknown".into(), |addr| addr.ip().to_string())
}

fn apply_headers(headers: &mut HeaderMap, origin: Option<&str>, request_headers: Option<HeaderValue>) {
    if let Some(value) = origin.and_then(|o| HeaderValue::from_str(o).ok()) {
        let _ = headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, value);
    }
    let _ = headers.insert(
        ACCESS_CONTROL_ALLOW_HEADERS,
        request_headers.unwrap_or_else(|| HeaderValue::from_static("*")),
    );
    let _ = headers.insert(
        ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static(ALLOWED_METHODS),
    );
}

/// Middleware: reject disallowed origins with `405`, answer preflight with
/// `204`, and decorate every other response with CORS headers.
pub async fn enforce(State(policy): State<Arc<CorsPolicy>>, request: Request, next: Next) -> Response {
    let origin = request
        .headers()
        .get(ORIGIN)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);
    let request_headers = request.headers().get(ACCESS_CONTROL_REQUEST_HEADERS).cloned();

    let Some(allowed) = policy.allowed_origin(origin.as_deref()) else {
        let peer = request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);
        warn!(
            client_ip = %client_ip(request.headers(), peer),
            origin = origin.as_deref().unwrap_or("<none>"),
            uri = %request.uri(),
            "rejected request from disallowed origin"
        );
        let mut response = (StatusCode::METHOD_NOT_ALLOWED, "Not allowed").into_response();
        apply_headers(response.headers_mut(), None, request_headers);
        return response;
    };

    let mut response = if request.method() == Method::OPTIONS {
        StatusCode::NO_CONTENT.into_response()
    } else {
        next.run(request).await
    };
    apply_headers(response.headers_mut(), Some(&allowed), request_headers);
    response
}
