use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, Request},
    middleware::Next,
    response::Response,
};

use crate::proxy;
use crate::state::AppState;

/// Host-based dispatch: requests to `<token>.<base_domain>` take the
/// reverse-proxy path, everything else falls through to the management
/// router.
pub async fn host_dispatch(
    State(state): State<Arc<AppState>>,
    request: Request<axum::body::Body>,
    next: Next,
) -> Response {
    let host = request
        .headers()
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    match proxy_token(host, &state.settings.server.base_domain) {
        Some(token) => proxy::handle(state, token, request).await,
        None => next.run(request).await,
    }
}

/// Extract the token label chain from a `Host` value, or `None` when
/// the request belongs to the management surface.
pub fn proxy_token(host: &str, base_domain: &str) -> Option<String> {
    let host = host.split(':').next().unwrap_or(host).trim().to_ascii_lowercase();
    if host.is_empty() || host == base_domain {
        return None;
    }
    let suffix = format!(".{base_domain}");
    let token = host.strip_suffix(suffix.as_str())?;
    if token.is_empty() {
        return None;
    }
    Some(token.to_string())
}
