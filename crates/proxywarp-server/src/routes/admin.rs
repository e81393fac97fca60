use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use proxywarp_core::models::{is_valid_domain, normalize_domain, proxy_url};

use crate::state::AppState;

#[derive(Deserialize)]
struct DomainQuery {
    domain: Option<String>,
}

/// Process and directory state, for debugging deployments.
async fn diagnostic(State(state): State<Arc<AppState>>) -> Json<Value> {
    let backup = state.directory.backup_info();
    Json(json!({
        "status": "ok",
        "uptimeSeconds": state.started.elapsed().as_secs(),
        "baseDomain": state.settings.server.base_domain,
        "port": state.settings.server.port,
        "directory": {
            "entries": state.directory.len(),
            "dbFile": state.directory.config().db_file,
            "backup": backup,
        },
        "cache": {
            "entries": state.cache.len(),
            "ttlMs": state.settings.cache.ttl_ms,
        },
    }))
}

/// DNS + HTTP + HTTPS probe of a domain, bounded by the admin watchdog
/// so a stuck probe cannot monopolise a connection.
async fn test_connection(
    State(state): State<Arc<AppState>>,
    Query(query): Query<DomainQuery>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let domain = normalize_domain(&query.domain.unwrap_or_default());
    if !is_valid_domain(&domain) {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": format!("invalid domain: {domain}") })),
        ));
    }

    let deadline = state.settings.proxy.admin_timeout();
    match tokio::time::timeout(deadline, probe(&state, &domain)).await {
        Ok(report) => Ok(Json(report)),
        Err(_) => Err((
            StatusCode::GATEWAY_TIMEOUT,
            Json(json!({
                "error": format!("probe timed out after {}ms", deadline.as_millis()),
                "domain": domain,
            })),
        )),
    }
}

async fn probe(state: &AppState, domain: &str) -> Value {
    let dns = match tokio::net::lookup_host(format!("{domain}:443")).await {
        Ok(addrs) => {
            let addresses: Vec<String> = addrs.map(|a| a.ip().to_string()).collect();
            json!({ "ok": !addresses.is_empty(), "addresses": addresses })
        }
        Err(e) => json!({ "ok": false, "error": e.to_string() }),
    };

    let http = probe_scheme(state, "http", domain).await;
    let https = probe_scheme(state, "https", domain).await;

    json!({
        "domain": domain,
        "dns": dns,
        "http": http,
        "https": https,
    })
}

async fn probe_scheme(state: &AppState, scheme: &str, domain: &str) -> Value {
    match state.http_client.get(format!("{scheme}://{domain}/")).send().await {
        Ok(resp) => json!({ "ok": true, "status": resp.status().as_u16() }),
        Err(e) => json!({ "ok": false, "error": e.to_string() }),
    }
}

async fn reload_tokens(State(state): State<Arc<AppState>>) -> Json<Value> {
    let count = state.directory.force_reload();
    info!(entries = count, "directory reloaded by admin");
    Json(json!({ "reloaded": count }))
}

/// Force-allocate a token without going through `/convert`.
async fn add_test_token(
    State(state): State<Arc<AppState>>,
    Query(query): Query<DomainQuery>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let domain = normalize_domain(&query.domain.unwrap_or_default());
    if !is_valid_domain(&domain) {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": format!("invalid domain: {domain}") })),
        ));
    }
    let token = state.directory.token_for_domain(&domain);
    let proxy = proxy_url(&state.settings.server.base_domain, &token, "/");
    Ok(Json(json!({ "domain": domain, "token": token, "proxy": proxy })))
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/admin/diagnostic", get(diagnostic))
        .route("/admin/test-connection", get(test_connection))
        .route("/admin/reload-tokens", get(reload_tokens))
        .route("/admin/add-test-token", get(add_test_token))
}
