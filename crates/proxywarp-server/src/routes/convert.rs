use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use url::Url;

use proxywarp_core::error::{Result, WarpError};
use proxywarp_core::models::{is_valid_domain, normalize_domain, proxy_url, ConvertResponse};

use crate::state::AppState;

#[derive(Deserialize)]
pub struct UrlQuery {
    pub url: Option<String>,
}

/// Allocate (or find) the token for a raw URL and describe the proxied
/// address. Accepts scheme-less input by retrying with `https://`.
pub fn convert_url(state: &AppState, raw: &str) -> Result<ConvertResponse> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(WarpError::InvalidInput("missing url".to_string()));
    }

    let parsed = match Url::parse(trimmed) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => url,
        _ => Url::parse(&format!("https://{trimmed}"))
            .map_err(|e| WarpError::InvalidInput(format!("unparseable url: {e}")))?,
    };
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(WarpError::InvalidInput(format!(
            "unsupported scheme: {}",
            parsed.scheme()
        )));
    }

    let domain = normalize_domain(
        parsed
            .host_str()
            .ok_or_else(|| WarpError::InvalidInput("url has no host".to_string()))?,
    );
    if !is_valid_domain(&domain) {
        return Err(WarpError::InvalidInput(format!("invalid domain: {domain}")));
    }

    let token = state.directory.token_for_domain(&domain);

    let mut path_and_query = parsed.path().to_string();
    if let Some(query) = parsed.query() {
        path_and_query.push('?');
        path_and_query.push_str(query);
    }
    let proxy = proxy_url(&state.settings.server.base_domain, &token, &path_and_query);

    Ok(ConvertResponse {
        original: trimmed.to_string(),
        domain,
        token,
        proxy,
    })
}

async fn convert(
    State(state): State<Arc<AppState>>,
    Query(query): Query<UrlQuery>,
) -> std::result::Result<Json<ConvertResponse>, (StatusCode, Json<Value>)> {
    let raw = query.url.unwrap_or_default();
    convert_url(&state, &raw).map(Json).map_err(|e| {
        (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": e.to_string() })),
        )
    })
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/convert", get(convert))
}
