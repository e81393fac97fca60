use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde_json::{json, Value};

use proxywarp_core::models::{proxy_url, TestTokenResponse};

use crate::state::AppState;

async fn test_token(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
) -> Result<Json<TestTokenResponse>, (StatusCode, Json<Value>)> {
    match state.directory.domain_info_from_token(&token) {
        Some(entry) => Ok(Json(TestTokenResponse {
            proxy_url: proxy_url(&state.settings.server.base_domain, &token, "/"),
            target_info: entry,
            token,
        })),
        None => Err((
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("unknown token: {token}") })),
        )),
    }
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/test-token/{token}", get(test_token))
}
