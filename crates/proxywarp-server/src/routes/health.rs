use std::sync::Arc;

use axum::{extract::State, routing::get, Json, Router};

use proxywarp_core::models::HealthResponse;

use crate::state::AppState;

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        base_domain: state.settings.server.base_domain.clone(),
        port: state.settings.server.port,
    })
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/health", get(health))
}
