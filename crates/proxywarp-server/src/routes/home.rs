use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Query, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::get,
    Router,
};
use tracing::info;

use crate::pages;
use crate::routes::convert::{convert_url, UrlQuery};
use crate::state::AppState;

/// `GET /` renders the landing page; with `?url=` it allocates a token
/// and 302-redirects straight to the proxied address.
async fn home(State(state): State<Arc<AppState>>, Query(query): Query<UrlQuery>) -> Response {
    let Some(url) = query.url else {
        return Html(pages::render_home(&state.settings.server.base_domain)).into_response();
    };

    match convert_url(&state, &url) {
        Ok(converted) => {
            info!(token = %converted.token, domain = %converted.domain, "shortcut redirect");
            Response::builder()
                .status(StatusCode::FOUND)
                .header(header::LOCATION, converted.proxy)
                .body(Body::empty())
                .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
        }
        Err(e) => pages::warp_error_response(state.settings.server.debug, &e),
    }
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/", get(home))
}
