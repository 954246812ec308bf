pub mod auth;
pub mod denylist;
pub mod event;

use axum::http::StatusCode;
use axum::middleware;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};

use crate::state::AppState;

/// Build the full API router.
///
/// Routes are split into **public** (the health probe) and **protected**
/// (everything else, gated behind the HMAC middleware). `state` is needed
/// to wire up the auth middleware at build time.
pub fn router(state: AppState) -> Router<AppState> {
    let public = Router::new().route("/health", get(health));

    let protected = Router::new()
        .route("/event", post(event::handle_event))
        .route(
            "/configuration/rules/denylist",
            get(denylist::list).put(denylist::update),
        )
        .route(
            "/configuration/rules/denylist/:kind/:entry",
            delete(denylist::remove),
        )
        .route_layer(middleware::from_fn_with_state(state, auth::require_hmac));

    public
        .merge(protected)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

async fn health() -> &'static str {
    "ok"
}

/// Build a standardized JSON error response: `{ "error": "<message>" }`.
pub(crate) fn api_error(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(serde_json::json!({ "error": message.into() }))).into_response()
}
