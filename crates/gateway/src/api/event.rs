//! The event endpoint: decode the envelope, run the pipeline, return the
//! assessment.

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;

use rg_domain::EventData;

use crate::pipeline::{self, EvaluateError};
use crate::state::AppState;

use super::api_error;

/// The request envelope: an event name plus the event attributes the rules
/// consume.
#[derive(Debug, Deserialize)]
pub struct EventRequest {
    pub event: String,
    #[serde(default)]
    pub data: EventData,
}

pub async fn handle_event(
    State(state): State<AppState>,
    payload: Result<Json<EventRequest>, JsonRejection>,
) -> Response {
    let Ok(Json(req)) = payload else {
        return api_error(StatusCode::BAD_REQUEST, "invalid JSON");
    };

    match pipeline::evaluate(&state.registry, state.bus.as_ref(), &req.event, &req.data).await {
        Ok(assessment) => Json(assessment).into_response(),
        Err(EvaluateError::UnknownEvent) => {
            api_error(StatusCode::BAD_REQUEST, "invalid event type")
        }
        Err(EvaluateError::NoHandlers) => {
            api_error(StatusCode::NOT_FOUND, "no handlers for event")
        }
    }
}
