//! Denylist administration: CRUD over the set the denylist rule consults.
//!
//! - `GET    /configuration/rules/denylist` — current entries, from the
//!   live source.
//! - `PUT    /configuration/rules/denylist` — add `{type, value}`.
//! - `DELETE /configuration/rules/denylist/{type}/{entry}` — remove one
//!   entry (the path segment arrives percent-encoded).
//!
//! Writes only work against a dynamic (KV-backed) denylist; a static
//! configuration has nothing to mutate and gets a client error. Successful
//! writes return 202: the mutation is durable in the store and readers
//! pick it up on their next evaluation.

use std::net::IpAddr;
use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use ipnet::IpNet;
use serde::Deserialize;

use crate::rules::denylist::{DenylistStore, DenylistWriteError, EntryKind};
use crate::state::AppState;

use super::api_error;

#[derive(Debug, Deserialize)]
pub struct DenylistUpdate {
    #[serde(rename = "type")]
    pub kind: String,
    pub value: String,
}

fn store(state: &AppState) -> Result<&Arc<DenylistStore>, Response> {
    state
        .denylist
        .as_ref()
        .ok_or_else(|| api_error(StatusCode::BAD_REQUEST, "no denylist rule configured"))
}

/// Parse and canonicalize one entry of the given kind, so lookups and
/// deletes hit the same stored form regardless of how the client spelled it.
fn normalize(kind: EntryKind, value: &str) -> Result<String, String> {
    match kind {
        EntryKind::Ip => value
            .parse::<IpAddr>()
            .map(|ip| ip.to_string())
            .map_err(|_| format!("invalid IP: {value}")),
        EntryKind::Cidr => value
            .parse::<IpNet>()
            .map(|net| net.trunc().to_string())
            .map_err(|_| format!("invalid CIDR: {value}")),
    }
}

fn write_error(err: DenylistWriteError) -> Response {
    match err {
        DenylistWriteError::NoDynamicSource => {
            api_error(StatusCode::BAD_REQUEST, "no dynamic source configured")
        }
        DenylistWriteError::Kv(message) => {
            api_error(StatusCode::INTERNAL_SERVER_ERROR, message)
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /configuration/rules/denylist
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn list(State(state): State<AppState>) -> Response {
    let store = match store(&state) {
        Ok(store) => store,
        Err(resp) => return resp,
    };

    match store.entries().await {
        Ok(entries) => Json(entries).into_response(),
        Err(e) => api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// PUT /configuration/rules/denylist
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn update(
    State(state): State<AppState>,
    payload: Result<Json<DenylistUpdate>, JsonRejection>,
) -> Response {
    let Ok(Json(update)) = payload else {
        return api_error(StatusCode::BAD_REQUEST, "invalid JSON payload");
    };
    let store = match store(&state) {
        Ok(store) => store,
        Err(resp) => return resp,
    };

    let Ok(kind) = update.kind.parse::<EntryKind>() else {
        return api_error(StatusCode::BAD_REQUEST, "type must be \"ip\" or \"cidr\"");
    };
    let entry = match normalize(kind, &update.value) {
        Ok(entry) => entry,
        Err(message) => return api_error(StatusCode::BAD_REQUEST, message),
    };

    match store.add(kind, &entry).await {
        Ok(()) => StatusCode::ACCEPTED.into_response(),
        Err(e) => write_error(e),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// DELETE /configuration/rules/denylist/{type}/{entry}
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn remove(
    State(state): State<AppState>,
    Path((kind, entry)): Path<(String, String)>,
) -> Response {
    let store = match store(&state) {
        Ok(store) => store,
        Err(resp) => return resp,
    };

    let Ok(kind) = kind.parse::<EntryKind>() else {
        return api_error(StatusCode::BAD_REQUEST, "type must be \"ip\" or \"cidr\"");
    };
    let entry = match normalize(kind, &entry) {
        Ok(entry) => entry,
        Err(message) => return api_error(StatusCode::BAD_REQUEST, message),
    };

    match store.remove(kind, &entry).await {
        Ok(()) => StatusCode::ACCEPTED.into_response(),
        Err(e) => write_error(e),
    }
}
