use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::rules::{DenylistStore, HandlerRegistry};
use crate::services::AlertBus;

/// Shared application state passed to all API handlers.
///
/// Everything here is built once at startup and never mutated; per-IP rule
/// state lives in the KV store, captured by the compiled handlers.
#[derive(Clone)]
pub struct AppState {
    /// Event name → compiled risk handlers.
    pub registry: Arc<HandlerRegistry>,
    /// Alert publisher. `None` when the bus is disabled in config.
    pub bus: Option<AlertBus>,
    /// The denylist the admin API manages. `None` when no denylist rule is
    /// configured.
    pub denylist: Option<Arc<DenylistStore>>,
    /// HMAC key id → secret, loaded from the environment at startup.
    pub auth_keys: Arc<HashMap<String, Vec<u8>>>,
    /// Accepted clock skew for signed timestamps. Zero disables the check
    /// (local development).
    pub allowed_skew: Duration,
}
