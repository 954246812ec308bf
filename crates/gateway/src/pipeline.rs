//! Evaluation pipeline: per-event fan-out over the registered handlers,
//! per-handler deadline isolation, and strategy-based aggregation.
//!
//! Each handler runs in its own task raced against a hard 100 ms deadline.
//! A handler that blows the budget yields a synthetic `deadline exceeded`
//! result; the task itself keeps running in the background and its late
//! output is discarded. Every handler produces exactly one result, and a
//! failing rule degrades its own line in the breakdown, never the request.

use std::time::Duration;

use rg_domain::{risk, EventData, RiskAssessment, RiskResult};

use crate::rules::HandlerRegistry;
use crate::services::AlertBus;

/// Hard per-handler budget. Applies on top of the KV adapter's own
/// per-operation timeout.
pub const HANDLER_DEADLINE: Duration = Duration::from_millis(100);

/// Event names the service understands. Handlers are registered per event,
/// so extending this list is additive.
const KNOWN_EVENTS: &[&str] = &[crate::rules::LOGIN_EVENT];

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum EvaluateError {
    /// The event name is not one the service knows how to score.
    #[error("invalid event type")]
    UnknownEvent,
    /// The event is known but no rules are registered for it.
    #[error("no handlers for event")]
    NoHandlers,
}

/// Score one event against every handler registered for it.
pub async fn evaluate(
    registry: &HandlerRegistry,
    bus: Option<&AlertBus>,
    event: &str,
    data: &EventData,
) -> Result<RiskAssessment, EvaluateError> {
    if !KNOWN_EVENTS.contains(&event) {
        return Err(EvaluateError::UnknownEvent);
    }
    let handlers = registry.handlers(event).ok_or(EvaluateError::NoHandlers)?;

    let races = handlers.iter().map(|handler| {
        let handler = handler.clone();
        let data = data.clone();
        async move {
            let name = handler.name.clone();
            let strategy = handler.strategy;

            let task = tokio::spawn(async move { handler.evaluate(&data).await });
            match tokio::time::timeout(HANDLER_DEADLINE, task).await {
                Ok(Ok(result)) => result,
                Ok(Err(e)) => {
                    tracing::warn!(rule = %name, error = %e, "rule task failed");
                    RiskResult::failed(name, strategy, "rule evaluation failed")
                }
                Err(_) => RiskResult::failed(name, strategy, "deadline exceeded"),
            }
        }
    });
    let results = futures_util::future::join_all(races).await;

    let aggregate = risk::aggregate(&results);

    if let Some(bus) = bus {
        if aggregate > bus.threshold {
            let bus = bus.clone();
            let breakdown = results.clone();
            tokio::spawn(async move { bus.publish(&breakdown).await });
        }
    }

    Ok(RiskAssessment {
        risk: aggregate,
        rule_results: results,
    })
}
