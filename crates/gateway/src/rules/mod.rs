//! The rule engine: compiling declarative rule specs into executable risk
//! handlers and indexing them by event name.
//!
//! Compilation happens once at startup. Each rule parser validates its
//! parameters, grabs the service handles it needs (a rule that requires the
//! KV store pings it here, so a dead store fails the boot instead of the
//! first request), and returns a [`NamedRiskHandler`]. Any parser error is
//! fatal: misconfiguration must not boot a degraded service.

pub mod denylist;
pub mod spray;
pub mod velocity;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use rg_domain::config::RuleSpec;
use rg_domain::{EventData, Result, RiskResult, Strategy};

use crate::services::Services;

pub use denylist::DenylistStore;

/// The only event name current rules register under. The registry itself is
/// keyed on event name so new event types stay additive.
pub const LOGIN_EVENT: &str = "login";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Evaluator seam
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A compiled risk evaluator.
///
/// Returns the score on success or a descriptive message that is attached
/// to the rule's [`RiskResult`] as `err`. Evaluators never panic on missing
/// event fields; they report them.
#[async_trait]
pub trait RiskEvaluator: Send + Sync {
    async fn score(&self, data: &EventData) -> std::result::Result<f64, String>;
}

/// The runtime form of one configured rule. Immutable after construction.
#[derive(Clone)]
pub struct NamedRiskHandler {
    pub name: String,
    pub strategy: Strategy,
    evaluator: Arc<dyn RiskEvaluator>,
}

impl NamedRiskHandler {
    pub fn new(
        name: impl Into<String>,
        strategy: Strategy,
        evaluator: Arc<dyn RiskEvaluator>,
    ) -> Self {
        Self {
            name: name.into(),
            strategy,
            evaluator,
        }
    }

    pub async fn evaluate(&self, data: &EventData) -> RiskResult {
        match self.evaluator.score(data).await {
            Ok(score) => RiskResult::scored(&self.name, self.strategy, score),
            Err(err) => RiskResult::failed(&self.name, self.strategy, err),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Registry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Event name → ordered handlers. Built once at startup, read-only after.
#[derive(Default)]
pub struct HandlerRegistry {
    by_event: HashMap<String, Vec<NamedRiskHandler>>,
}

impl HandlerRegistry {
    pub fn register(&mut self, event: &str, handler: NamedRiskHandler) {
        self.by_event
            .entry(event.to_string())
            .or_default()
            .push(handler);
    }

    pub fn handlers(&self, event: &str) -> Option<&[NamedRiskHandler]> {
        self.by_event
            .get(event)
            .map(Vec::as_slice)
            .filter(|handlers| !handlers.is_empty())
    }

    pub fn rule_count(&self) -> usize {
        self.by_event.values().map(Vec::len).sum()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Compilation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct CompiledRules {
    pub registry: HandlerRegistry,
    /// The denylist the admin API operates on. When several denylist rules
    /// are configured the dynamic one wins; admin writes against a purely
    /// static configuration are rejected at request time.
    pub denylist: Option<Arc<DenylistStore>>,
}

impl std::fmt::Debug for CompiledRules {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledRules")
            .field("rule_count", &self.registry.rule_count())
            .field("has_denylist", &self.denylist.is_some())
            .finish()
    }
}

pub async fn compile(specs: &[RuleSpec], services: &Services) -> Result<CompiledRules> {
    let mut registry = HandlerRegistry::default();
    let mut denylists: Vec<Arc<DenylistStore>> = Vec::new();

    for spec in specs {
        match spec {
            RuleSpec::Velocity(params) => {
                let handler = velocity::compile(params, services).await?;
                registry.register(LOGIN_EVENT, handler);
            }
            RuleSpec::HorizontalBruteForce(params) | RuleSpec::PasswordSpray(params) => {
                let handler = spray::compile(spec.name(), params, services).await?;
                registry.register(LOGIN_EVENT, handler);
            }
            RuleSpec::Denylist(params) => {
                let (handler, store) = denylist::compile(params, services).await?;
                registry.register(LOGIN_EVENT, handler);
                denylists.push(store);
            }
        }
        tracing::debug!(rule = spec.name(), "rule compiled");
    }

    let admin_target = denylists
        .iter()
        .find(|store| store.is_dynamic())
        .or_else(|| denylists.first())
        .cloned();

    Ok(CompiledRules {
        registry,
        denylist: admin_target,
    })
}
