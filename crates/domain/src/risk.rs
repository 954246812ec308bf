//! Risk scoring model: per-rule results, aggregation strategies, and the
//! assessment returned for each event.

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Strategy
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// How a rule's score participates in aggregation.
///
/// The string form (`"override"` / `"average"`) exists only at the
/// configuration and wire boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// A score of 1.0 forces the aggregate to 1.0 regardless of other rules.
    Override,
    /// The score joins the arithmetic mean of all average-strategy results.
    Average,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Event data
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Typed view of the event envelope's `data` object.
///
/// Every field a rule may consume is declared here as optional; a rule that
/// requires a field which is absent reports a [`MissingField`] error in its
/// result instead of failing the request. Unknown fields in the incoming
/// JSON are ignored so new event attributes stay additive.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EventData {
    pub ip: Option<String>,
    pub account: Option<String>,
}

/// A required event field was absent from the request data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MissingField(pub &'static str);

impl std::fmt::Display for MissingField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "missing {}", self.0)
    }
}

impl EventData {
    pub fn ip(&self) -> std::result::Result<&str, MissingField> {
        self.ip.as_deref().ok_or(MissingField("ip"))
    }

    pub fn account(&self) -> std::result::Result<&str, MissingField> {
        self.account.as_deref().ok_or(MissingField("account"))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Results
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The outcome of one rule evaluation.
///
/// `score` is binary in the current rules but aggregation treats it as
/// continuous on `[0, 1]`. A populated `err` excludes the result from
/// aggregation; it still appears in the response breakdown.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskResult {
    pub name: String,
    pub strategy: Strategy,
    pub score: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub err: Option<String>,
}

impl RiskResult {
    pub fn scored(name: impl Into<String>, strategy: Strategy, score: f64) -> Self {
        Self {
            name: name.into(),
            strategy,
            score,
            err: None,
        }
    }

    pub fn failed(name: impl Into<String>, strategy: Strategy, err: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            strategy,
            score: 0.0,
            err: Some(err.into()),
        }
    }
}

/// The composite response for one event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub risk: f64,
    #[serde(rename = "ruleResults")]
    pub rule_results: Vec<RiskResult>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Aggregation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Fold per-rule results into the composite score.
///
/// Results carrying an error are skipped. An override-strategy result with
/// score >= 1.0 pins the aggregate to 1.0 no matter what the average pool
/// says; otherwise the aggregate is the mean of the average-strategy scores,
/// or 0.0 when none contributed.
pub fn aggregate(results: &[RiskResult]) -> f64 {
    let mut sum = 0.0;
    let mut count = 0u32;
    let mut override_fired = false;

    for result in results {
        if result.err.is_some() {
            continue;
        }
        match result.strategy {
            Strategy::Override => {
                if result.score >= 1.0 {
                    override_fired = true;
                }
            }
            Strategy::Average => {
                sum += result.score;
                count += 1;
            }
        }
    }

    if override_fired {
        1.0
    } else if count > 0 {
        sum / f64::from(count)
    } else {
        0.0
    }
}
