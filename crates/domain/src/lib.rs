//! Shared data model for the riskgate workspace: rule configuration,
//! risk results, and the common error type.

pub mod config;
pub mod error;
pub mod risk;

pub use error::{Error, Result};
pub use risk::{EventData, RiskAssessment, RiskResult, Strategy};
