//! Service configuration: the YAML rules file with its services block and
//! the typed per-rule parameter schemas.
//!
//! Rule parameters are a sum type discriminated by the `name` key, so an
//! unknown rule name is a hard parse error rather than a silently ignored
//! entry. Validation is collected as issues with a severity; any
//! error-severity issue must prevent the service from booting.

use std::net::IpAddr;
use std::path::Path;
use std::time::Duration;

use ipnet::IpNet;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::risk::Strategy;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub services: ServicesConfig,
    #[serde(default)]
    pub rules: Vec<RuleSpec>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServicesConfig {
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub nats: NatsConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RedisConfig {
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub enabled: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NatsConfig {
    #[serde(default)]
    pub url: String,
    /// Aggregate scores strictly above this value are published as alerts.
    #[serde(default)]
    pub threshold: f64,
    #[serde(default)]
    pub enabled: bool,
}

impl Config {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        Self::from_yaml(&data)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Check everything that does not require a live service connection.
    ///
    /// Issues with [`ConfigSeverity::Error`] must keep the service from
    /// booting; warnings are logged and tolerated.
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();

        if self.services.nats.enabled {
            if !(0.0..=1.0).contains(&self.services.nats.threshold) {
                issues.push(ConfigIssue::error(
                    "nats: threshold for publishing must be between 0 and 1",
                ));
            }
            if self.services.nats.url.is_empty() {
                issues.push(ConfigIssue::error("nats: provide a valid nats URL"));
            }
        }

        if self.services.redis.enabled && self.services.redis.host.is_empty() {
            issues.push(ConfigIssue::error("redis: provide a valid redis host"));
        }

        for rule in &self.rules {
            rule.validate_into(&mut issues);
        }

        issues
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Validation issues
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Warning,
    Error,
}

#[derive(Debug, Clone)]
pub struct ConfigIssue {
    pub severity: ConfigSeverity,
    pub message: String,
}

impl ConfigIssue {
    fn error(message: impl Into<String>) -> Self {
        Self {
            severity: ConfigSeverity::Error,
            message: message.into(),
        }
    }

    fn warning(message: impl Into<String>) -> Self {
        Self {
            severity: ConfigSeverity::Warning,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Rule specs
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One configured rule, discriminated by its `name`.
///
/// `passwordSpray` is an accepted alias for `horizontalBruteForce`; both
/// compile to the same evaluator and the result name echoes the configured
/// spelling.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "name")]
pub enum RuleSpec {
    #[serde(rename = "velocity")]
    Velocity(VelocityParams),
    #[serde(rename = "denylist")]
    Denylist(DenylistParams),
    #[serde(rename = "horizontalBruteForce")]
    HorizontalBruteForce(SprayParams),
    #[serde(rename = "passwordSpray")]
    PasswordSpray(SprayParams),
}

impl RuleSpec {
    /// The configured rule name as it appears in results.
    pub fn name(&self) -> &'static str {
        match self {
            RuleSpec::Velocity(_) => "velocity",
            RuleSpec::Denylist(_) => "denylist",
            RuleSpec::HorizontalBruteForce(_) => "horizontalBruteForce",
            RuleSpec::PasswordSpray(_) => "passwordSpray",
        }
    }

    pub fn strategy(&self) -> Strategy {
        match self {
            RuleSpec::Velocity(p) => p.strategy,
            RuleSpec::Denylist(p) => p.strategy,
            RuleSpec::HorizontalBruteForce(p) | RuleSpec::PasswordSpray(p) => p.strategy,
        }
    }

    fn validate_into(&self, issues: &mut Vec<ConfigIssue>) {
        let name = self.name();
        match self {
            RuleSpec::Velocity(p) => {
                if p.interval_seconds == 0 {
                    issues.push(ConfigIssue::error(format!(
                        "{name}: intervalSeconds must be greater than zero"
                    )));
                }
                if p.limit == 0 {
                    issues.push(ConfigIssue::error(format!(
                        "{name}: limit must be greater than zero"
                    )));
                }
            }
            RuleSpec::HorizontalBruteForce(p) | RuleSpec::PasswordSpray(p) => {
                if p.interval_seconds == 0 {
                    issues.push(ConfigIssue::error(format!(
                        "{name}: intervalSeconds must be greater than zero"
                    )));
                }
                if p.distinct_accounts == 0 {
                    issues.push(ConfigIssue::error(format!(
                        "{name}: distinctAccounts must be greater than zero"
                    )));
                }
                if p.attempts_allowed.is_some() {
                    issues.push(ConfigIssue::warning(format!(
                        "{name}: attemptsAllowed is deprecated and ignored; \
                         detection uses distinctAccounts only"
                    )));
                }
            }
            RuleSpec::Denylist(p) => {
                if p.source_list == DenylistSource::Static
                    && p.ips.is_empty()
                    && p.cidrs.is_empty()
                {
                    issues.push(ConfigIssue::error(
                        "denylist: a static source requires at least one of ips or cidrs",
                    ));
                }
                if let Err(e) = p.parse_entries() {
                    issues.push(ConfigIssue::error(format!("denylist: {e}")));
                }
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VelocityParams {
    #[serde(rename = "intervalSeconds")]
    pub interval_seconds: u64,
    pub limit: u64,
    pub strategy: Strategy,
}

impl VelocityParams {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SprayParams {
    #[serde(rename = "intervalSeconds")]
    pub interval_seconds: u64,
    #[serde(rename = "distinctAccounts")]
    pub distinct_accounts: u64,
    /// Legacy knob from earlier revisions of this rule. Parsed but ignored.
    #[serde(rename = "attemptsAllowed", skip_serializing_if = "Option::is_none")]
    pub attempts_allowed: Option<u64>,
    pub strategy: Strategy,
}

impl SprayParams {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }
}

/// Where the denylist rule reads its entries from at evaluation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DenylistSource {
    /// Immutable in-memory snapshot taken at load time.
    Static,
    /// Live sets in the KV store, mutable through the admin API.
    Redis,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DenylistParams {
    #[serde(rename = "sourceList")]
    pub source_list: DenylistSource,
    #[serde(default)]
    pub ips: Vec<String>,
    #[serde(default)]
    pub cidrs: Vec<String>,
    pub strategy: Strategy,
}

/// Configured denylist entries parsed and normalized to canonical form.
#[derive(Debug, Clone, Default)]
pub struct ParsedDenylist {
    pub ips: Vec<IpAddr>,
    pub cidrs: Vec<IpNet>,
}

impl DenylistParams {
    /// Parse and canonicalize the configured entries.
    ///
    /// CIDRs are truncated to their network address so `10.0.0.7/8` and
    /// `10.0.0.0/8` denote the same stored entry.
    pub fn parse_entries(&self) -> Result<ParsedDenylist> {
        let mut parsed = ParsedDenylist::default();
        for raw in &self.ips {
            let ip: IpAddr = raw
                .parse()
                .map_err(|_| Error::Config(format!("invalid IP: {raw}")))?;
            parsed.ips.push(ip);
        }
        for raw in &self.cidrs {
            let net: IpNet = raw
                .parse()
                .map_err(|_| Error::Config(format!("invalid CIDR: {raw}")))?;
            parsed.cidrs.push(net.trunc());
        }
        Ok(parsed)
    }
}
