//! Denylist rule: scores 1.0 when the event IP matches an administratively
//! managed set of addresses and CIDR ranges.
//!
//! Two source modes. `static` takes an immutable in-memory snapshot of the
//! configured entries at load time. `redis` seeds the configured entries
//! into the `denylist:ips` / `denylist:cidrs` sets and consults them live
//! on every evaluation, which is what makes the admin API's mutations take
//! effect without a restart.

use std::net::IpAddr;
use std::sync::Arc;

use async_trait::async_trait;
use ipnet::IpNet;

use rg_domain::config::{DenylistParams, DenylistSource, ParsedDenylist};
use rg_domain::{Error, EventData, Result};

use crate::services::{KvStore, Services};

use super::{NamedRiskHandler, RiskEvaluator};

const RULE_NAME: &str = "denylist";
const IPS_KEY: &str = "denylist:ips";
const CIDRS_KEY: &str = "denylist:cidrs";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The kind of entry an admin operation targets. The wire vocabulary is
/// `ip` / `cidr` for writes and the plural forms for reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Ip,
    Cidr,
}

impl EntryKind {
    fn key(self) -> &'static str {
        match self {
            EntryKind::Ip => IPS_KEY,
            EntryKind::Cidr => CIDRS_KEY,
        }
    }
}

impl std::str::FromStr for EntryKind {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "ip" => Ok(EntryKind::Ip),
            "cidr" => Ok(EntryKind::Cidr),
            _ => Err(()),
        }
    }
}

/// Why a denylist mutation was refused.
#[derive(thiserror::Error, Debug)]
pub enum DenylistWriteError {
    /// The configured rule is static; there is nothing to mutate.
    #[error("no dynamic source configured")]
    NoDynamicSource,
    #[error("{0}")]
    Kv(String),
}

/// The current denylist contents, split by entry kind.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct DenylistEntries {
    pub ips: Vec<String>,
    pub cidrs: Vec<String>,
}

enum Backend {
    Static(ParsedDenylist),
    Dynamic(Arc<dyn KvStore>),
}

/// The denylist the rule consults and the admin API manages.
pub struct DenylistStore {
    backend: Backend,
}

impl DenylistStore {
    fn fixed(snapshot: ParsedDenylist) -> Self {
        Self {
            backend: Backend::Static(snapshot),
        }
    }

    fn dynamic(kv: Arc<dyn KvStore>) -> Self {
        Self {
            backend: Backend::Dynamic(kv),
        }
    }

    pub fn is_dynamic(&self) -> bool {
        matches!(self.backend, Backend::Dynamic(_))
    }

    /// Read the live entries from the backing source.
    pub async fn entries(&self) -> Result<DenylistEntries> {
        match &self.backend {
            Backend::Static(snapshot) => Ok(DenylistEntries {
                ips: snapshot.ips.iter().map(IpAddr::to_string).collect(),
                cidrs: snapshot.cidrs.iter().map(IpNet::to_string).collect(),
            }),
            Backend::Dynamic(kv) => {
                let mut ips = kv.smembers(IPS_KEY).await?;
                let mut cidrs = kv.smembers(CIDRS_KEY).await?;
                // Set order is arbitrary; keep reads stable for clients.
                ips.sort();
                cidrs.sort();
                Ok(DenylistEntries { ips, cidrs })
            }
        }
    }

    /// Add a canonical entry. Idempotent.
    pub async fn add(
        &self,
        kind: EntryKind,
        entry: &str,
    ) -> std::result::Result<(), DenylistWriteError> {
        match &self.backend {
            Backend::Static(_) => Err(DenylistWriteError::NoDynamicSource),
            Backend::Dynamic(kv) => kv
                .sadd(kind.key(), entry)
                .await
                .map_err(|e| DenylistWriteError::Kv(e.to_string())),
        }
    }

    /// Remove a canonical entry. Idempotent.
    pub async fn remove(
        &self,
        kind: EntryKind,
        entry: &str,
    ) -> std::result::Result<(), DenylistWriteError> {
        match &self.backend {
            Backend::Static(_) => Err(DenylistWriteError::NoDynamicSource),
            Backend::Dynamic(kv) => kv
                .srem(kind.key(), entry)
                .await
                .map_err(|e| DenylistWriteError::Kv(e.to_string())),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Rule
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub(crate) async fn compile(
    params: &DenylistParams,
    services: &Services,
) -> Result<(NamedRiskHandler, Arc<DenylistStore>)> {
    let parsed = params.parse_entries()?;

    let store = match params.source_list {
        DenylistSource::Static => {
            if parsed.ips.is_empty() && parsed.cidrs.is_empty() {
                return Err(Error::Config(
                    "denylist: a static source requires at least one of ips or cidrs".into(),
                ));
            }
            Arc::new(DenylistStore::fixed(parsed))
        }
        DenylistSource::Redis => {
            let kv = services.require_kv(RULE_NAME)?;
            for ip in &parsed.ips {
                kv.sadd(IPS_KEY, &ip.to_string()).await?;
            }
            for net in &parsed.cidrs {
                kv.sadd(CIDRS_KEY, &net.to_string()).await?;
            }
            Arc::new(DenylistStore::dynamic(kv))
        }
    };

    let handler = NamedRiskHandler::new(
        RULE_NAME,
        params.strategy,
        Arc::new(DenylistRule {
            store: store.clone(),
        }),
    );
    Ok((handler, store))
}

struct DenylistRule {
    store: Arc<DenylistStore>,
}

#[async_trait]
impl RiskEvaluator for DenylistRule {
    async fn score(&self, data: &EventData) -> std::result::Result<f64, String> {
        let ip_str = data.ip().map_err(|e| e.to_string())?;
        let ip: IpAddr = ip_str
            .parse()
            .map_err(|_| format!("invalid IP: {ip_str}"))?;

        let entries = self.store.entries().await.map_err(|e| e.to_string())?;

        for raw in &entries.cidrs {
            let net: IpNet = raw
                .parse()
                .map_err(|_| format!("invalid CIDR or IP: {raw}"))?;
            if net.contains(&ip) {
                return Ok(1.0);
            }
        }
        for raw in &entries.ips {
            let listed: IpAddr = raw
                .parse()
                .map_err(|_| format!("invalid CIDR or IP: {raw}"))?;
            if listed == ip {
                return Ok(1.0);
            }
        }
        Ok(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use rg_domain::Strategy;

    use crate::services::MemoryKv;

    fn static_params(ips: &[&str], cidrs: &[&str]) -> DenylistParams {
        DenylistParams {
            source_list: DenylistSource::Static,
            ips: ips.iter().map(|s| s.to_string()).collect(),
            cidrs: cidrs.iter().map(|s| s.to_string()).collect(),
            strategy: Strategy::Override,
        }
    }

    fn login_from(ip: &str) -> EventData {
        EventData {
            ip: Some(ip.to_string()),
            account: None,
        }
    }

    #[tokio::test]
    async fn exact_ip_and_cidr_matches() {
        let params = static_params(&["9.9.9.9"], &["10.0.0.0/8"]);
        let (handler, _) = compile(&params, &Services::default()).await.unwrap();

        assert_eq!(handler.evaluate(&login_from("9.9.9.9")).await.score, 1.0);
        assert_eq!(handler.evaluate(&login_from("10.42.0.1")).await.score, 1.0);
        assert_eq!(handler.evaluate(&login_from("8.8.8.8")).await.score, 0.0);
    }

    #[tokio::test]
    async fn static_source_rejects_writes() {
        let params = static_params(&["9.9.9.9"], &[]);
        let (_, store) = compile(&params, &Services::default()).await.unwrap();

        assert!(!store.is_dynamic());
        assert!(matches!(
            store.add(EntryKind::Ip, "1.2.3.4").await,
            Err(DenylistWriteError::NoDynamicSource)
        ));
    }

    #[tokio::test]
    async fn dynamic_source_seeds_and_reads_the_kv_store() {
        let kv = Arc::new(MemoryKv::new());
        let params = DenylistParams {
            source_list: DenylistSource::Redis,
            ips: vec!["9.9.9.9".into()],
            cidrs: vec!["10.0.0.0/8".into()],
            strategy: Strategy::Override,
        };
        let (handler, store) = compile(&params, &Services::with_kv(kv)).await.unwrap();

        assert!(store.is_dynamic());
        let entries = store.entries().await.unwrap();
        assert_eq!(entries.ips, vec!["9.9.9.9".to_string()]);
        assert_eq!(entries.cidrs, vec!["10.0.0.0/8".to_string()]);
        assert_eq!(handler.evaluate(&login_from("9.9.9.9")).await.score, 1.0);
    }

    #[tokio::test]
    async fn dynamic_mutations_are_visible_to_the_rule() {
        let kv = Arc::new(MemoryKv::new());
        let params = DenylistParams {
            source_list: DenylistSource::Redis,
            ips: vec![],
            cidrs: vec![],
            strategy: Strategy::Override,
        };
        let (handler, store) = compile(&params, &Services::with_kv(kv)).await.unwrap();

        assert_eq!(handler.evaluate(&login_from("5.5.5.5")).await.score, 0.0);

        store.add(EntryKind::Ip, "5.5.5.5").await.unwrap();
        assert_eq!(handler.evaluate(&login_from("5.5.5.5")).await.score, 1.0);

        store.remove(EntryKind::Ip, "5.5.5.5").await.unwrap();
        assert_eq!(handler.evaluate(&login_from("5.5.5.5")).await.score, 0.0);

        // Adding twice then removing once leaves the set clean.
        store.add(EntryKind::Cidr, "10.0.0.0/8").await.unwrap();
        store.add(EntryKind::Cidr, "10.0.0.0/8").await.unwrap();
        store.remove(EntryKind::Cidr, "10.0.0.0/8").await.unwrap();
        assert!(store.entries().await.unwrap().cidrs.is_empty());
    }

    #[tokio::test]
    async fn invalid_event_ip_reports_error() {
        let params = static_params(&["9.9.9.9"], &[]);
        let (handler, _) = compile(&params, &Services::default()).await.unwrap();

        let result = handler.evaluate(&login_from("not-an-ip")).await;
        assert_eq!(result.score, 0.0);
        assert_eq!(result.err.as_deref(), Some("invalid IP: not-an-ip"));

        let missing = handler.evaluate(&EventData::default()).await;
        assert_eq!(missing.err.as_deref(), Some("missing ip"));
    }

    #[tokio::test]
    async fn empty_static_list_fails_to_compile() {
        let params = static_params(&[], &[]);
        assert!(compile(&params, &Services::default()).await.is_err());
    }
}
