//! Multi-account detection by IP churn
//!
//! Every identity keeps the set of distinct IPs it was seen from since the
//! start of its current churn window. Too many distinct IPs inside one window
//! locks the identity. Locks never expire; only an administrator removes them.
//!
//! Documents are always locked in the order `/locked`, then `/records`.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use cg_common::Clock;
use cg_config::AdmissionConfig;
use cg_store::Documents;
use serde::{Deserialize, Deserializer, Serialize};
use tracing::{debug, info, warn};

use crate::admission::ClientIp;
use crate::audit::AuditLog;
use crate::{run_detached, Result};

pub const RECORDS_PATH: &str = "/records";
pub const LOCKED_PATH: &str = "/locked";

/// Distinct IPs seen for one identity in the current window
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpHistory {
    #[serde(default, deserialize_with = "ip_set")]
    pub ips: BTreeMap<String, bool>,
    /// Start of the current churn window, epoch millis
    #[serde(rename = "lastchanged")]
    pub last_reset: i64,
}

impl IpHistory {
    fn starting(ip: &str, now: i64) -> Self {
        Self {
            ips: BTreeMap::from([(ip.to_string(), true)]),
            last_reset: now,
        }
    }

    pub fn distinct_ips(&self) -> usize {
        self.ips.len()
    }
}

// Older documents stored a cleared set as an empty array
fn ip_set<'de, D>(deserializer: D) -> std::result::Result<BTreeMap<String, bool>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Stored {
        Map(BTreeMap<String, bool>),
        List(Vec<String>),
    }

    Ok(match Stored::deserialize(deserializer)? {
        Stored::Map(map) => map,
        Stored::List(list) => list.into_iter().map(|ip| (ip, true)).collect(),
    })
}

#[derive(Debug, Clone, Copy)]
pub struct ChurnPolicy {
    pub window: Duration,
    /// Identities seen from more than this many IPs in one window are locked
    pub threshold: usize,
}

impl Default for ChurnPolicy {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(3 * 60 * 60),
            threshold: 3,
        }
    }
}

impl From<&AdmissionConfig> for ChurnPolicy {
    fn from(config: &AdmissionConfig) -> Self {
        Self {
            window: config.churn_window(),
            threshold: config.ip_churn_threshold,
        }
    }
}

#[derive(Clone)]
pub struct AbuseDetector {
    documents: Documents,
    clock: Arc<dyn Clock>,
    audit: AuditLog,
    policy: ChurnPolicy,
}

type LockedSet = BTreeMap<String, bool>;

enum ChurnCheck {
    Clear,
    AlreadyLocked,
    NewlyLocked { distinct: usize },
}

impl AbuseDetector {
    pub fn new(
        documents: Documents,
        clock: Arc<dyn Clock>,
        audit: AuditLog,
        policy: ChurnPolicy,
    ) -> Self {
        Self {
            documents,
            clock,
            audit,
            policy,
        }
    }

    pub fn policy(&self) -> ChurnPolicy {
        self.policy
    }

    /// `true` when `identity` is (or has just become) locked.
    ///
    /// `ClientIp::Unknown` is never checked or recorded.
    pub async fn check_and_record(&self, ip: &ClientIp, identity: &str) -> Result<bool> {
        let Some(ip) = ip.known() else {
            return Ok(false);
        };
        let this = self.clone();
        let ip = ip.to_string();
        let identity = identity.to_string();
        run_detached(async move { this.check_known(&ip, &identity).await }).await
    }

    async fn check_known(&self, ip: &str, identity: &str) -> Result<bool> {
        match self.evaluate(ip, identity).await? {
            ChurnCheck::Clear => Ok(false),
            ChurnCheck::AlreadyLocked => Ok(true),
            ChurnCheck::NewlyLocked { distinct } => {
                self.audit
                    .record(
                        &format!(
                            "[LOCK] Identity locked for IP churn (identity: {identity}, ips: {distinct})"
                        ),
                        Some(&format!(
                            "[LOCK] Identity `{identity}` locked after {distinct} IPs in one window"
                        )),
                    )
                    .await;
                Ok(true)
            }
        }
    }

    /// Read-modify-write of `/locked` and `/records`
    async fn evaluate(&self, ip: &str, identity: &str) -> Result<ChurnCheck> {
        let _locked_guard = self.documents.lock(LOCKED_PATH).await;
        let mut locked: LockedSet = self.documents.load(LOCKED_PATH).await?;
        if locked.get(identity).copied().unwrap_or(false) {
            debug!(identity = %identity, "Identity already locked");
            return Ok(ChurnCheck::AlreadyLocked);
        }

        let _records_guard = self.documents.lock(RECORDS_PATH).await;
        let mut records: HashMap<String, IpHistory> = self.documents.load(RECORDS_PATH).await?;
        let now = self.clock.now_millis();

        let history = records
            .entry(identity.to_string())
            .or_insert_with(|| IpHistory::starting(ip, now));

        if now - history.last_reset > self.policy.window.as_millis() as i64 {
            debug!(identity = %identity, "Churn window elapsed, resetting IP history");
            history.ips.clear();
            history.last_reset = now;
        }

        history.ips.insert(ip.to_string(), true);
        let distinct = history.distinct_ips();

        if distinct > self.policy.threshold {
            locked.insert(identity.to_string(), true);
            self.documents.save(LOCKED_PATH, &locked).await?;
            warn!(
                identity = %identity,
                distinct_ips = distinct,
                threshold = self.policy.threshold,
                "Identity locked for IP churn"
            );
            return Ok(ChurnCheck::NewlyLocked { distinct });
        }

        self.documents.save(RECORDS_PATH, &records).await?;
        Ok(ChurnCheck::Clear)
    }

    pub async fn is_locked(&self, identity: &str) -> Result<bool> {
        let locked: LockedSet = self.documents.load(LOCKED_PATH).await?;
        Ok(locked.get(identity).copied().unwrap_or(false))
    }

    /// Lock `identity`. Returns `false` if it already was.
    pub async fn lock(&self, identity: &str) -> Result<bool> {
        self.set_locked(identity, true).await
    }

    /// Unlock `identity`. Returns `false` if it was not locked.
    pub async fn unlock(&self, identity: &str) -> Result<bool> {
        self.set_locked(identity, false).await
    }

    async fn set_locked(&self, identity: &str, lock: bool) -> Result<bool> {
        let this = self.clone();
        let identity = identity.to_string();
        run_detached(async move {
            let _guard = this.documents.lock(LOCKED_PATH).await;
            let mut locked: LockedSet = this.documents.load(LOCKED_PATH).await?;
            let was_locked = locked.get(&identity).copied().unwrap_or(false);
            if was_locked == lock {
                return Ok(false);
            }
            if lock {
                locked.insert(identity.clone(), true);
            } else {
                locked.remove(&identity);
            }
            this.documents.save(LOCKED_PATH, &locked).await?;
            info!(identity = %identity, locked = lock, "Lock state changed");
            Ok(true)
        })
        .await
    }

    pub async fn locked(&self) -> Result<Vec<String>> {
        let locked: LockedSet = self.documents.load(LOCKED_PATH).await?;
        Ok(locked
            .into_iter()
            .filter_map(|(identity, is_locked)| is_locked.then_some(identity))
            .collect())
    }

    pub async fn records(&self) -> Result<BTreeMap<String, IpHistory>> {
        Ok(self.documents.load(RECORDS_PATH).await?)
    }

    /// Drop histories whose window started more than `retention` ago. Such a
    /// history would be reset on the next request anyway.
    pub async fn evict_stale(&self, retention: Duration) -> Result<usize> {
        let retention = retention.max(self.policy.window);
        let this = self.clone();
        run_detached(async move {
            let _guard = this.documents.lock(RECORDS_PATH).await;
            let mut records: HashMap<String, IpHistory> =
                this.documents.load(RECORDS_PATH).await?;
            let cutoff = this.clock.now_millis() - retention.as_millis() as i64;

            let before = records.len();
            records.retain(|_, history| history.last_reset >= cutoff);
            let evicted = before - records.len();

            if evicted > 0 {
                this.documents.save(RECORDS_PATH, &records).await?;
                info!(evicted, remaining = records.len(), "Evicted stale IP histories");
            }
            Ok(evicted)
        })
        .await
    }
}
