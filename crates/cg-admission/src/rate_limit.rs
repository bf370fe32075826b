//! Per-IP request cooldown backed by the `/ratelimits` document

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use cg_common::Clock;
use cg_store::Documents;
use tracing::{debug, info};

use crate::admission::ClientIp;
use crate::{run_detached, Result};

pub const RATE_LIMITS_PATH: &str = "/ratelimits";

#[derive(Clone)]
pub struct RateLimiter {
    documents: Documents,
    clock: Arc<dyn Clock>,
    cooldown: Duration,
}

impl RateLimiter {
    pub fn new(documents: Documents, clock: Arc<dyn Clock>, cooldown: Duration) -> Self {
        Self {
            documents,
            clock,
            cooldown,
        }
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// `true` when the request may proceed. An allowed request restarts the
    /// cooldown; a denied one leaves it untouched. `ClientIp::Unknown` is
    /// always allowed and never stored.
    pub async fn check_and_record(&self, ip: &ClientIp) -> Result<bool> {
        let Some(ip) = ip.known() else {
            return Ok(true);
        };
        let this = self.clone();
        let ip = ip.to_string();
        run_detached(async move { this.check_known(&ip).await }).await
    }

    async fn check_known(&self, ip: &str) -> Result<bool> {
        let _guard = self.documents.lock(RATE_LIMITS_PATH).await;
        let mut limits: HashMap<String, i64> = self.documents.load(RATE_LIMITS_PATH).await?;
        let now = self.clock.now_millis();

        if let Some(&last) = limits.get(ip) {
            let elapsed = now - last;
            if elapsed < self.cooldown.as_millis() as i64 {
                debug!(ip = %ip, elapsed_ms = elapsed, "Rate limited");
                return Ok(false);
            }
        }

        limits.insert(ip.to_string(), now);
        self.documents.save(RATE_LIMITS_PATH, &limits).await?;
        Ok(true)
    }

    /// Drop entries last seen more than `retention` ago. Anything older than
    /// the cooldown no longer affects a decision.
    pub async fn evict_expired(&self, retention: Duration) -> Result<usize> {
        let retention = retention.max(self.cooldown);
        let this = self.clone();
        run_detached(async move {
            let _guard = this.documents.lock(RATE_LIMITS_PATH).await;
            let mut limits: HashMap<String, i64> =
                this.documents.load(RATE_LIMITS_PATH).await?;
            let cutoff = this.clock.now_millis() - retention.as_millis() as i64;

            let before = limits.len();
            limits.retain(|_, last| *last >= cutoff);
            let evicted = before - limits.len();

            if evicted > 0 {
                this.documents.save(RATE_LIMITS_PATH, &limits).await?;
                info!(evicted, remaining = limits.len(), "Evicted expired rate limit entries");
            }
            Ok(evicted)
        })
        .await
    }

    pub async fn last_seen(&self, ip: &str) -> Result<Option<i64>> {
        let limits: HashMap<String, i64> = self.documents.load(RATE_LIMITS_PATH).await?;
        Ok(limits.get(ip).copied())
    }
}
