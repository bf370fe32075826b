//! Periodic pruning of stale rate-limit entries and IP histories
//!
//! Both documents otherwise grow with every IP and identity ever seen. An
//! entry older than its window is equivalent to an absent one, so pruning
//! never changes an admission decision. The locked set is never touched.

use std::time::Duration;

use cg_config::EvictionConfig;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::abuse::AbuseDetector;
use crate::rate_limit::RateLimiter;
use crate::Result;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub rate_limits_evicted: usize,
    pub histories_evicted: usize,
}

#[derive(Clone)]
pub struct EvictionSweeper {
    rate_limiter: RateLimiter,
    abuse: AbuseDetector,
    multiplier: u32,
}

impl EvictionSweeper {
    pub fn new(rate_limiter: RateLimiter, abuse: AbuseDetector, multiplier: u32) -> Self {
        Self {
            rate_limiter,
            abuse,
            multiplier: multiplier.max(1),
        }
    }

    pub fn rate_limit_retention(&self) -> Duration {
        self.rate_limiter.cooldown() * self.multiplier
    }

    pub fn history_retention(&self) -> Duration {
        self.abuse.policy().window * self.multiplier
    }

    pub async fn sweep(&self) -> Result<SweepReport> {
        let rate_limits_evicted = self
            .rate_limiter
            .evict_expired(self.rate_limit_retention())
            .await?;
        let histories_evicted = self.abuse.evict_stale(self.history_retention()).await?;

        Ok(SweepReport {
            rate_limits_evicted,
            histories_evicted,
        })
    }
}

/// Spawn the eviction background task. Returns `None` when eviction is disabled.
pub fn spawn_eviction_task(
    rate_limiter: RateLimiter,
    abuse: AbuseDetector,
    config: &EvictionConfig,
    shutdown_tx: broadcast::Sender<()>,
) -> Option<tokio::task::JoinHandle<()>> {
    if !config.enabled {
        info!("Eviction sweep disabled");
        return None;
    }

    let sweeper = EvictionSweeper::new(rate_limiter, abuse, config.retention_multiplier);
    let mut shutdown_rx = shutdown_tx.subscribe();
    let interval = config.sweep_interval();

    info!(
        interval_secs = interval.as_secs(),
        rate_limit_retention_secs = sweeper.rate_limit_retention().as_secs(),
        history_retention_secs = sweeper.history_retention().as_secs(),
        "Starting eviction sweep"
    );

    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);

        // The first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    debug!("Running scheduled eviction sweep");
                    match sweeper.sweep().await {
                        Ok(report) => debug!(
                            rate_limits_evicted = report.rate_limits_evicted,
                            histories_evicted = report.histories_evicted,
                            "Eviction sweep finished"
                        ),
                        Err(e) => warn!(error = %e, "Eviction sweep failed - retrying next interval"),
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Eviction sweep shutting down");
                    break;
                }
            }
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abuse::ChurnPolicy;
    use crate::audit::AuditLog;
    use cg_common::{Clock, ManualClock};
    use cg_store::{Documents, MemoryStore};
    use serde_json::json;
    use std::sync::Arc;

    const START: i64 = 1_700_000_000_000;
    const HOUR: i64 = 60 * 60 * 1000;

    fn components(root: serde_json::Value) -> (RateLimiter, AbuseDetector, Arc<ManualClock>) {
        let documents = Documents::new(
            Arc::new(MemoryStore::with_document(root)),
            Duration::from_secs(1),
        );
        let clock = Arc::new(ManualClock::new(START));
        let dyn_clock: Arc<dyn Clock> = clock.clone();
        let limiter = RateLimiter::new(documents.clone(), dyn_clock.clone(), Duration::from_secs(5));
        let abuse = AbuseDetector::new(
            documents,
            dyn_clock.clone(),
            AuditLog::disabled(dyn_clock),
            ChurnPolicy::default(),
        );
        (limiter, abuse, clock)
    }

    #[test]
    fn test_retention_scales_windows() {
        let (limiter, abuse, _) = components(json!({}));
        let sweeper = EvictionSweeper::new(limiter, abuse, 4);
        assert_eq!(sweeper.rate_limit_retention(), Duration::from_secs(20));
        assert_eq!(sweeper.history_retention(), Duration::from_secs(12 * 3600));
    }

    #[tokio::test]
    async fn test_sweep_prunes_both_documents() {
        let (limiter, abuse, clock) = components(json!({
            "ratelimits": {"10.0.0.1": START, "10.0.0.2": START + 13 * HOUR},
            "records": {
                "old": {"ips": {"10.0.0.1": true}, "lastchanged": START},
                "new": {"ips": {"10.0.0.2": true}, "lastchanged": START + 12 * HOUR},
            },
            "locked": {"old": true}
        }));
        clock.set(START + 13 * HOUR);

        let sweeper = EvictionSweeper::new(limiter.clone(), abuse.clone(), 4);
        let report = sweeper.sweep().await.unwrap();

        assert_eq!(
            report,
            SweepReport {
                rate_limits_evicted: 1,
                histories_evicted: 1
            }
        );
        assert!(abuse.is_locked("old").await.unwrap());
        assert_eq!(limiter.last_seen("10.0.0.2").await.unwrap(), Some(START + 13 * HOUR));
    }

    #[tokio::test]
    async fn test_disabled_task_is_not_spawned() {
        let (limiter, abuse, _) = components(json!({}));
        let (shutdown_tx, _) = broadcast::channel(1);
        let config = EvictionConfig {
            enabled: false,
            ..Default::default()
        };
        assert!(spawn_eviction_task(limiter, abuse, &config, shutdown_tx).is_none());
    }

    #[tokio::test]
    async fn test_task_stops_on_shutdown() {
        let (limiter, abuse, _) = components(json!({}));
        let (shutdown_tx, _) = broadcast::channel(1);
        let config = EvictionConfig {
            sweep_interval_secs: 1,
            ..Default::default()
        };

        let handle = spawn_eviction_task(limiter, abuse, &config, shutdown_tx.clone()).unwrap();
        shutdown_tx.send(()).unwrap();

        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("task did not stop")
            .unwrap();
    }
}
