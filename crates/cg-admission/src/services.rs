//! Wiring of all admission components over one document store

use std::sync::Arc;

use cg_common::{Clock, SystemClock};
use cg_config::AppConfig;
use cg_store::{ArtifactStore, DocumentStore, Documents, FsArtifactStore, JsonFileStore};
use tokio::sync::broadcast;
use tracing::info;

use crate::abuse::{AbuseDetector, ChurnPolicy};
use crate::admin::AdminService;
use crate::admission::Gatekeeper;
use crate::audit::AuditLog;
use crate::courses::{CodeLayout, CourseCodeAllocator, CourseRegistry};
use crate::keys::{AccountAgePolicy, KeyRegistry, KeySettings};
use crate::notification::create_notifier;
use crate::rate_limit::RateLimiter;
use crate::rating::RatingRegistry;
use crate::sweep::{spawn_eviction_task, EvictionSweeper};
use crate::{AdmissionError, Result};

#[derive(Clone)]
pub struct AdmissionServices {
    pub documents: Documents,
    pub audit: AuditLog,
    pub keys: KeyRegistry,
    pub rate_limiter: RateLimiter,
    pub abuse: AbuseDetector,
    pub courses: CourseRegistry,
    pub ratings: RatingRegistry,
    pub gatekeeper: Gatekeeper,
    pub admin: AdminService,
    config: AppConfig,
}

impl AdmissionServices {
    /// Open the JSON file store, the course directory and the audit log
    /// described by `config`
    pub async fn open(config: &AppConfig) -> Result<Self> {
        let database = config.store.database_file();
        let store = JsonFileStore::open(&database).await?;
        let artifacts = FsArtifactStore::open(&config.store.courses_dir)
            .await
            .map_err(AdmissionError::Artifact)?;
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let audit = AuditLog::new(
            &config.audit.log_path,
            create_notifier(&config.audit),
            clock.clone(),
        );

        info!(
            database = %database.display(),
            courses_dir = %config.store.courses_dir,
            production = config.store.production,
            "Admission services opened"
        );

        Ok(Self::assemble(
            config,
            Arc::new(store),
            Arc::new(artifacts),
            audit,
            clock,
        ))
    }

    pub fn assemble(
        config: &AppConfig,
        store: Arc<dyn DocumentStore>,
        artifacts: Arc<dyn ArtifactStore>,
        audit: AuditLog,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let admission = &config.admission;
        let documents = Documents::new(store, config.store.access_timeout());

        let keys = KeyRegistry::new(documents.clone(), audit.clone(), clock.clone())
            .with_settings(KeySettings::from(admission))
            .with_age_policy(AccountAgePolicy {
                min_months: admission.min_account_age_months,
            });
        let rate_limiter = RateLimiter::new(documents.clone(), clock.clone(), admission.cooldown());
        let abuse = AbuseDetector::new(
            documents.clone(),
            clock.clone(),
            audit.clone(),
            ChurnPolicy::from(admission),
        );
        let allocator = CourseCodeAllocator::new(documents.clone(), artifacts)
            .with_layout(CodeLayout::from(admission));
        let courses = CourseRegistry::new(allocator, audit.clone(), clock);
        let ratings = RatingRegistry::new(documents.clone());
        let gatekeeper = Gatekeeper::new(
            rate_limiter.clone(),
            abuse.clone(),
            keys.clone(),
            audit.clone(),
        );
        let admin = AdminService::new(
            documents.clone(),
            keys.clone(),
            abuse.clone(),
            courses.clone(),
            ratings.clone(),
            audit.clone(),
        );

        Self {
            documents,
            audit,
            keys,
            rate_limiter,
            abuse,
            courses,
            ratings,
            gatekeeper,
            admin,
            config: config.clone(),
        }
    }

    pub fn sweeper(&self) -> EvictionSweeper {
        EvictionSweeper::new(
            self.rate_limiter.clone(),
            self.abuse.clone(),
            self.config.eviction.retention_multiplier,
        )
    }

    pub fn spawn_eviction(
        &self,
        shutdown_tx: broadcast::Sender<()>,
    ) -> Option<tokio::task::JoinHandle<()>> {
        spawn_eviction_task(
            self.rate_limiter.clone(),
            self.abuse.clone(),
            &self.config.eviction,
            shutdown_tx,
        )
    }
}
