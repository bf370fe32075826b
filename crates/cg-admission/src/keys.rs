//! Access keys: one durable opaque key per identity
//!
//! The `/keys` document maps identity to key. A key, once issued, never
//! changes; it is removed only by administrative revocation.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use cg_common::Clock;
use cg_config::AdmissionConfig;
use cg_store::Documents;
use serde::Serialize;
use tracing::{debug, error, info};

use crate::audit::{mask_key, AuditLog};
use crate::random::{RandomCodeGenerator, TokenSource, ALPHANUMERIC};
use crate::{run_detached, AdmissionError, Result};

pub const KEYS_PATH: &str = "/keys";

/// A month, as counted for account age
const MONTH_MILLIS: i64 = 30 * 24 * 60 * 60 * 1000;

#[derive(Debug, Clone, Copy)]
pub struct KeySettings {
    pub key_length: usize,
    pub retry_limit: u32,
}

impl Default for KeySettings {
    fn default() -> Self {
        Self {
            key_length: 32,
            retry_limit: 100,
        }
    }
}

impl From<&AdmissionConfig> for KeySettings {
    fn from(config: &AdmissionConfig) -> Self {
        Self {
            key_length: config.key_length,
            retry_limit: config.key_retry_limit,
        }
    }
}

/// Minimum platform account age before a key is issued
#[derive(Debug, Clone, Copy)]
pub struct AccountAgePolicy {
    pub min_months: i64,
}

impl Default for AccountAgePolicy {
    fn default() -> Self {
        Self { min_months: 3 }
    }
}

impl AccountAgePolicy {
    /// Whole 30-day months between `created_at_millis` and `now_millis`
    pub fn age_months(created_at_millis: i64, now_millis: i64) -> i64 {
        (now_millis - created_at_millis).div_euclid(MONTH_MILLIS)
    }

    pub fn allows(&self, created_at_millis: i64, now_millis: i64) -> bool {
        Self::age_months(created_at_millis, now_millis) >= self.min_months
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum KeyIssuance {
    Issued { key: String },
    AccountTooYoung { age_months: i64, required_months: i64 },
}

#[derive(Clone)]
pub struct KeyRegistry {
    documents: Documents,
    tokens: Arc<dyn TokenSource>,
    audit: AuditLog,
    clock: Arc<dyn Clock>,
    settings: KeySettings,
    age_policy: AccountAgePolicy,
}

impl KeyRegistry {
    pub fn new(documents: Documents, audit: AuditLog, clock: Arc<dyn Clock>) -> Self {
        Self {
            documents,
            tokens: Arc::new(RandomCodeGenerator::new()),
            audit,
            clock,
            settings: KeySettings::default(),
            age_policy: AccountAgePolicy::default(),
        }
    }

    pub fn with_settings(mut self, settings: KeySettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_age_policy(mut self, policy: AccountAgePolicy) -> Self {
        self.age_policy = policy;
        self
    }

    pub fn with_token_source(mut self, tokens: Arc<dyn TokenSource>) -> Self {
        self.tokens = tokens;
        self
    }

    /// Existing key for `identity`, or a freshly minted unique one.
    ///
    /// Runs to completion even if the caller stops waiting.
    pub async fn get_or_create_key(&self, identity: &str) -> Result<String> {
        let this = self.clone();
        let identity = identity.to_string();
        run_detached(async move { this.find_or_create(&identity).await }).await
    }

    async fn find_or_create(&self, identity: &str) -> Result<String> {
        let (key, created) = self.find_or_mint(identity).await?;

        let event = if created { "New user" } else { "Returning user" };
        self.audit
            .record(
                &format!("[KEY] {event} (identity: {identity}, key: {key})"),
                Some(&format!(
                    "[KEY] {event} (identity: `{identity}`, key: `{}`)",
                    mask_key(&key)
                )),
            )
            .await;
        Ok(key)
    }

    /// The key of `identity` and whether it was minted just now. Holds the
    /// `/keys` lock only for the read-modify-write.
    async fn find_or_mint(&self, identity: &str) -> Result<(String, bool)> {
        let _guard = self.documents.lock(KEYS_PATH).await;
        let mut keys: HashMap<String, String> = self.documents.load(KEYS_PATH).await?;

        if let Some(key) = keys.get(identity).cloned() {
            debug!(identity = %identity, "Returning user");
            return Ok((key, false));
        }

        let key = {
            let issued: HashSet<&str> = keys.values().map(String::as_str).collect();
            self.mint_unique(&issued)?
        };
        keys.insert(identity.to_string(), key.clone());
        self.documents.save(KEYS_PATH, &keys).await?;

        info!(identity = %identity, total_keys = keys.len(), "Issued access key");
        Ok((key, true))
    }

    fn mint_unique(&self, issued: &HashSet<&str>) -> Result<String> {
        for _ in 0..self.settings.retry_limit {
            let candidate = self.tokens.token(ALPHANUMERIC, self.settings.key_length);
            if !issued.contains(candidate.as_str()) {
                return Ok(candidate);
            }
            debug!("Generated key collided with an existing key, retrying");
        }

        error!(
            attempts = self.settings.retry_limit,
            existing_keys = issued.len(),
            "Key generation exhausted"
        );
        Err(AdmissionError::KeyGenerationExhausted {
            attempts: self.settings.retry_limit,
        })
    }

    /// Apply the account age policy, then issue or return the key
    pub async fn issue_for_account(
        &self,
        identity: &str,
        account_created_at_millis: i64,
    ) -> Result<KeyIssuance> {
        let now = self.clock.now_millis();
        if !self.age_policy.allows(account_created_at_millis, now) {
            let age_months = AccountAgePolicy::age_months(account_created_at_millis, now);
            info!(
                identity = %identity,
                age_months,
                required_months = self.age_policy.min_months,
                "Account too young for a key"
            );
            return Ok(KeyIssuance::AccountTooYoung {
                age_months,
                required_months: self.age_policy.min_months,
            });
        }

        let key = self.get_or_create_key(identity).await?;
        Ok(KeyIssuance::Issued { key })
    }

    pub async fn key_for(&self, identity: &str) -> Result<Option<String>> {
        let keys: HashMap<String, String> = self.documents.load(KEYS_PATH).await?;
        Ok(keys.get(identity).cloned())
    }

    /// Reverse lookup used by in-game requests that only carry the key
    pub async fn identity_for_key(&self, key: &str) -> Result<Option<String>> {
        if key.is_empty() {
            return Ok(None);
        }
        let keys: HashMap<String, String> = self.documents.load(KEYS_PATH).await?;
        Ok(keys
            .into_iter()
            .find_map(|(identity, issued)| (issued == key).then_some(identity)))
    }

    /// Delete the key of `identity`. Returns whether a key existed.
    pub async fn revoke(&self, identity: &str) -> Result<bool> {
        let this = self.clone();
        let identity = identity.to_string();
        run_detached(async move {
            let _guard = this.documents.lock(KEYS_PATH).await;
            let mut keys: HashMap<String, String> = this.documents.load(KEYS_PATH).await?;
            if keys.remove(&identity).is_none() {
                return Ok(false);
            }
            this.documents.save(KEYS_PATH, &keys).await?;
            info!(identity = %identity, "Revoked access key");
            Ok(true)
        })
        .await
    }

    pub async fn count(&self) -> Result<usize> {
        let keys: HashMap<String, String> = self.documents.load(KEYS_PATH).await?;
        Ok(keys.len())
    }
}
