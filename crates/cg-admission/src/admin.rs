//! Administrative actions
//!
//! Administrators are the identities marked `true` in the `/admins` document.
//! Outcomes are user-facing: a refused action is a `success: false` outcome,
//! not an error. Errors are reserved for store and artifact failures.

use std::collections::BTreeMap;

use cg_store::Documents;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::abuse::AbuseDetector;
use crate::audit::{mask_key, AuditLog};
use crate::courses::CourseRegistry;
use crate::keys::KeyRegistry;
use crate::rating::RatingRegistry;
use crate::{AdmissionError, Result};

pub const ADMINS_PATH: &str = "/admins";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminCommand {
    AddKey(String),
    RemoveKey(String),
    LockUser(String),
    UnlockUser(String),
    RemoveCourse(String),
    ShowLogs,
    ShowRecords,
    ShowLocks,
}

/// Wire form: `{ "action": "lockUser", "target": "7656..." }`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AdminRequest {
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub target: Option<String>,
}

impl AdminCommand {
    pub fn parse(request: &AdminRequest) -> std::result::Result<Self, AdminOutcome> {
        let target = || {
            request
                .target
                .as_deref()
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string)
                .ok_or_else(|| {
                    AdminOutcome::failure("Target not provided. Please provide a target.")
                })
        };

        match request.action.as_str() {
            "addKey" => Ok(AdminCommand::AddKey(target()?)),
            "removeKey" => Ok(AdminCommand::RemoveKey(target()?)),
            "lockUser" => Ok(AdminCommand::LockUser(target()?)),
            "unlockUser" => Ok(AdminCommand::UnlockUser(target()?)),
            "removeCourse" => Ok(AdminCommand::RemoveCourse(target()?)),
            "showLogs" => Ok(AdminCommand::ShowLogs),
            "showRecords" => Ok(AdminCommand::ShowRecords),
            "showLocks" => Ok(AdminCommand::ShowLocks),
            _ => Err(AdminOutcome::failure("Invalid action provided.")),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            AdminCommand::AddKey(_) => "addKey",
            AdminCommand::RemoveKey(_) => "removeKey",
            AdminCommand::LockUser(_) => "lockUser",
            AdminCommand::UnlockUser(_) => "unlockUser",
            AdminCommand::RemoveCourse(_) => "removeCourse",
            AdminCommand::ShowLogs => "showLogs",
            AdminCommand::ShowRecords => "showRecords",
            AdminCommand::ShowLocks => "showLocks",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdminOutcome {
    pub success: bool,
    pub message: String,
}

impl AdminOutcome {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

#[derive(Clone)]
pub struct AdminService {
    documents: Documents,
    keys: KeyRegistry,
    abuse: AbuseDetector,
    courses: CourseRegistry,
    ratings: RatingRegistry,
    audit: AuditLog,
}

impl AdminService {
    pub fn new(
        documents: Documents,
        keys: KeyRegistry,
        abuse: AbuseDetector,
        courses: CourseRegistry,
        ratings: RatingRegistry,
        audit: AuditLog,
    ) -> Self {
        Self {
            documents,
            keys,
            abuse,
            courses,
            ratings,
            audit,
        }
    }

    pub async fn is_admin(&self, identity: &str) -> Result<bool> {
        let admins: BTreeMap<String, bool> = self.documents.load(ADMINS_PATH).await?;
        Ok(admins.get(identity).copied().unwrap_or(false))
    }

    /// Run `command` on behalf of `admin`. Membership is checked first.
    pub async fn execute(&self, admin: &str, command: AdminCommand) -> Result<AdminOutcome> {
        if !self.is_admin(admin).await? {
            warn!(identity = %admin, action = command.name(), "Rejected admin action from non-admin");
            return Ok(AdminOutcome::failure("You are not an administrator."));
        }
        self.apply(admin, command).await
    }

    /// Run `command` without a membership check, for trusted callers such
    /// as the operator CLI. `admin` names the actor in the audit trail.
    pub async fn apply(&self, admin: &str, command: AdminCommand) -> Result<AdminOutcome> {
        info!(admin = %admin, action = command.name(), "Executing admin action");

        match command {
            AdminCommand::AddKey(target) => {
                let key = self.keys.get_or_create_key(&target).await?;
                self.audit_action(
                    &format!("Added new user (Admin: {admin}, identity: {target}, key: {key})"),
                    &format!(
                        "Added new user (Admin: `{admin}`, identity: `{target}`, key: `{}`)",
                        mask_key(&key)
                    ),
                )
                .await;
                Ok(AdminOutcome::success(format!("Key added successfully.\n{key}")))
            }
            AdminCommand::RemoveKey(target) => {
                if !self.keys.revoke(&target).await? {
                    return Ok(AdminOutcome::failure("Invalid identity provided."));
                }
                self.audit_action(
                    &format!("Removed a user (Admin: {admin}, identity: {target})"),
                    &format!("Removed a user (Admin: `{admin}`, identity: `{target}`)"),
                )
                .await;
                Ok(AdminOutcome::success(format!("Key removed successfully.\n{target}")))
            }
            AdminCommand::LockUser(target) => {
                if !self.abuse.lock(&target).await? {
                    return Ok(AdminOutcome::failure("User is already locked."));
                }
                self.audit_action(
                    &format!("Locked a user (Admin: {admin}, identity: {target})"),
                    &format!("Locked a user (Admin: `{admin}`, identity: `{target}`)"),
                )
                .await;
                Ok(AdminOutcome::success(format!("User is now locked.\n{target}")))
            }
            AdminCommand::UnlockUser(target) => {
                if !self.abuse.unlock(&target).await? {
                    return Ok(AdminOutcome::failure("User is not locked."));
                }
                self.audit_action(
                    &format!("Unlocked a user (Admin: {admin}, identity: {target})"),
                    &format!("Unlocked a user (Admin: `{admin}`, identity: `{target}`)"),
                )
                .await;
                Ok(AdminOutcome::success(format!("User is now unlocked.\n{target}")))
            }
            AdminCommand::RemoveCourse(target) => {
                let code = target.to_uppercase();
                if !self.courses.remove(&code).await? {
                    return Ok(AdminOutcome::failure("Invalid course code provided."));
                }
                self.ratings.clear(&code).await?;
                self.audit_action(
                    &format!("Removed a course (Admin: {admin}, course: {code})"),
                    &format!("Removed a course (Admin: `{admin}`, course: `{code}`)"),
                )
                .await;
                Ok(AdminOutcome::success(format!("Course removed successfully.\n{code}")))
            }
            AdminCommand::ShowLogs => {
                let logs = self
                    .audit
                    .read_all()
                    .await
                    .map_err(|e| AdmissionError::Internal(format!("failed to read audit log: {e}")))?;
                if logs.is_empty() {
                    Ok(AdminOutcome::failure("No logs found."))
                } else {
                    Ok(AdminOutcome::success(logs))
                }
            }
            AdminCommand::ShowRecords => {
                let records = self.abuse.records().await?;
                let message = serde_json::to_string(&records)
                    .map_err(|e| AdmissionError::Internal(e.to_string()))?;
                Ok(AdminOutcome::success(message))
            }
            AdminCommand::ShowLocks => {
                let locked = self.abuse.locked().await?;
                let message = if locked.is_empty() {
                    "{}".to_string()
                } else {
                    locked
                        .iter()
                        .map(|identity| format!("{identity} - true"))
                        .collect::<Vec<_>>()
                        .join("\n")
                };
                Ok(AdminOutcome::success(message))
            }
        }
    }

    /// Parse and execute a wire request
    pub async fn handle(&self, admin: &str, request: &AdminRequest) -> Result<AdminOutcome> {
        match AdminCommand::parse(request) {
            Ok(command) => self.execute(admin, command).await,
            Err(outcome) => Ok(outcome),
        }
    }

    async fn audit_action(&self, local: &str, remote: &str) {
        self.audit
            .record(&format!("[ADMIN] {local}"), Some(&format!("[ADMIN] {remote}")))
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(action: &str, target: Option<&str>) -> AdminRequest {
        AdminRequest {
            action: action.to_string(),
            target: target.map(str::to_string),
        }
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(
            AdminCommand::parse(&request("lockUser", Some("alice"))),
            Ok(AdminCommand::LockUser("alice".to_string()))
        );
        assert_eq!(
            AdminCommand::parse(&request("showLocks", None)),
            Ok(AdminCommand::ShowLocks)
        );
    }

    #[test]
    fn test_parse_requires_target() {
        let outcome = AdminCommand::parse(&request("addKey", Some("  "))).unwrap_err();
        assert!(!outcome.success);
        assert_eq!(outcome.message, "Target not provided. Please provide a target.");
    }

    #[test]
    fn test_parse_unknown_action() {
        let outcome = AdminCommand::parse(&request("dropTables", Some("x"))).unwrap_err();
        assert_eq!(outcome, AdminOutcome::failure("Invalid action provided."));
    }

    #[test]
    fn test_request_from_json() {
        let request: AdminRequest =
            serde_json::from_value(serde_json::json!({"action": "removeCourse", "target": "abcd-efgh-ijkl"}))
                .unwrap();
        assert_eq!(
            AdminCommand::parse(&request),
            Ok(AdminCommand::RemoveCourse("abcd-efgh-ijkl".to_string()))
        );
    }
}
