//! Request admission pipeline
//!
//! A request handler resolves the client IP and the identity, then asks the
//! `Gatekeeper`. The rate limiter runs first and the abuse detector second;
//! each step's write completes before the next step reads.

use std::fmt;

use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::abuse::AbuseDetector;
use crate::audit::AuditLog;
use crate::keys::KeyRegistry;
use crate::payload::{CourseFilePayload, PayloadShapeError};
use crate::rate_limit::RateLimiter;
use crate::Result;

/// Header value used when the proxy could not determine the client address
pub const UNKNOWN_IP: &str = "Unknown";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ClientIp {
    Known(String),
    /// Exempt from rate limiting and churn tracking
    Unknown,
}

impl ClientIp {
    /// From a forwarded-for style header. Only the first hop is used.
    pub fn from_header(value: Option<&str>) -> Self {
        let first = value
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .unwrap_or_default();
        if first.is_empty() || first == UNKNOWN_IP {
            ClientIp::Unknown
        } else {
            ClientIp::Known(first.to_string())
        }
    }

    pub fn known(&self) -> Option<&str> {
        match self {
            ClientIp::Known(ip) => Some(ip),
            ClientIp::Unknown => None,
        }
    }
}

impl fmt::Display for ClientIp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientIp::Known(ip) => write!(f, "{ip}"),
            ClientIp::Unknown => write!(f, "{UNKNOWN_IP}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum DenialReason {
    RateLimited,
    Locked,
    UnknownKey,
    InvalidPayload { error: PayloadShapeError },
}

impl DenialReason {
    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            DenialReason::RateLimited => "rate_limited",
            DenialReason::Locked => "locked",
            DenialReason::UnknownKey => "unknown_key",
            DenialReason::InvalidPayload { .. } => "invalid_payload",
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            DenialReason::RateLimited => "You are being rate limited, try again in a few seconds.",
            DenialReason::Locked => {
                "Your account has been locked. Contact an administrator if you think this is a mistake."
            }
            DenialReason::UnknownKey => "Invalid access key.",
            DenialReason::InvalidPayload { .. } => "Invalid course file.",
        }
    }
}

impl fmt::Display for DenialReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DenialReason::InvalidPayload { error } => write!(f, "{}: {error}", self.code()),
            _ => write!(f, "{}", self.code()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Admission {
    Admitted { identity: String },
    Denied(DenialReason),
}

impl Admission {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Admission::Admitted { .. })
    }

    pub fn denial(&self) -> Option<&DenialReason> {
        match self {
            Admission::Denied(reason) => Some(reason),
            Admission::Admitted { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum UploadAdmission {
    Accepted {
        identity: String,
        payload: CourseFilePayload,
    },
    Denied(DenialReason),
}

#[derive(Clone)]
pub struct Gatekeeper {
    rate_limiter: RateLimiter,
    abuse: AbuseDetector,
    keys: KeyRegistry,
    audit: AuditLog,
}

impl Gatekeeper {
    pub fn new(
        rate_limiter: RateLimiter,
        abuse: AbuseDetector,
        keys: KeyRegistry,
        audit: AuditLog,
    ) -> Self {
        Self {
            rate_limiter,
            abuse,
            keys,
            audit,
        }
    }

    /// Rate limit, then churn check, for an already authenticated identity
    pub async fn admit(&self, ip: &ClientIp, identity: &str) -> Result<Admission> {
        if !self.rate_limiter.check_and_record(ip).await? {
            let reason = self.deny(ip, identity, DenialReason::RateLimited).await;
            return Ok(Admission::Denied(reason));
        }
        if self.abuse.check_and_record(ip, identity).await? {
            let reason = self.deny(ip, identity, DenialReason::Locked).await;
            return Ok(Admission::Denied(reason));
        }
        debug!(ip = %ip, identity = %identity, "Admitted");
        Ok(Admission::Admitted {
            identity: identity.to_string(),
        })
    }

    /// Admission for requests that carry only an access key
    pub async fn admit_key(&self, ip: &ClientIp, key: Option<&str>) -> Result<Admission> {
        let identity = match key.filter(|k| !k.is_empty()) {
            Some(key) => self.keys.identity_for_key(key).await?,
            None => None,
        };
        match identity {
            Some(identity) => self.admit(ip, &identity).await,
            None => Ok(Admission::Denied(
                self.deny(ip, "-", DenialReason::UnknownKey).await,
            )),
        }
    }

    /// `admit`, then the course file shape check
    pub async fn admit_upload(
        &self,
        ip: &ClientIp,
        identity: &str,
        payload: &Value,
    ) -> Result<UploadAdmission> {
        match self.admit(ip, identity).await? {
            Admission::Denied(reason) => Ok(UploadAdmission::Denied(reason)),
            Admission::Admitted { identity } => match CourseFilePayload::decode(payload) {
                Ok(payload) => Ok(UploadAdmission::Accepted { identity, payload }),
                Err(error) => {
                    let reason = DenialReason::InvalidPayload { error };
                    Ok(UploadAdmission::Denied(self.deny(ip, &identity, reason).await))
                }
            },
        }
    }

    async fn deny(&self, ip: &ClientIp, identity: &str, reason: DenialReason) -> DenialReason {
        debug!(ip = %ip, identity = %identity, reason = %reason, "Denied");
        self.audit
            .record_local(&format!("[DENY] {reason} (ip: {ip}, identity: {identity})"))
            .await;
        reason
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_ip_from_header() {
        assert_eq!(ClientIp::from_header(None), ClientIp::Unknown);
        assert_eq!(ClientIp::from_header(Some("")), ClientIp::Unknown);
        assert_eq!(ClientIp::from_header(Some("Unknown")), ClientIp::Unknown);
        assert_eq!(
            ClientIp::from_header(Some("203.0.113.7")),
            ClientIp::Known("203.0.113.7".to_string())
        );
        assert_eq!(
            ClientIp::from_header(Some(" 203.0.113.7, 10.0.0.1")),
            ClientIp::Known("203.0.113.7".to_string())
        );
    }

    #[test]
    fn test_denial_codes_are_stable() {
        assert_eq!(DenialReason::RateLimited.code(), "rate_limited");
        assert_eq!(DenialReason::Locked.code(), "locked");
        assert_eq!(DenialReason::UnknownKey.code(), "unknown_key");

        let reason = DenialReason::InvalidPayload {
            error: PayloadShapeError::WrongLength { found: 2 },
        };
        assert_eq!(reason.code(), "invalid_payload");
        assert_eq!(
            serde_json::to_value(&reason).unwrap(),
            serde_json::json!({
                "reason": "invalid_payload",
                "error": {"kind": "wrong_length", "found": 2}
            })
        );
    }

    #[test]
    fn test_admission_serializes() {
        let admitted = Admission::Admitted {
            identity: "alice".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&admitted).unwrap(),
            serde_json::json!({"status": "admitted", "identity": "alice"})
        );
        assert!(admitted.is_admitted());
        assert_eq!(Admission::Denied(DenialReason::Locked).denial(), Some(&DenialReason::Locked));
    }
}
