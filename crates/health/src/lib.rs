//! Provider availability checks.
//!
//! A check only ever writes `is_available`. Operator-set capability flags are
//! left alone; the effective receive/send modes combine both.

pub mod checker;
pub mod probe;

pub use checker::{CheckSummary, HealthChecker};
pub use probe::{HttpProbe, ProbeClient};

use marketsync_core::RepoError;
use serde::Serialize;
use std::fmt;

#[derive(Debug, thiserror::Error)]
pub enum HealthError {
    #[error("Repository error: {0}")]
    Repo(#[from] RepoError),
    #[error("Retention of {0} days is out of range")]
    Retention(i64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HealthCode {
    Ok,
    Maintenance,
    NetworkDown,
    RateLimit,
    AuthError,
    Unknown,
    SkippedManual,
    SkippedPsp,
    SkippedNoProbe,
}

impl HealthCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthCode::Ok => "OK",
            HealthCode::Maintenance => "MAINTENANCE",
            HealthCode::NetworkDown => "NETWORK_DOWN",
            HealthCode::RateLimit => "RATE_LIMIT",
            HealthCode::AuthError => "AUTH_ERROR",
            HealthCode::Unknown => "UNKNOWN",
            HealthCode::SkippedManual => "SKIPPED_MANUAL",
            HealthCode::SkippedPsp => "SKIPPED_PSP",
            HealthCode::SkippedNoProbe => "SKIPPED_NO_PROBE",
        }
    }

    pub fn is_skipped(&self) -> bool {
        matches!(
            self,
            HealthCode::SkippedManual | HealthCode::SkippedPsp | HealthCode::SkippedNoProbe
        )
    }

    /// Map an HTTP status to a code.
    pub fn from_http_status(status: u16) -> Self {
        match status {
            200 => HealthCode::Ok,
            401 | 403 => HealthCode::AuthError,
            429 => HealthCode::RateLimit,
            500..=599 => HealthCode::NetworkDown,
            _ => HealthCode::Unknown,
        }
    }
}

impl fmt::Display for HealthCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one availability check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthResult {
    pub available: bool,
    pub code: HealthCode,
    pub detail: String,
    pub latency_ms: i32,
}

impl HealthResult {
    pub fn new(available: bool, code: HealthCode, detail: impl Into<String>, latency_ms: i32) -> Self {
        Self {
            available,
            code,
            detail: detail.into(),
            latency_ms,
        }
    }

    pub fn skipped(code: HealthCode, detail: impl Into<String>) -> Self {
        Self::new(true, code, detail, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_status_mapping() {
        assert_eq!(HealthCode::from_http_status(200), HealthCode::Ok);
        assert_eq!(HealthCode::from_http_status(401), HealthCode::AuthError);
        assert_eq!(HealthCode::from_http_status(403), HealthCode::AuthError);
        assert_eq!(HealthCode::from_http_status(429), HealthCode::RateLimit);
        assert_eq!(HealthCode::from_http_status(503), HealthCode::NetworkDown);
        assert_eq!(HealthCode::from_http_status(404), HealthCode::Unknown);
    }

    #[test]
    fn test_code_serializes_as_wire_name() {
        assert_eq!(
            serde_json::to_value(HealthCode::SkippedNoProbe).unwrap(),
            serde_json::json!("SKIPPED_NO_PROBE")
        );
        assert!(HealthCode::SkippedPsp.is_skipped());
        assert!(!HealthCode::Maintenance.is_skipped());
    }
}
