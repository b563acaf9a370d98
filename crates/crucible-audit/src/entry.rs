use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crucible_sandbox::{ResourceUsage, SandboxKind};
use crucible_validate::{RiskLevel, Violation};

/// Terminal classification of one pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Success,
    Blocked,
    Denied,
    Timeout,
    Oom,
    Error,
    Cancelled,
}

impl Outcome {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Blocked => "blocked",
            Self::Denied => "denied",
            Self::Timeout => "timeout",
            Self::Oom => "oom",
            Self::Error => "error",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Outcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(Self::Success),
            "blocked" => Ok(Self::Blocked),
            "denied" => Ok(Self::Denied),
            "timeout" => Ok(Self::Timeout),
            "oom" => Ok(Self::Oom),
            "error" => Ok(Self::Error),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(format!("unknown outcome '{other}'")),
        }
    }
}

/// Everything the caller knows before the log assigns identity and order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryDraft {
    pub session_id: String,
    pub user_id: Option<String>,
    pub action: String,
    pub code_hash: String,
    pub risk_level: RiskLevel,
    pub violations: Vec<Violation>,
    pub approved: bool,
    pub auto_approved: bool,
    pub sandbox_kind: Option<SandboxKind>,
    pub duration_ms: u64,
    pub stdout_hash: String,
    pub stderr_hash: String,
    pub resource_usage: ResourceUsage,
    pub outcome: Outcome,
}

/// One immutable audit record. `seq` is monotonic per session; nothing in
/// the API can rewrite an entry once it is on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub seq: u64,
    #[serde(flatten)]
    pub draft: EntryDraft,
}

/// Content hash used for code and stream digests; raw values never reach
/// the log.
#[must_use]
pub fn content_hash(data: &[u8]) -> String {
    blake3::hash(data).to_hex().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_roundtrip() {
        for o in [
            Outcome::Success,
            Outcome::Blocked,
            Outcome::Denied,
            Outcome::Timeout,
            Outcome::Oom,
            Outcome::Error,
            Outcome::Cancelled,
        ] {
            assert_eq!(o.as_str().parse::<Outcome>().unwrap(), o);
        }
        assert!("exploded".parse::<Outcome>().is_err());
    }

    #[test]
    fn entry_serialises_flat() {
        let entry = AuditEntry {
            id: Uuid::nil(),
            timestamp: Utc::now(),
            seq: 1,
            draft: EntryDraft {
                session_id: "s1".into(),
                user_id: None,
                action: "execute".into(),
                code_hash: content_hash(b"code"),
                risk_level: RiskLevel::Low,
                violations: vec![],
                approved: true,
                auto_approved: true,
                sandbox_kind: Some(SandboxKind::Process),
                duration_ms: 5,
                stdout_hash: content_hash(b"out"),
                stderr_hash: content_hash(b""),
                resource_usage: ResourceUsage::default(),
                outcome: Outcome::Success,
            },
        };
        let json = serde_json::to_value(&entry).unwrap();
        // Flattened: draft fields sit at the top level of the record.
        assert_eq!(json["action"], "execute");
        assert_eq!(json["outcome"], "success");
        assert_eq!(json["seq"], 1);
    }

    #[test]
    fn content_hash_is_stable_hex() {
        let h = content_hash(b"hello");
        assert_eq!(h.len(), 64);
        assert_eq!(h, content_hash(b"hello"));
        assert_ne!(h, content_hash(b"world"));
    }
}
