//! Compliance aggregation over a time range.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crucible_validate::RiskLevel;

use crate::entry::AuditEntry;
use crate::error::AuditError;
use crate::log::AuditLog;
use crate::query::AuditFilter;

/// Counts plus the raw records auditors actually want to read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplianceReport {
    pub since: DateTime<Utc>,
    pub until: DateTime<Utc>,
    pub total: usize,
    pub by_outcome: BTreeMap<String, usize>,
    pub by_risk: BTreeMap<String, usize>,
    /// Full entries for every high or critical event in range.
    pub elevated: Vec<AuditEntry>,
}

impl AuditLog {
    /// Aggregate the half-open range `[since, until)`.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError::Io`] or [`AuditError::Corrupt`].
    pub fn report(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<ComplianceReport, AuditError> {
        let entries = self.query(&AuditFilter {
            since: Some(since),
            until: Some(until),
            ..AuditFilter::default()
        })?;

        let mut by_outcome = BTreeMap::new();
        let mut by_risk = BTreeMap::new();
        let mut elevated = Vec::new();
        for entry in &entries {
            *by_outcome
                .entry(entry.draft.outcome.as_str().to_owned())
                .or_insert(0) += 1;
            *by_risk
                .entry(entry.draft.risk_level.as_str().to_owned())
                .or_insert(0) += 1;
            if matches!(
                entry.draft.risk_level,
                RiskLevel::High | RiskLevel::Critical
            ) {
                elevated.push(entry.clone());
            }
        }

        Ok(ComplianceReport {
            since,
            until,
            total: entries.len(),
            by_outcome,
            by_risk,
            elevated,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::{EntryDraft, Outcome, content_hash};
    use crucible_sandbox::ResourceUsage;

    fn draft(risk: RiskLevel, outcome: Outcome) -> EntryDraft {
        EntryDraft {
            session_id: "s".into(),
            user_id: None,
            action: "execute".into(),
            code_hash: content_hash(b"c"),
            risk_level: risk,
            violations: vec![],
            approved: true,
            auto_approved: true,
            sandbox_kind: None,
            duration_ms: 1,
            stdout_hash: content_hash(b""),
            stderr_hash: content_hash(b""),
            resource_usage: ResourceUsage::default(),
            outcome,
        }
    }

    #[test]
    fn aggregates_counts_and_collects_elevated() {
        let dir = tempfile::tempdir().unwrap();
        let log = AuditLog::open(dir.path().join("audit.jsonl")).unwrap();
        log.record(draft(RiskLevel::Low, Outcome::Success)).unwrap();
        log.record(draft(RiskLevel::Low, Outcome::Success)).unwrap();
        log.record(draft(RiskLevel::Critical, Outcome::Blocked)).unwrap();

        let report = log
            .report(
                Utc::now() - chrono::Duration::hours(1),
                Utc::now() + chrono::Duration::hours(1),
            )
            .unwrap();
        assert_eq!(report.total, 3);
        assert_eq!(report.by_outcome["success"], 2);
        assert_eq!(report.by_outcome["blocked"], 1);
        assert_eq!(report.by_risk["low"], 2);
        assert_eq!(report.elevated.len(), 1);
        assert_eq!(report.elevated[0].draft.risk_level, RiskLevel::Critical);
    }

    #[test]
    fn out_of_range_entries_are_excluded() {
        let dir = tempfile::tempdir().unwrap();
        let log = AuditLog::open(dir.path().join("audit.jsonl")).unwrap();
        log.record(draft(RiskLevel::Low, Outcome::Success)).unwrap();
        let report = log
            .report(
                Utc::now() + chrono::Duration::hours(1),
                Utc::now() + chrono::Duration::hours(2),
            )
            .unwrap();
        assert_eq!(report.total, 0);
        assert!(report.elevated.is_empty());
    }
}
