//! Read-side filters over the log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crucible_validate::RiskLevel;

use crate::entry::{AuditEntry, Outcome};
use crate::error::AuditError;
use crate::log::AuditLog;

/// Conjunctive filter; unset fields match everything.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuditFilter {
    pub session_id: Option<String>,
    pub user_id: Option<String>,
    pub risk_level: Option<RiskLevel>,
    pub outcome: Option<Outcome>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

impl AuditFilter {
    #[must_use]
    pub fn matches(&self, entry: &AuditEntry) -> bool {
        if let Some(session) = &self.session_id
            && &entry.draft.session_id != session
        {
            return false;
        }
        if let Some(user) = &self.user_id
            && entry.draft.user_id.as_ref() != Some(user)
        {
            return false;
        }
        if let Some(risk) = self.risk_level
            && entry.draft.risk_level != risk
        {
            return false;
        }
        if let Some(outcome) = self.outcome
            && entry.draft.outcome != outcome
        {
            return false;
        }
        if let Some(since) = self.since
            && entry.timestamp < since
        {
            return false;
        }
        if let Some(until) = self.until
            && entry.timestamp >= until
        {
            return false;
        }
        true
    }
}

impl AuditLog {
    /// Entries matching `filter`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError::Io`] or [`AuditError::Corrupt`].
    pub fn query(&self, filter: &AuditFilter) -> Result<Vec<AuditEntry>, AuditError> {
        Ok(self
            .entries()?
            .into_iter()
            .filter(|e| filter.matches(e))
            .collect())
    }
}
