//! Append-only audit trail for the execution pipeline.
//!
//! Records carry hashes of code and output streams, never raw values and
//! never detokenized PII. Writes are fsynced before control returns to the
//! orchestrator; retention deletes whole expired records and rewrites
//! nothing.

pub mod entry;
pub mod error;
pub mod log;
pub mod query;
pub mod report;

pub use entry::{AuditEntry, EntryDraft, Outcome, content_hash};
pub use error::AuditError;
pub use log::AuditLog;
pub use query::AuditFilter;
pub use report::ComplianceReport;
