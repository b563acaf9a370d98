//! Engine edge: configuration, the approval gate, and the orchestrator
//! that sequences search → render → validate → approve → execute → scrub
//! → audit for every request.

pub mod approval;
pub mod config;
pub mod envelope;
pub mod error;
pub mod orchestrator;
pub mod provider;
pub mod transport;

pub use approval::{
    ApprovalDecision, ApprovalGate, ApprovalPolicy, ApprovalRequest, Approver, DenyAll, Verdict,
};
pub use config::EngineConfig;
pub use envelope::{ExecuteOptions, ExecuteRequest, ExecutionEnvelope, Metrics};
pub use error::EngineError;
pub use orchestrator::Orchestrator;
pub use provider::{BackendProvider, SandboxProvider};
pub use transport::ScrubbingTransport;
