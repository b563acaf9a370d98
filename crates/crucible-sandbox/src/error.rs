use crucible_net::PolicyDecision;

use crate::session::SessionState;

#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error("wall-clock timeout after {limit_ms}ms")]
    Timeout { limit_ms: u64 },

    #[error("egress to {host} refused: {decision}")]
    PolicyViolation { host: String, decision: PolicyDecision },

    #[error("memory limit exceeded")]
    Oom,

    #[error("exited with status {code}")]
    ExitNonZero { code: i32 },

    #[error("sandbox startup failed: {reason}")]
    StartupFailed { reason: String },

    #[error("sandbox crashed: {reason}")]
    Crashed { reason: String },

    #[error("sandbox pool saturated")]
    Overloaded,

    #[error("illegal session transition {from} -> {to}")]
    IllegalTransition {
        from: SessionState,
        to: SessionState,
    },

    #[error("sandbox io: {0}")]
    Io(#[from] std::io::Error),
}
