use crucible_audit::AuditError;
use crucible_codegen::CodegenError;
use crucible_sandbox::SandboxError;
use crucible_validate::ValidateError;

/// Failures the pipeline cannot express as an envelope outcome.
///
/// Expected terminal states (blocked, denied, timeout, oom, cancelled) come
/// back as a normal envelope; these are the infrastructure failures around
/// it.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("no tools matched the intent; refine the request or sync the index")]
    NoMatchingTools,

    #[error(transparent)]
    Codegen(#[from] CodegenError),

    #[error(transparent)]
    Validate(#[from] ValidateError),

    #[error(transparent)]
    Sandbox(#[from] SandboxError),

    #[error(transparent)]
    Audit(#[from] AuditError),

    #[error("internal: {reason}")]
    Internal { reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sandbox_errors_pass_through() {
        let err = EngineError::from(SandboxError::Oom);
        assert_eq!(err.to_string(), SandboxError::Oom.to_string());
    }

    #[test]
    fn no_match_names_a_remedy() {
        assert!(EngineError::NoMatchingTools.to_string().contains("sync the index"));
    }
}
