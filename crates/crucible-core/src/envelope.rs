//! Request and result types at the engine edge.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crucible_audit::Outcome;
use crucible_codegen::Language;
use crucible_sandbox::SecurityLevel;

/// One pipeline invocation.
#[derive(Debug, Clone)]
pub struct ExecuteRequest {
    /// Natural-language intent; doubles as the tool search query.
    pub intent: String,
    pub language: Language,
    /// Structured input handed to the generated code.
    pub input: serde_json::Value,
    pub session_id: String,
    pub user_id: Option<String>,
    pub options: ExecuteOptions,
}

impl ExecuteRequest {
    #[must_use]
    pub fn new(intent: impl Into<String>, language: Language, input: serde_json::Value) -> Self {
        Self {
            intent: intent.into(),
            language,
            input,
            session_id: uuid::Uuid::new_v4().to_string(),
            user_id: None,
            options: ExecuteOptions::default(),
        }
    }
}

/// Per-request overrides; unset fields fall back to the engine config.
#[derive(Debug, Clone, Default)]
pub struct ExecuteOptions {
    pub security_level: Option<SecurityLevel>,
    pub memory_bytes: Option<u64>,
    pub cpu_quota: Option<f32>,
    pub wall_timeout: Option<Duration>,
    pub allow_network: Option<bool>,
    pub allowed_domains: Option<Vec<String>>,
    /// Send even auto-approvable risk levels to the approver.
    pub force_approval: bool,
    /// Upper bound on tools pulled into one artifact.
    pub max_tools: Option<usize>,
    /// Artifact token budget; candidates are shed until the render fits.
    pub token_budget: Option<usize>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Metrics {
    pub duration_ms: u64,
    pub memory_bytes: u64,
    pub cpu_ms: u64,
    pub token_estimate: usize,
    pub network_requests: usize,
}

/// What the caller gets back, whatever happened.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionEnvelope {
    pub outcome: Outcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
    pub warnings: Vec<String>,
    pub metrics: Metrics,
}

impl ExecutionEnvelope {
    #[must_use]
    pub fn ok(&self) -> bool {
        self.outcome == Outcome::Success
    }
}
