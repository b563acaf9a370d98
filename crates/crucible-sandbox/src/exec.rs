//! Inputs delivered to, and outputs collected from, one execution.

use serde::{Deserialize, Serialize};

use crucible_net::PolicyDecision;

/// Captured stream bytes beyond this are dropped and marked.
pub const MAX_CAPTURE_BYTES: usize = 64 * 1024;
pub const TRUNCATION_MARKER: &str = "\n[output truncated]";

/// Everything the sandbox receives before execution begins: the request
/// input on stdin plus optional workspace files. Delivery strictly
/// precedes execution so the tokenizer can scrub in one pass.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InputBundle {
    pub input: serde_json::Value,
    /// Workspace-relative path and contents.
    pub files: Vec<(String, Vec<u8>)>,
}

impl InputBundle {
    #[must_use]
    pub fn from_input(input: serde_json::Value) -> Self {
        Self {
            input,
            files: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceUsage {
    pub duration_ms: u64,
    pub memory_bytes: u64,
    pub cpu_ms: u64,
}

/// One egress attempt observed during execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkEvent {
    pub host: String,
    pub decision: PolicyDecision,
}

/// Buffered result of a completed run. Streams are returned whole after
/// completion; nothing is streamed live.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub usage: ResourceUsage,
    pub network_log: Vec<NetworkEvent>,
}

impl ExecutionOutput {
    #[must_use]
    pub const fn succeeded(&self) -> bool {
        self.exit_code == 0
    }
}

/// Cap a captured stream, appending the truncation marker on overflow.
#[must_use]
pub fn bounded_capture(bytes: &[u8]) -> String {
    if bytes.len() <= MAX_CAPTURE_BYTES {
        return String::from_utf8_lossy(bytes).into_owned();
    }
    let mut end = MAX_CAPTURE_BYTES;
    // Back off continuation bytes (0b10xxxxxx) so the cut stays on a
    // character boundary.
    while end > 0 && bytes[end] & 0xc0 == 0x80 {
        end -= 1;
    }
    let mut out = String::from_utf8_lossy(&bytes[..end]).into_owned();
    out.push_str(TRUNCATION_MARKER);
    out
}
