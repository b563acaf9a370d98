//! Session lifecycle and resource limits.

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::SandboxError;

/// Which isolation backend a session runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SandboxKind {
    Docker,
    Vm,
    Process,
}

impl SandboxKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Docker => "docker",
            Self::Vm => "vm",
            Self::Process => "process",
        }
    }
}

impl std::fmt::Display for SandboxKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Deployment security tier; selects the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecurityLevel {
    Maximum,
    High,
    Moderate,
}

impl SecurityLevel {
    /// Maximum runs in a microVM, high in a container, moderate in a
    /// child process.
    #[must_use]
    pub const fn sandbox_kind(self) -> SandboxKind {
        match self {
            Self::Maximum => SandboxKind::Vm,
            Self::High => SandboxKind::Docker,
            Self::Moderate => SandboxKind::Process,
        }
    }

    /// Fallback when the preferred backend fails to start, if degradation
    /// is permitted.
    #[must_use]
    pub const fn degraded_kind(self) -> Option<SandboxKind> {
        match self {
            Self::Maximum => Some(SandboxKind::Docker),
            Self::High => Some(SandboxKind::Process),
            Self::Moderate => None,
        }
    }
}

impl std::str::FromStr for SecurityLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "maximum" => Ok(Self::Maximum),
            "high" => Ok(Self::High),
            "moderate" => Ok(Self::Moderate),
            other => Err(format!("unknown security level '{other}'")),
        }
    }
}

/// How much of the network the sandbox can see.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkMode {
    /// No interface at all.
    None,
    /// A single egress path through the network policy.
    Whitelist,
}

/// What the sandbox may do to the filesystem outside its workspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FilesystemScope {
    None,
    WorkspaceOnly,
    ReadOnly,
    Full,
}

/// Hard resource caps for one session.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Limits {
    pub memory_bytes: u64,
    /// Fraction of a single core.
    pub cpu_quota: f32,
    pub wall_timeout: Duration,
    pub max_fds: u64,
    pub max_procs: u64,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            memory_bytes: 256 * 1024 * 1024,
            cpu_quota: 0.5,
            wall_timeout: Duration::from_secs(30),
            max_fds: 64,
            max_procs: 16,
        }
    }
}

/// Session lifecycle; transitions are monotonic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Created,
    Initialized,
    Running,
    Finished,
    Killed,
    Failed,
    Destroyed,
}

impl SessionState {
    const fn rank(self) -> u8 {
        match self {
            Self::Created => 0,
            Self::Initialized => 1,
            Self::Running => 2,
            Self::Finished | Self::Killed | Self::Failed => 3,
            Self::Destroyed => 4,
        }
    }

    /// A session moves strictly forward and settles in exactly one
    /// terminal state before destruction.
    #[must_use]
    pub const fn can_advance(self, to: Self) -> bool {
        to.rank() == self.rank() + 1 || (matches!(to, Self::Destroyed) && self.rank() <= 3)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::Initialized => "initialized",
            Self::Running => "running",
            Self::Finished => "finished",
            Self::Killed => "killed",
            Self::Failed => "failed",
            Self::Destroyed => "destroyed",
        };
        f.write_str(s)
    }
}

/// One execution's identity and bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxSession {
    pub id: Uuid,
    pub kind: SandboxKind,
    pub created_at: DateTime<Utc>,
    pub limits: Limits,
    pub workspace_path: PathBuf,
    pub network_mode: NetworkMode,
    pub state: SessionState,
}

impl SandboxSession {
    #[must_use]
    pub fn new(kind: SandboxKind, limits: Limits, network_mode: NetworkMode) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            created_at: Utc::now(),
            limits,
            workspace_path: PathBuf::new(),
            network_mode,
            state: SessionState::Created,
        }
    }

    /// Move the session forward.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::IllegalTransition`] for any backwards or
    /// skipping move.
    pub fn advance(&mut self, to: SessionState) -> Result<(), SandboxError> {
        if !self.state.can_advance(to) {
            return Err(SandboxError::IllegalTransition {
                from: self.state,
                to,
            });
        }
        tracing::trace!(session = %self.id, from = %self.state, to = %to, "session transition");
        self.state = to;
        Ok(())
    }
}
