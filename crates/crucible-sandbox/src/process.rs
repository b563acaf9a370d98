//! Child-process backend: the moderate tier.
//!
//! Weakest isolation of the three backends: a scrubbed environment, a
//! throwaway workspace, and wall-clock enforcement, but no kernel-level
//! confinement. Selected only when policy says moderate.

use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tokio::net::UnixListener;
use tokio::process::Command;

use crucible_codegen::Language;

use crate::Sandbox;
use crate::bridge::{HostBridge, RPC_SOCKET_NAME};
use crate::error::SandboxError;
use crate::exec::{ExecutionOutput, InputBundle, ResourceUsage, bounded_capture};
use crate::runner::drive;
use crate::session::{Limits, NetworkMode, SandboxKind, SandboxSession, SessionState};

#[derive(Debug)]
pub struct ProcessSandbox {
    session: SandboxSession,
    interpreter: PathBuf,
    source_name: &'static str,
    workspace: Option<TempDir>,
    rpc_server: Option<tokio::task::JoinHandle<()>>,
}

impl ProcessSandbox {
    #[must_use]
    pub fn new(language: Language, limits: Limits, network_mode: NetworkMode) -> Self {
        let (interpreter, source_name) = match language {
            Language::TypeScript => ("node", "main.ts"),
            Language::Python => ("python3", "main.py"),
        };
        Self {
            session: SandboxSession::new(SandboxKind::Process, limits, network_mode),
            interpreter: PathBuf::from(interpreter),
            source_name,
            workspace: None,
            rpc_server: None,
        }
    }

    /// Override the interpreter binary, e.g. a shim or an absolute path.
    #[must_use]
    pub fn with_interpreter(mut self, interpreter: impl Into<PathBuf>) -> Self {
        self.interpreter = interpreter.into();
        self
    }

    fn workspace_path(&self) -> Result<&Path, SandboxError> {
        self.workspace
            .as_ref()
            .map(TempDir::path)
            .ok_or_else(|| SandboxError::Crashed {
                reason: "workspace missing".into(),
            })
    }
}

impl Sandbox for ProcessSandbox {
    async fn initialize(&mut self) -> Result<(), SandboxError> {
        tracing::warn!(session = %self.session.id, "process backend offers reduced isolation");
        let workspace = tempfile::Builder::new().prefix("crucible-").tempdir()?;
        self.session.workspace_path = workspace.path().to_path_buf();
        self.workspace = Some(workspace);
        self.session.advance(SessionState::Initialized)
    }

    async fn run(
        &mut self,
        source: &str,
        bundle: &InputBundle,
        bridge: &HostBridge,
    ) -> Result<ExecutionOutput, SandboxError> {
        let workspace = self.workspace_path()?.to_path_buf();
        let source_path = workspace.join(self.source_name);
        tokio::fs::write(&source_path, source).await?;
        for (rel, contents) in &bundle.files {
            let dest = workspace.join(rel);
            if let Some(parent) = dest.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&dest, contents).await?;
        }
        let stdin = serde_json::to_vec(&bundle.input).unwrap_or_default();

        self.session.advance(SessionState::Running)?;

        let socket_path = workspace.join(RPC_SOCKET_NAME);
        let listener = UnixListener::bind(&socket_path)?;
        self.rpc_server = Some(tokio::spawn(bridge.clone().serve(listener)));

        let mut cmd = Command::new(&self.interpreter);
        cmd.arg(&source_path)
            .current_dir(&workspace)
            .env_clear()
            .env("PATH", "/usr/local/bin:/usr/bin:/bin")
            .env("HOME", &workspace)
            .env("CRUCIBLE_RPC_SOCK", &socket_path);

        let driven = drive(&mut cmd, &stdin, self.session.limits.wall_timeout).await;
        if let Some(server) = self.rpc_server.take() {
            server.abort();
        }
        match driven {
            Ok(raw) => {
                let Some(code) = raw.exit_code else {
                    self.session.advance(SessionState::Failed)?;
                    return Err(SandboxError::Crashed {
                        reason: "terminated by signal".into(),
                    });
                };
                self.session.advance(SessionState::Finished)?;
                Ok(ExecutionOutput {
                    stdout: bounded_capture(&raw.stdout),
                    stderr: bounded_capture(&raw.stderr),
                    exit_code: code,
                    usage: ResourceUsage {
                        duration_ms: u64::try_from(raw.duration.as_millis())
                            .unwrap_or(u64::MAX),
                        memory_bytes: 0,
                        cpu_ms: 0,
                    },
                    network_log: bridge.drain_events(),
                })
            }
            Err(err) => {
                let terminal = match err {
                    SandboxError::Timeout { .. } => SessionState::Killed,
                    _ => SessionState::Failed,
                };
                self.session.advance(terminal)?;
                Err(err)
            }
        }
    }

    async fn destroy(&mut self) -> Result<(), SandboxError> {
        if let Some(server) = self.rpc_server.take() {
            server.abort();
        }
        if let Some(workspace) = self.workspace.take() {
            workspace.close()?;
        }
        self.session.advance(SessionState::Destroyed)
    }

    async fn health(&self) -> bool {
        resolve_binary(&self.interpreter).is_some()
    }

    fn session(&self) -> &SandboxSession {
        &self.session
    }
}

/// Find a binary either at its absolute path or on `PATH`.
fn resolve_binary(binary: &Path) -> Option<PathBuf> {
    if binary.is_absolute() {
        return binary.exists().then(|| binary.to_path_buf());
    }
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(binary))
        .find(|candidate| candidate.exists())
}
