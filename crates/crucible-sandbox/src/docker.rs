//! Container backend: the high tier.
//!
//! Shells out to `docker run` with a hardened flag set: read-only root,
//! all capabilities dropped, no privilege escalation, hard memory/swap,
//! CPU and pid caps, and no network interface in any mode. Whitelisted
//! egress is host-mediated over the RPC socket in the mounted workspace.

use std::path::Path;

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

/// Exit status the kernel reports for a SIGKILL, which under a hard memory
/// cap means the OOM killer fired.
const EXIT_OOM_KILLED: i32 = 137;

pub const DEFAULT_TS_IMAGE: &str = "node:22-slim";
pub const DEFAULT_PY_IMAGE: &str = "python:3.12-slim";

#[derive(Debug)]
pub struct DockerSandbox {
    session: SandboxSession,
    image: String,
    language: Language,
    workspace: Option<TempDir>,
    rpc_server: Option<tokio::task::JoinHandle<()>>,
}

impl DockerSandbox {
    #[must_use]
    pub fn new(language: Language, limits: Limits, network_mode: NetworkMode) -> Self {
        let image = match language {
            Language::TypeScript => DEFAULT_TS_IMAGE,
            Language::Python => DEFAULT_PY_IMAGE,
        };
        Self {
            session: SandboxSession::new(SandboxKind::Docker, limits, network_mode),
            image: image.to_owned(),
            language,
            workspace: None,
            rpc_server: None,
        }
    }

    #[must_use]
    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image = image.into();
        self
    }

    fn source_name(&self) -> &'static str {
        match self.language {
            Language::TypeScript => "main.ts",
            Language::Python => "main.py",
        }
    }

    fn interpreter(&self) -> &'static str {
        match self.language {
            Language::TypeScript => "node",
            Language::Python => "python3",
        }
    }

    /// The full `docker run` argument vector for this session.
    fn command_args(&self, workspace: &Path) -> Vec<String> {
        let limits = &self.session.limits;
        let memory = limits.memory_bytes.to_string();
        let mut args = vec![
            "run".to_owned(),
            "--rm".to_owned(),
            "-i".to_owned(),
            "--read-only".to_owned(),
            "--cap-drop".to_owned(),
            "ALL".to_owned(),
            "--security-opt".to_owned(),
            "no-new-privileges".to_owned(),
            "--memory".to_owned(),
            memory.clone(),
            // Swap equal to memory means zero additional swap.
            "--memory-swap".to_owned(),
            memory,
            "--cpus".to_owned(),
            format!("{}", limits.cpu_quota),
            "--pids-limit".to_owned(),
            limits.max_procs.to_string(),
            "--ulimit".to_owned(),
            format!("nofile={fds}:{fds}", fds = limits.max_fds),
        ];
        // The container never gets an interface, whatever the mode; all
        // egress and onward calls go through the workspace RPC socket.
        args.push("--network".to_owned());
        args.push("none".to_owned());
        args.push("-e".to_owned());
        args.push(format!("CRUCIBLE_RPC_SOCK=/workspace/{RPC_SOCKET_NAME}"));
        args.push("-v".to_owned());
        args.push(format!("{}:/workspace", workspace.display()));
        args.push("-w".to_owned());
        args.push("/workspace".to_owned());
        args.push(self.image.clone());
        args.push(self.interpreter().to_owned());
        args.push(format!("/workspace/{}", self.source_name()));
        args
    }
}

impl Sandbox for DockerSandbox {
    async fn initialize(&mut self) -> Result<(), SandboxError> {
        let probe = Command::new("docker")
            .arg("version")
            .arg("--format")
            .arg("{{.Server.Version}}")
            .output()
            .await;
        match probe {
            Ok(out) if out.status.success() => {}
            Ok(out) => {
                return Err(SandboxError::StartupFailed {
                    reason: format!(
                        "docker daemon unavailable: {}",
                        String::from_utf8_lossy(&out.stderr).trim()
                    ),
                });
            }
            Err(e) => {
                return Err(SandboxError::StartupFailed {
                    reason: format!("docker binary missing: {e}"),
                });
            }
        }
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
        let workspace = self
            .workspace
            .as_ref()
            .map(|w| w.path().to_path_buf())
            .ok_or_else(|| SandboxError::Crashed {
                reason: "workspace missing".into(),
            })?;
        tokio::fs::write(workspace.join(self.source_name()), source).await?;
        for (rel, contents) in &bundle.files {
            let dest = workspace.join(rel);
            if let Some(parent) = dest.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&dest, contents).await?;
        }
        let stdin = serde_json::to_vec(&bundle.input).unwrap_or_default();

        self.session.advance(SessionState::Running)?;

        let listener = UnixListener::bind(workspace.join(RPC_SOCKET_NAME))?;
        self.rpc_server = Some(tokio::spawn(bridge.clone().serve(listener)));

        let mut cmd = Command::new("docker");
        cmd.args(self.command_args(&workspace));
        tracing::debug!(session = %self.session.id, image = %self.image, "starting container");

        // Grace period on top of the wall limit: the container runtime
        // itself needs a moment to set up and tear down.
        let budget = self.session.limits.wall_timeout + std::time::Duration::from_secs(5);
        let driven = drive(&mut cmd, &stdin, budget).await;
        if let Some(server) = self.rpc_server.take() {
            server.abort();
        }
        match driven {
            Ok(raw) => {
                let code = raw.exit_code.unwrap_or(-1);
                if code == EXIT_OOM_KILLED {
                    self.session.advance(SessionState::Killed)?;
                    return Err(SandboxError::Oom);
                }
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
        Command::new("docker")
            .arg("info")
            .arg("--format")
            .arg("{{.ServerVersion}}")
            .output()
            .await
            .is_ok_and(|out| out.status.success())
    }

    fn session(&self) -> &SandboxSession {
        &self.session
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn args_for(network_mode: NetworkMode) -> Vec<String> {
        let sb = DockerSandbox::new(Language::Python, Limits::default(), network_mode);
        sb.command_args(&PathBuf::from("/tmp/ws"))
    }

    fn flag_value(args: &[String], flag: &str) -> Option<String> {
        args.iter()
            .position(|a| a == flag)
            .and_then(|i| args.get(i + 1))
            .cloned()
    }

    #[test]
    fn hardening_flags_are_present() {
        let args = args_for(NetworkMode::None);
        assert!(args.contains(&"--read-only".to_owned()));
        assert!(args.contains(&"--rm".to_owned()));
        assert_eq!(flag_value(&args, "--cap-drop").as_deref(), Some("ALL"));
        assert_eq!(
            flag_value(&args, "--security-opt").as_deref(),
            Some("no-new-privileges")
        );
    }

    #[test]
    fn memory_and_swap_are_equal() {
        let args = args_for(NetworkMode::None);
        let memory = flag_value(&args, "--memory").unwrap();
        let swap = flag_value(&args, "--memory-swap").unwrap();
        assert_eq!(memory, swap);
        assert_eq!(memory, (256 * 1024 * 1024).to_string());
    }

    #[test]
    fn network_none_disconnects() {
        let args = args_for(NetworkMode::None);
        assert_eq!(flag_value(&args, "--network").as_deref(), Some("none"));
    }

    #[test]
    fn whitelist_mode_keeps_interfaces_down() {
        // Whitelisted egress rides the RPC socket, never a bridge network.
        let args = args_for(NetworkMode::Whitelist);
        assert_eq!(flag_value(&args, "--network").as_deref(), Some("none"));
        assert_eq!(
            flag_value(&args, "-e").as_deref(),
            Some("CRUCIBLE_RPC_SOCK=/workspace/.crucible_rpc.sock")
        );
    }

    #[test]
    fn pid_and_fd_limits_are_applied() {
        let args = args_for(NetworkMode::None);
        assert_eq!(flag_value(&args, "--pids-limit").as_deref(), Some("16"));
        assert_eq!(
            flag_value(&args, "--ulimit").as_deref(),
            Some("nofile=64:64")
        );
    }

    #[test]
    fn workspace_is_mounted_and_current() {
        let args = args_for(NetworkMode::None);
        assert_eq!(
            flag_value(&args, "-v").as_deref(),
            Some("/tmp/ws:/workspace")
        );
        assert_eq!(flag_value(&args, "-w").as_deref(), Some("/workspace"));
    }

    #[test]
    fn image_follows_language() {
        let ts = DockerSandbox::new(Language::TypeScript, Limits::default(), NetworkMode::None);
        let args = ts.command_args(&PathBuf::from("/tmp/ws"));
        assert!(args.contains(&DEFAULT_TS_IMAGE.to_owned()));
        assert!(args.last().is_some_and(|a| a.ends_with("main.ts")));
    }
}
