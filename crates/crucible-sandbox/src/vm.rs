//! MicroVM backend: the maximum tier.
//!
//! Drives a deployment-provided launcher (Firecracker or compatible) that
//! boots a minimal kernel and rootfs, mounts the workspace as the only
//! writable disk, and execs the interpreter inside the guest. The launcher
//! contract: source on the guest path given by `--source`, request input
//! on stdin, guest stdout/stderr forwarded verbatim, and the host socket
//! named by `--rpc-socket` proxied into the guest at
//! `/workspace/.crucible_rpc.sock`.

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

/// Where the launcher binary and guest images live.
#[derive(Debug, Clone)]
pub struct VmAssets {
    pub launcher: PathBuf,
    pub kernel: PathBuf,
    pub rootfs: PathBuf,
}

#[derive(Debug)]
pub struct VmSandbox {
    session: SandboxSession,
    assets: VmAssets,
    language: Language,
    workspace: Option<TempDir>,
    rpc_server: Option<tokio::task::JoinHandle<()>>,
}

impl VmSandbox {
    #[must_use]
    pub fn new(
        assets: VmAssets,
        language: Language,
        limits: Limits,
        network_mode: NetworkMode,
    ) -> Self {
        Self {
            session: SandboxSession::new(SandboxKind::Vm, limits, network_mode),
            assets,
            language,
            workspace: None,
            rpc_server: None,
        }
    }

    fn source_name(&self) -> &'static str {
        match self.language {
            Language::TypeScript => "main.ts",
            Language::Python => "main.py",
        }
    }

    fn missing_asset(&self) -> Option<&Path> {
        [&self.assets.launcher, &self.assets.kernel, &self.assets.rootfs]
            .into_iter()
            .find(|p| !p.exists())
            .map(PathBuf::as_path)
    }

    fn command_args(&self, workspace: &Path) -> Vec<String> {
        let limits = &self.session.limits;
        vec![
            "--kernel".to_owned(),
            self.assets.kernel.display().to_string(),
            "--rootfs".to_owned(),
            self.assets.rootfs.display().to_string(),
            "--workspace".to_owned(),
            workspace.display().to_string(),
            "--memory-bytes".to_owned(),
            limits.memory_bytes.to_string(),
            "--cpu-quota".to_owned(),
            format!("{}", limits.cpu_quota),
            "--network".to_owned(),
            match self.session.network_mode {
                NetworkMode::None => "none".to_owned(),
                NetworkMode::Whitelist => "whitelist".to_owned(),
            },
            "--rpc-socket".to_owned(),
            workspace.join(RPC_SOCKET_NAME).display().to_string(),
            "--source".to_owned(),
            format!("/workspace/{}", self.source_name()),
        ]
    }
}

impl Sandbox for VmSandbox {
    async fn initialize(&mut self) -> Result<(), SandboxError> {
        if let Some(missing) = self.missing_asset() {
            return Err(SandboxError::StartupFailed {
                reason: format!("vm asset missing: {}", missing.display()),
            });
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

        let mut cmd = Command::new(&self.assets.launcher);
        cmd.args(self.command_args(&workspace));
        tracing::debug!(session = %self.session.id, "booting microvm");

        // Boot and teardown take longer than a container start.
        let budget = self.session.limits.wall_timeout + std::time::Duration::from_secs(10);
        let driven = drive(&mut cmd, &stdin, budget).await;
        if let Some(server) = self.rpc_server.take() {
            server.abort();
        }
        match driven {
            Ok(raw) => {
                self.session.advance(SessionState::Finished)?;
                Ok(ExecutionOutput {
                    stdout: bounded_capture(&raw.stdout),
                    stderr: bounded_capture(&raw.stderr),
                    exit_code: raw.exit_code.unwrap_or(-1),
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
        self.missing_asset().is_none()
    }

    fn session(&self) -> &SandboxSession {
        &self.session
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_assets(dir: &Path) -> VmAssets {
        for name in ["launcher", "vmlinux", "rootfs.ext4"] {
            std::fs::write(dir.join(name), b"").unwrap();
        }
        VmAssets {
            launcher: dir.join("launcher"),
            kernel: dir.join("vmlinux"),
            rootfs: dir.join("rootfs.ext4"),
        }
    }

    #[tokio::test]
    async fn missing_assets_fail_startup() {
        let assets = VmAssets {
            launcher: PathBuf::from("/nonexistent/firecracker"),
            kernel: PathBuf::from("/nonexistent/vmlinux"),
            rootfs: PathBuf::from("/nonexistent/rootfs.ext4"),
        };
        let mut sb = VmSandbox::new(
            assets,
            Language::Python,
            Limits::default(),
            NetworkMode::None,
        );
        let err = sb.initialize().await.unwrap_err();
        assert!(matches!(err, SandboxError::StartupFailed { .. }));
        assert!(!sb.health().await);
    }

    #[tokio::test]
    async fn present_assets_initialize() {
        let dir = tempfile::tempdir().unwrap();
        let assets = fake_assets(dir.path());
        let mut sb = VmSandbox::new(
            assets,
            Language::Python,
            Limits::default(),
            NetworkMode::None,
        );
        sb.initialize().await.unwrap();
        assert_eq!(sb.session().state, SessionState::Initialized);
        assert!(sb.health().await);
        sb.destroy().await.unwrap();
    }

    #[test]
    fn launcher_args_carry_limits_and_network() {
        let dir = tempfile::tempdir().unwrap();
        let assets = fake_assets(dir.path());
        let sb = VmSandbox::new(
            assets,
            Language::TypeScript,
            Limits::default(),
            NetworkMode::Whitelist,
        );
        let args = sb.command_args(Path::new("/tmp/ws"));
        let find = |flag: &str| {
            args.iter()
                .position(|a| a == flag)
                .and_then(|i| args.get(i + 1))
                .cloned()
        };
        assert_eq!(find("--memory-bytes").as_deref(), Some("268435456"));
        assert_eq!(find("--network").as_deref(), Some("whitelist"));
        assert_eq!(
            find("--rpc-socket").as_deref(),
            Some("/tmp/ws/.crucible_rpc.sock")
        );
        assert_eq!(find("--source").as_deref(), Some("/workspace/main.ts"));
    }
}
