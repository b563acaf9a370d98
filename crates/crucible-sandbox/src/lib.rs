//! Isolated execution of generated code.
//!
//! Three backends behind one trait, selected by security tier: a microVM
//! (maximum), a hardened container (high), and a child process (moderate).
//! Every backend delivers the input bundle before execution, buffers
//! stdout/stderr whole, enforces a wall-clock limit with SIGKILL, and
//! guarantees teardown on every exit path. Onward tool calls and egress
//! leave only through the workspace RPC socket, answered by [`HostBridge`].

pub mod bridge;
pub mod docker;
pub mod error;
pub mod exec;
#[cfg(feature = "mock")]
pub mod mock;
pub mod pool;
pub mod process;
mod runner;
pub mod session;
pub mod vm;

pub use bridge::{
    HostBridge, HostError, HostRequest, HostResponse, InvokeRequest, NullTransport,
    RPC_SOCKET_NAME, ToolTransport, TransportFuture,
};
pub use docker::DockerSandbox;
pub use error::SandboxError;
pub use exec::{ExecutionOutput, InputBundle, NetworkEvent, ResourceUsage};
#[cfg(feature = "mock")]
pub use mock::{MockOutcome, MockSandbox};
pub use pool::{PoolSlot, SandboxPool};
pub use process::ProcessSandbox;
pub use session::{
    FilesystemScope, Limits, NetworkMode, SandboxKind, SandboxSession, SecurityLevel,
    SessionState,
};
pub use vm::{VmAssets, VmSandbox};

use crucible_codegen::Language;

/// One scoped execution unit. The session moves created → initialized →
/// running → terminal → destroyed; `destroy` must run on every path, so
/// callers hold the sandbox in a scope that always reaches it.
pub trait Sandbox: Send {
    /// Prepare the workspace and the isolation boundary.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::StartupFailed`] when the backend's runtime
    /// or images are unavailable.
    fn initialize(&mut self) -> impl Future<Output = Result<(), SandboxError>> + Send;

    /// Execute `source` with the bundle delivered up front; output is
    /// returned only after completion. `bridge` answers the workspace RPC
    /// socket for the duration of the run and collects the egress log.
    ///
    /// # Errors
    ///
    /// Returns the sandbox failure kind: timeout, OOM, crash, or I/O.
    fn run(
        &mut self,
        source: &str,
        bundle: &InputBundle,
        bridge: &HostBridge,
    ) -> impl Future<Output = Result<ExecutionOutput, SandboxError>> + Send;

    /// Tear down the isolate and remove the workspace.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::Io`] when workspace removal fails.
    fn destroy(&mut self) -> impl Future<Output = Result<(), SandboxError>> + Send;

    /// Whether the backend could start a session right now.
    fn health(&self) -> impl Future<Output = bool> + Send;

    fn session(&self) -> &SandboxSession;
}

/// Concrete backend choice; gives the orchestrator a single type to hold.
#[derive(Debug)]
pub enum SandboxBackend {
    Docker(DockerSandbox),
    Vm(VmSandbox),
    Process(ProcessSandbox),
    #[cfg(feature = "mock")]
    Mock(MockSandbox),
}

impl SandboxBackend {
    /// Build the backend for `kind`. VM sessions need deployment assets.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::StartupFailed`] for a VM request without
    /// configured assets.
    pub fn build(
        kind: SandboxKind,
        language: Language,
        limits: Limits,
        network_mode: NetworkMode,
        vm_assets: Option<VmAssets>,
    ) -> Result<Self, SandboxError> {
        match kind {
            SandboxKind::Docker => Ok(Self::Docker(DockerSandbox::new(
                language,
                limits,
                network_mode,
            ))),
            SandboxKind::Process => Ok(Self::Process(ProcessSandbox::new(
                language,
                limits,
                network_mode,
            ))),
            SandboxKind::Vm => {
                let assets = vm_assets.ok_or_else(|| SandboxError::StartupFailed {
                    reason: "no vm assets configured".into(),
                })?;
                Ok(Self::Vm(VmSandbox::new(
                    assets,
                    language,
                    limits,
                    network_mode,
                )))
            }
        }
    }
}

impl Sandbox for SandboxBackend {
    async fn initialize(&mut self) -> Result<(), SandboxError> {
        match self {
            Self::Docker(sb) => sb.initialize().await,
            Self::Vm(sb) => sb.initialize().await,
            Self::Process(sb) => sb.initialize().await,
            #[cfg(feature = "mock")]
            Self::Mock(sb) => sb.initialize().await,
        }
    }

    async fn run(
        &mut self,
        source: &str,
        bundle: &InputBundle,
        bridge: &HostBridge,
    ) -> Result<ExecutionOutput, SandboxError> {
        match self {
            Self::Docker(sb) => sb.run(source, bundle, bridge).await,
            Self::Vm(sb) => sb.run(source, bundle, bridge).await,
            Self::Process(sb) => sb.run(source, bundle, bridge).await,
            #[cfg(feature = "mock")]
            Self::Mock(sb) => sb.run(source, bundle, bridge).await,
        }
    }

    async fn destroy(&mut self) -> Result<(), SandboxError> {
        match self {
            Self::Docker(sb) => sb.destroy().await,
            Self::Vm(sb) => sb.destroy().await,
            Self::Process(sb) => sb.destroy().await,
            #[cfg(feature = "mock")]
            Self::Mock(sb) => sb.destroy().await,
        }
    }

    async fn health(&self) -> bool {
        match self {
            Self::Docker(sb) => sb.health().await,
            Self::Vm(sb) => sb.health().await,
            Self::Process(sb) => sb.health().await,
            #[cfg(feature = "mock")]
            Self::Mock(sb) => sb.health().await,
        }
    }

    fn session(&self) -> &SandboxSession {
        match self {
            Self::Docker(sb) => sb.session(),
            Self::Vm(sb) => sb.session(),
            Self::Process(sb) => sb.session(),
            #[cfg(feature = "mock")]
            Self::Mock(sb) => sb.session(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vm_without_assets_fails_to_build() {
        let err = SandboxBackend::build(
            SandboxKind::Vm,
            Language::Python,
            Limits::default(),
            NetworkMode::None,
            None,
        )
        .unwrap_err();
        assert!(matches!(err, SandboxError::StartupFailed { .. }));
    }

    #[test]
    fn process_backend_builds_without_assets() {
        let backend = SandboxBackend::build(
            SandboxKind::Process,
            Language::Python,
            Limits::default(),
            NetworkMode::None,
            None,
        )
        .unwrap();
        assert_eq!(backend.session().kind, SandboxKind::Process);
    }
}
