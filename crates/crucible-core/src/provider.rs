//! Where sandboxes come from.

use crucible_codegen::Language;
use crucible_sandbox::{
    Limits, NetworkMode, Sandbox, SandboxBackend, SandboxError, SandboxKind, VmAssets,
};

/// Builds a fresh sandbox per request; the orchestrator stays generic so
/// tests can hand it a scripted backend.
pub trait SandboxProvider: Send + Sync {
    type Sandbox: Sandbox;

    /// A new, uninitialized sandbox of `kind`.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::StartupFailed`] when `kind` cannot be built
    /// at all (for example a VM without deployment assets).
    fn provision(
        &self,
        kind: SandboxKind,
        language: Language,
        limits: Limits,
        network_mode: NetworkMode,
    ) -> Result<Self::Sandbox, SandboxError>;
}

/// Production provider over the real backends.
pub struct BackendProvider {
    vm_assets: Option<VmAssets>,
}

impl BackendProvider {
    #[must_use]
    pub fn new(vm_assets: Option<VmAssets>) -> Self {
        Self { vm_assets }
    }
}

impl SandboxProvider for BackendProvider {
    type Sandbox = SandboxBackend;

    fn provision(
        &self,
        kind: SandboxKind,
        language: Language,
        limits: Limits,
        network_mode: NetworkMode,
    ) -> Result<SandboxBackend, SandboxError> {
        SandboxBackend::build(kind, language, limits, network_mode, self.vm_assets.clone())
    }
}
