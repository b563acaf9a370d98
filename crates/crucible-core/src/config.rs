//! Engine configuration: one TOML document, documented defaults, and
//! `CRUCIBLE_*` environment overrides.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crucible_sandbox::{FilesystemScope, Limits, SecurityLevel, VmAssets};

/// Entries older than this are always retained, whatever the config says.
pub const RETENTION_FLOOR_DAYS: u32 = 30;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub security: SecurityConfig,
    pub sandbox: SandboxConfig,
    pub network: NetworkConfig,
    pub approval: ApprovalConfig,
    pub audit: AuditConfig,
    pub index: IndexConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    pub level: SecurityLevel,
    pub filesystem_scope: FilesystemScope,
    /// Permit one retry on a weaker backend when the preferred one fails
    /// to start.
    pub allow_degradation: bool,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            level: SecurityLevel::High,
            filesystem_scope: FilesystemScope::WorkspaceOnly,
            allow_degradation: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    pub memory_bytes: u64,
    pub cpu_quota: f32,
    pub wall_timeout_secs: u64,
    pub max_fds: u64,
    pub max_procs: u64,
    pub pool_capacity: usize,
    pub pool_queue_limit: usize,
    pub vm_launcher: Option<PathBuf>,
    pub vm_kernel: Option<PathBuf>,
    pub vm_rootfs: Option<PathBuf>,
    /// Where to write rendered artifacts for debugging. Ignored (with a
    /// warning) at the maximum security level.
    pub debug_spill_dir: Option<PathBuf>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        let limits = Limits::default();
        Self {
            memory_bytes: limits.memory_bytes,
            cpu_quota: limits.cpu_quota,
            wall_timeout_secs: limits.wall_timeout.as_secs(),
            max_fds: limits.max_fds,
            max_procs: limits.max_procs,
            pool_capacity: 4,
            pool_queue_limit: 8,
            vm_launcher: None,
            vm_kernel: None,
            vm_rootfs: None,
            debug_spill_dir: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub allow_network: bool,
    pub allowed_domains: Vec<String>,
    pub rate_limit: usize,
    pub rate_window_secs: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            allow_network: false,
            allowed_domains: Vec::new(),
            rate_limit: 100,
            rate_window_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApprovalConfig {
    pub auto_approve_low: bool,
    pub auto_approve_medium: bool,
    pub auto_approve_high: bool,
    /// Kept for config-file compatibility; critical is never auto-approved,
    /// whatever this says.
    pub auto_approve_critical: bool,
    pub timeout_secs: u64,
}

impl Default for ApprovalConfig {
    fn default() -> Self {
        Self {
            auto_approve_low: true,
            auto_approve_medium: false,
            auto_approve_high: false,
            auto_approve_critical: false,
            timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    pub path: PathBuf,
    pub retention_days: u32,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("audit/audit.jsonl"),
            retention_days: 90,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    pub descriptor_root: PathBuf,
    pub max_schema_depth: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            descriptor_root: PathBuf::from("tools"),
            max_schema_depth: 8,
        }
    }
}

const KNOWN_SECTIONS: &[&str] = &["security", "sandbox", "network", "approval", "audit", "index"];

impl EngineConfig {
    /// Load from `path`, falling back to defaults when the file is absent,
    /// then apply environment overrides and normalize.
    ///
    /// # Errors
    ///
    /// Returns an error when the file exists but is not readable or not
    /// valid TOML.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config: {}", path.display()))?;
            warn_unknown_sections(&content, path);
            toml::from_str(&content)
                .with_context(|| format!("failed to parse config: {}", path.display()))?
        } else {
            tracing::debug!(path = %path.display(), "config file absent, using defaults");
            Self::default()
        };
        config.apply_env_overrides();
        config.normalize();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(level) = std::env::var("CRUCIBLE_SECURITY_LEVEL") {
            match level.parse() {
                Ok(parsed) => self.security.level = parsed,
                Err(reason) => tracing::warn!(%reason, "ignoring CRUCIBLE_SECURITY_LEVEL"),
            }
        }
        if let Ok(allow) = std::env::var("CRUCIBLE_ALLOW_NETWORK") {
            self.network.allow_network = allow == "1" || allow.eq_ignore_ascii_case("true");
        }
        if let Ok(path) = std::env::var("CRUCIBLE_AUDIT_PATH") {
            self.audit.path = PathBuf::from(path);
        }
        if let Ok(secs) = std::env::var("CRUCIBLE_WALL_TIMEOUT_SECS")
            && let Ok(parsed) = secs.parse()
        {
            self.sandbox.wall_timeout_secs = parsed;
        }
        if let Ok(capacity) = std::env::var("CRUCIBLE_POOL_CAPACITY")
            && let Ok(parsed) = capacity.parse()
        {
            self.sandbox.pool_capacity = parsed;
        }
    }

    fn normalize(&mut self) {
        if self.audit.retention_days < RETENTION_FLOOR_DAYS {
            tracing::warn!(
                configured = self.audit.retention_days,
                floor = RETENTION_FLOOR_DAYS,
                "audit retention below the floor, clamping"
            );
            self.audit.retention_days = RETENTION_FLOOR_DAYS;
        }
        if self.security.level == SecurityLevel::Maximum && self.sandbox.debug_spill_dir.is_some() {
            tracing::warn!("debug_spill_dir is ignored at the maximum security level");
            self.sandbox.debug_spill_dir = None;
        }
        if self.approval.auto_approve_critical {
            tracing::warn!("auto_approve_critical has no effect; critical always needs approval");
        }
    }

    /// Per-session resource caps from the sandbox section.
    #[must_use]
    pub fn limits(&self) -> Limits {
        Limits {
            memory_bytes: self.sandbox.memory_bytes,
            cpu_quota: self.sandbox.cpu_quota,
            wall_timeout: Duration::from_secs(self.sandbox.wall_timeout_secs),
            max_fds: self.sandbox.max_fds,
            max_procs: self.sandbox.max_procs,
        }
    }

    /// VM deployment assets, when all three paths are configured.
    #[must_use]
    pub fn vm_assets(&self) -> Option<VmAssets> {
        match (
            &self.sandbox.vm_launcher,
            &self.sandbox.vm_kernel,
            &self.sandbox.vm_rootfs,
        ) {
            (Some(launcher), Some(kernel), Some(rootfs)) => Some(VmAssets {
                launcher: launcher.clone(),
                kernel: kernel.clone(),
                rootfs: rootfs.clone(),
            }),
            _ => None,
        }
    }
}

fn warn_unknown_sections(content: &str, path: &Path) {
    let Ok(value) = content.parse::<toml::Value>() else {
        return;
    };
    if let Some(table) = value.as_table() {
        for key in table.keys() {
            if !KNOWN_SECTIONS.contains(&key.as_str()) {
                tracing::warn!(key, path = %path.display(), "unknown config key ignored");
            }
        }
    }
}
