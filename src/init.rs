//! Interactive starter-config wizard for `crucible init`.

use std::path::Path;

use anyhow::Context;
use dialoguer::{Confirm, Input, Select};

use crucible_core::EngineConfig;
use crucible_sandbox::SecurityLevel;

/// Answers collected from the prompts; separated from the prompting so the
/// config assembly is testable.
#[derive(Debug, Clone)]
pub(crate) struct WizardState {
    pub(crate) security_level: SecurityLevel,
    pub(crate) allow_network: bool,
    pub(crate) allowed_domains: Vec<String>,
    pub(crate) audit_path: String,
    pub(crate) descriptor_root: String,
    pub(crate) pool_capacity: usize,
}

impl Default for WizardState {
    fn default() -> Self {
        let config = EngineConfig::default();
        Self {
            security_level: config.security.level,
            allow_network: false,
            allowed_domains: Vec::new(),
            audit_path: config.audit.path.display().to_string(),
            descriptor_root: config.index.descriptor_root.display().to_string(),
            pool_capacity: config.sandbox.pool_capacity,
        }
    }
}

pub(crate) fn run(path: &Path) -> anyhow::Result<()> {
    if path.exists() {
        let overwrite = Confirm::new()
            .with_prompt(format!("{} exists, overwrite?", path.display()))
            .default(false)
            .interact()?;
        if !overwrite {
            println!("aborted");
            return Ok(());
        }
    }

    let state = prompt()?;
    let config = build_config(&state);
    let rendered = toml::to_string_pretty(&config).context("failed to render config")?;
    std::fs::write(path, rendered)
        .with_context(|| format!("failed to write {}", path.display()))?;
    println!("wrote {}", path.display());
    Ok(())
}

fn prompt() -> anyhow::Result<WizardState> {
    let mut state = WizardState::default();

    let levels = ["maximum (microVM)", "high (container)", "moderate (process)"];
    let pick = Select::new()
        .with_prompt("security level")
        .items(&levels)
        .default(1)
        .interact()?;
    state.security_level = match pick {
        0 => SecurityLevel::Maximum,
        2 => SecurityLevel::Moderate,
        _ => SecurityLevel::High,
    };

    state.allow_network = Confirm::new()
        .with_prompt("allow whitelisted network egress?")
        .default(false)
        .interact()?;
    if state.allow_network {
        let domains: String = Input::new()
            .with_prompt("allowed domains (comma separated, *.example.com for subdomains)")
            .allow_empty(true)
            .interact_text()?;
        state.allowed_domains = domains
            .split(',')
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .map(str::to_owned)
            .collect();
    }

    state.audit_path = Input::new()
        .with_prompt("audit log path")
        .default(state.audit_path)
        .interact_text()?;
    state.descriptor_root = Input::new()
        .with_prompt("tool descriptor directory")
        .default(state.descriptor_root)
        .interact_text()?;
    state.pool_capacity = Input::new()
        .with_prompt("sandbox pool capacity")
        .default(state.pool_capacity)
        .interact_text()?;

    Ok(state)
}

fn build_config(state: &WizardState) -> EngineConfig {
    let mut config = EngineConfig::default();
    config.security.level = state.security_level;
    config.network.allow_network = state.allow_network;
    config.network.allowed_domains = state.allowed_domains.clone();
    config.audit.path = state.audit_path.clone().into();
    config.index.descriptor_root = state.descriptor_root.clone().into();
    config.sandbox.pool_capacity = state.pool_capacity;
    config
}
