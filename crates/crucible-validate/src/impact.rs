//! Impact assessment: what the code would reach if every call succeeded.
//!
//! Built from string literals fed to file, fetch, and exec sinks. Advisory
//! only; the sandbox is the enforcement boundary.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Qualitative reach of a proposed action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlastRadius {
    /// Workspace only.
    Contained,
    /// Host directories outside the workspace.
    Local,
    /// OS state: spawned commands, deletions outside the workspace.
    System,
    /// External side effects.
    Network,
}

impl std::fmt::Display for BlastRadius {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Contained => "contained",
            Self::Local => "local",
            Self::System => "system",
            Self::Network => "network",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImpactAssessment {
    pub files_touched: Vec<String>,
    pub files_deleted_count: usize,
    pub hosts_contacted: Vec<String>,
    pub commands_spawned: Vec<String>,
    pub reversible: bool,
    pub blast_radius: BlastRadius,
}

static FILE_SINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?:open|readFile(?:Sync)?|writeFile(?:Sync)?|read_text|write_text)\s*\(\s*["']([^"']+)["']"#,
    )
    .unwrap()
});

static DELETE_SINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?:unlink(?:Sync)?|remove|rmdir|rmSync|rm)\s*\(\s*["']([^"']+)["']"#).unwrap()
});

static URL_LITERAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"["'](https?://[^"']+)["']"#).unwrap());

static EXEC_SINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?:exec(?:Sync)?|spawn(?:Sync)?|system|popen|run)\s*\(\s*["']([^"']+)["']"#)
        .unwrap()
});

/// Inspect `source` and describe its worst-case reach.
#[must_use]
pub fn assess(source: &str, workspace_prefix: &str) -> ImpactAssessment {
    let mut files_touched: Vec<String> = FILE_SINK
        .captures_iter(source)
        .map(|c| c[1].to_owned())
        .collect();

    let mut files_deleted_count = 0;
    for c in DELETE_SINK.captures_iter(source) {
        files_deleted_count += 1;
        files_touched.push(c[1].to_owned());
    }
    files_touched.sort_unstable();
    files_touched.dedup();

    let mut hosts_contacted: Vec<String> = URL_LITERAL
        .captures_iter(source)
        .filter_map(|c| url::Url::parse(&c[1]).ok())
        .filter_map(|u| u.host_str().map(str::to_owned))
        .collect();
    hosts_contacted.sort_unstable();
    hosts_contacted.dedup();

    let commands_spawned: Vec<String> = EXEC_SINK
        .captures_iter(source)
        .map(|c| c[1].to_owned())
        .collect();

    let escapes_workspace = files_touched
        .iter()
        .any(|p| p.starts_with('/') && !p.starts_with(workspace_prefix));

    let blast_radius = if !hosts_contacted.is_empty() {
        BlastRadius::Network
    } else if !commands_spawned.is_empty() {
        BlastRadius::System
    } else if escapes_workspace {
        BlastRadius::Local
    } else {
        BlastRadius::Contained
    };

    let reversible = files_deleted_count == 0 && commands_spawned.is_empty();

    ImpactAssessment {
        files_touched,
        files_deleted_count,
        hosts_contacted,
        commands_spawned,
        reversible,
        blast_radius,
    }
}
