use serde::{Deserialize, Serialize};

use crucible_index::ToolDescriptor;

/// Bumped whenever the rendered shape changes; part of the fingerprint so
/// cached artifacts from older templates are never reused.
pub const TEMPLATE_VERSION: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    TypeScript,
    Python,
}

impl Language {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::TypeScript => "typescript",
            Self::Python => "python",
        }
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Language {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "typescript" | "ts" => Ok(Self::TypeScript),
            "python" | "py" => Ok(Self::Python),
            other => Err(format!("unknown language '{other}'")),
        }
    }
}

/// One rendered code surface, cacheable by fingerprint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedArtifact {
    pub fingerprint: String,
    pub language: Language,
    pub source: String,
    pub token_estimate: usize,
    /// External packages the artifact imports; empty for both current
    /// templates (the shim is self-contained).
    pub dependencies: Vec<String>,
    /// Generator warnings, e.g. schema constructs degraded to any-equivalents.
    pub warnings: Vec<String>,
}

/// Content hash covering descriptor versions, template version, and language.
#[must_use]
pub fn fingerprint(descriptors: &[ToolDescriptor], language: Language) -> String {
    let mut versions: Vec<String> = descriptors.iter().map(ToolDescriptor::version).collect();
    versions.sort_unstable();

    let mut hasher = blake3::Hasher::new();
    hasher.update(language.as_str().as_bytes());
    hasher.update(&TEMPLATE_VERSION.to_le_bytes());
    for v in &versions {
        hasher.update(v.as_bytes());
    }
    hasher.finalize().to_hex().to_string()
}

/// Tokenizer-agnostic cost estimate: whitespace-normalised character count
/// divided by four, rounded up.
#[must_use]
pub fn estimate_tokens(source: &str) -> usize {
    let mut chars = 0usize;
    let mut in_whitespace = false;
    for c in source.chars() {
        if c.is_whitespace() {
            if !in_whitespace {
                chars += 1;
            }
            in_whitespace = true;
        } else {
            chars += 1;
            in_whitespace = false;
        }
    }
    chars.div_ceil(4)
}
