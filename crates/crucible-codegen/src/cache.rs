use std::collections::HashMap;
use std::path::Path;

use crate::artifact::{GeneratedArtifact, Language, fingerprint};
use crate::error::CodegenError;

use crucible_index::ToolDescriptor;

/// In-memory artifact cache keyed by fingerprint.
///
/// The fingerprint covers every contributing schema version plus the
/// template version, so a schema change naturally misses the cache; stale
/// entries are dropped by [`ArtifactCache::retain_fingerprints`].
///
/// Artifacts are never persisted here. Disk spill is an explicit debug
/// feature owned by the orchestrator and is disabled at the maximum
/// security level.
#[derive(Debug, Default)]
pub struct ArtifactCache {
    entries: HashMap<String, GeneratedArtifact>,
    hits: u64,
    misses: u64,
}

impl ArtifactCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch the artifact for a descriptor set, rendering on miss.
    ///
    /// # Errors
    ///
    /// Propagates render failures; nothing is cached on error.
    pub fn get_or_render(
        &mut self,
        descriptors: &[ToolDescriptor],
        language: Language,
    ) -> Result<&GeneratedArtifact, CodegenError> {
        let key = fingerprint(descriptors, language);
        if self.entries.contains_key(&key) {
            self.hits += 1;
        } else {
            let artifact = crate::render(descriptors, language)?;
            self.entries.insert(key.clone(), artifact);
            self.misses += 1;
        }
        Ok(&self.entries[&key])
    }

    /// Drop every entry whose fingerprint is not in `active`.
    pub fn retain_fingerprints(&mut self, active: &[String]) {
        self.entries.retain(|k, _| active.iter().any(|a| a == k));
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub const fn stats(&self) -> (u64, u64) {
        (self.hits, self.misses)
    }
}

/// Write an artifact next to its fingerprint for debugging.
///
/// # Errors
///
/// Returns a template error when the spill directory is not writable.
pub fn spill(artifact: &GeneratedArtifact, dir: &Path) -> Result<std::path::PathBuf, CodegenError> {
    let ext = match artifact.language {
        Language::TypeScript => "ts",
        Language::Python => "py",
    };
    let path = dir.join(format!("{}.{ext}", artifact.fingerprint));
    std::fs::write(&path, &artifact.source).map_err(|e| CodegenError::Template {
        reason: format!("artifact spill failed: {e}"),
    })?;
    Ok(path)
}
