//! Renders typed source-code wrappers over tool schemas.
//!
//! The model writes against the generated surface instead of raw MCP
//! schemas; the `__invoke` shim carries onward calls over the workspace
//! RPC socket to the engine. Rendering is pure text-out: nothing here
//! ever evaluates generated code.

pub mod artifact;
pub mod cache;
pub mod error;
pub mod python;
pub mod schema;
pub mod typescript;

pub use artifact::{GeneratedArtifact, Language, estimate_tokens, fingerprint};
pub use cache::ArtifactCache;
pub use error::CodegenError;

use crucible_index::ToolDescriptor;

/// Render one artifact exposing every descriptor as a typed async function.
///
/// Output is deterministic: the same descriptor set, template version, and
/// language produce byte-identical source.
///
/// # Errors
///
/// Returns [`CodegenError::Schema`] on circular or malformed schemas and
/// [`CodegenError::Template`] when the descriptor set is empty.
pub fn render(
    descriptors: &[ToolDescriptor],
    language: Language,
) -> Result<GeneratedArtifact, CodegenError> {
    if descriptors.is_empty() {
        return Err(CodegenError::Template {
            reason: "no descriptors to render".into(),
        });
    }

    let mut warnings = Vec::new();
    let source = match language {
        Language::TypeScript => typescript::render(descriptors, &mut warnings)?,
        Language::Python => python::render(descriptors, &mut warnings)?,
    };

    let artifact = GeneratedArtifact {
        fingerprint: fingerprint(descriptors, language),
        language,
        token_estimate: estimate_tokens(&source),
        source,
        dependencies: Vec::new(),
        warnings,
    };
    tracing::debug!(
        language = %language,
        tools = descriptors.len(),
        tokens = artifact.token_estimate,
        "rendered artifact"
    );
    Ok(artifact)
}
