//! Static analysis over generated source: layered violation scanning, a
//! risk classifier, and an advisory impact assessment.
//!
//! Validation is a pure function of the source text. Nothing here touches
//! the filesystem or the network.

pub mod ast;
pub mod complexity;
pub mod error;
pub mod impact;
pub mod obfuscation;
pub mod report;
pub mod rules;

pub use error::ValidateError;
pub use impact::{BlastRadius, ImpactAssessment, assess};
pub use report::{
    COMPLEXITY_THRESHOLD, RiskLevel, Severity, ValidationReport, Violation, determine_risk,
};

use crucible_codegen::{Language, estimate_tokens};

/// Run all four layers over `source` and produce a report.
///
/// Layers run in order: patterns, AST, complexity, obfuscation. A critical
/// pattern hit short-circuits; the remaining layers are skipped because the
/// artifact will never run.
///
/// # Errors
///
/// Returns [`ValidateError::Grammar`] when the tree-sitter grammar cannot
/// be loaded for `language`.
pub fn validate(source: &str, language: Language) -> Result<ValidationReport, ValidateError> {
    let resource_estimate = estimate_tokens(source);
    let mut violations = rules::scan(source);

    if violations.iter().any(|v| v.severity == Severity::Critical) {
        violations.sort_by(|a, b| b.severity.cmp(&a.severity));
        let risk_level = determine_risk(&violations, 0);
        tracing::warn!(violations = violations.len(), "validation short-circuited");
        return Ok(ValidationReport {
            violations,
            risk_level,
            complexity_score: 0,
            obfuscation_flag: false,
            resource_estimate,
        });
    }

    violations.extend(ast::scan(source, language)?);
    let complexity_score = complexity::score(source);
    let (obfuscation_violations, obfuscation_flag) = obfuscation::scan(source);
    violations.extend(obfuscation_violations);

    violations.sort_by(|a, b| b.severity.cmp(&a.severity));
    let risk_level = determine_risk(&violations, complexity_score);
    tracing::debug!(
        violations = violations.len(),
        complexity = complexity_score,
        risk = %risk_level,
        "validated artifact"
    );
    Ok(ValidationReport {
        violations,
        risk_level,
        complexity_score,
        obfuscation_flag,
        resource_estimate,
    })
}
