//! Obfuscation layer: heuristics for code written to dodge the other layers.

use std::sync::LazyLock;

use regex::Regex;

use crate::report::{Severity, Violation};

/// Non-alphanumeric density above this (whitespace excluded) is suspicious.
const SYMBOL_RATIO_LIMIT: f64 = 0.45;
const LONG_LITERAL_LIMIT: usize = 500;
const CONCAT_CHAIN_LIMIT: usize = 6;

static BASE64_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Za-z0-9+/]{120,}={0,2}").unwrap());

static STRING_LITERAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""(?:[^"\\]|\\.)*"|'(?:[^'\\]|\\.)*'"#).unwrap());

static CONCAT_CHAIN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?:"(?:[^"\\]|\\.)*"\s*\+\s*){6,}"#).unwrap());

/// Scan `source`; returns the violations and whether the flag is raised.
#[must_use]
pub fn scan(source: &str) -> (Vec<Violation>, bool) {
    let mut violations = Vec::new();

    let visible: Vec<char> = source.chars().filter(|c| !c.is_whitespace()).collect();
    if !visible.is_empty() {
        let symbols = visible.iter().filter(|c| !c.is_alphanumeric()).count();
        #[allow(clippy::cast_precision_loss)]
        let ratio = symbols as f64 / visible.len() as f64;
        if ratio > SYMBOL_RATIO_LIMIT {
            violations.push(Violation {
                rule: "symbol-density".into(),
                severity: Severity::Medium,
                message: format!("non-alphanumeric ratio {ratio:.2} exceeds {SYMBOL_RATIO_LIMIT}"),
                recommendation: "write plain, reviewable code".into(),
                line: None,
            });
        }
    }

    for m in STRING_LITERAL.find_iter(source) {
        if m.len() > LONG_LITERAL_LIMIT {
            let line = source[..m.start()].matches('\n').count() + 1;
            violations.push(Violation {
                rule: "long-string-literal".into(),
                severity: Severity::Medium,
                message: format!("string literal of {} characters", m.len()),
                recommendation: "pass large payloads as data, not embedded literals".into(),
                line: Some(line),
            });
        }
    }

    if let Some(m) = CONCAT_CHAIN.find(source) {
        let links = m.as_str().matches('+').count();
        if links >= CONCAT_CHAIN_LIMIT {
            let line = source[..m.start()].matches('\n').count() + 1;
            violations.push(Violation {
                rule: "concatenation-chain".into(),
                severity: Severity::Medium,
                message: format!("{links} chained string concatenations"),
                recommendation: "assembled strings hide intent; use one literal".into(),
                line: Some(line),
            });
        }
    }

    for m in BASE64_BLOCK.find_iter(source) {
        let line = source[..m.start()].matches('\n').count() + 1;
        violations.push(Violation {
            rule: "base64-block".into(),
            severity: Severity::Medium,
            message: format!("opaque base64-like block of {} characters", m.len()),
            recommendation: "no encoded payloads in generated code".into(),
            line: Some(line),
        });
    }

    let flagged = !violations.is_empty();
    (violations, flagged)
}
