//! AST layer: constructs that text patterns miss.
//!
//! Parses with tree-sitter and walks the call graph looking for dynamic
//! module loading, sink calls fed by non-literal arguments, function
//! construction from strings, and raw byte execution.

use tree_sitter::{Node, Parser};

use crucible_codegen::Language;

use crate::error::ValidateError;
use crate::report::{Severity, Violation};

/// Callables whose first argument must be a literal to be auditable.
const SINKS: &[&str] = &[
    "fetch", "open", "readFile", "writeFile", "unlink", "urlopen", "system", "popen", "connect",
    "remove",
];

/// Callables that turn raw bytes into executable state.
const BYTE_EXECUTORS: &[&str] = &[
    "marshal.loads",
    "pickle.loads",
    "ctypes.CDLL",
    "WebAssembly.instantiate",
    "WebAssembly.compile",
];

fn grammar(language: Language) -> tree_sitter::Language {
    match language {
        Language::TypeScript => tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into(),
        Language::Python => tree_sitter_python::LANGUAGE.into(),
    }
}

/// Parse `source` and collect AST-level violations.
///
/// # Errors
///
/// Returns [`ValidateError::Grammar`] when the parser rejects the grammar.
pub fn scan(source: &str, language: Language) -> Result<Vec<Violation>, ValidateError> {
    let mut parser = Parser::new();
    parser
        .set_language(&grammar(language))
        .map_err(|e| ValidateError::Grammar {
            language,
            reason: e.to_string(),
        })?;
    let Some(tree) = parser.parse(source, None) else {
        return Ok(Vec::new());
    };

    let mut violations = Vec::new();
    walk(tree.root_node(), source, language, &mut violations);
    Ok(violations)
}

fn walk(node: Node<'_>, source: &str, language: Language, out: &mut Vec<Violation>) {
    let mut cursor = node.walk();
    for child in node.named_children(&mut cursor) {
        inspect(child, source, language, out);
        walk(child, source, language, out);
    }
}

fn inspect(node: Node<'_>, source: &str, language: Language, out: &mut Vec<Violation>) {
    let line = node.start_position().row + 1;
    match (language, node.kind()) {
        (Language::TypeScript, "call_expression") => {
            let Some(func) = node.child_by_field_name("function") else {
                return;
            };
            let callee = &source[func.byte_range()];
            if func.kind() == "import" {
                out.push(Violation {
                    rule: "dynamic-module-load".into(),
                    severity: Severity::High,
                    message: "dynamic import() expression".into(),
                    recommendation: "import modules statically at the top of the file".into(),
                    line: Some(line),
                });
            }
            check_call(node, callee, source, line, out);
        }
        (Language::TypeScript, "new_expression") => {
            let Some(ctor) = node.child_by_field_name("constructor") else {
                return;
            };
            if &source[ctor.byte_range()] == "Function" {
                out.push(Violation {
                    rule: "function-constructor".into(),
                    severity: Severity::Critical,
                    message: "function constructed from a string".into(),
                    recommendation: "construct no functions from strings".into(),
                    line: Some(line),
                });
            }
        }
        (Language::Python, "call") => {
            let Some(func) = node.child_by_field_name("function") else {
                return;
            };
            let callee = &source[func.byte_range()];
            // builtins.eval and friends reached through an attribute dodge
            // the pattern layer.
            if callee.ends_with(".eval") || callee.ends_with(".exec") {
                out.push(Violation {
                    rule: "indirect-eval".into(),
                    severity: Severity::Critical,
                    message: format!("indirect call to '{callee}'"),
                    recommendation: "never evaluate strings as code".into(),
                    line: Some(line),
                });
            }
            check_call(node, callee, source, line, out);
        }
        _ => {}
    }
}

fn check_call(call: Node<'_>, callee: &str, source: &str, line: usize, out: &mut Vec<Violation>) {
    if BYTE_EXECUTORS.iter().any(|b| callee.ends_with(b)) {
        out.push(Violation {
            rule: "raw-byte-execution".into(),
            severity: Severity::High,
            message: format!("'{callee}' executes raw bytes"),
            recommendation: "no deserialisation of executable payloads".into(),
            line: Some(line),
        });
        return;
    }

    let name = callee.rsplit('.').next().unwrap_or(callee);
    if !SINKS.contains(&name) {
        return;
    }
    let Some(args) = call.child_by_field_name("arguments") else {
        return;
    };
    let mut cursor = args.walk();
    let Some(first) = args.named_children(&mut cursor).next() else {
        return;
    };
    if !is_literal(&first, source) {
        out.push(Violation {
            rule: "non-literal-sink-argument".into(),
            severity: Severity::Medium,
            message: format!("'{name}' called with a computed argument"),
            recommendation: "pass literal paths and URLs so the call can be audited".into(),
            line: Some(line),
        });
    }
}

fn is_literal(node: &Node<'_>, source: &str) -> bool {
    match node.kind() {
        "string" => true,
        // A template string with no interpolation is still a literal.
        "template_string" => !source[node.byte_range()].contains("${"),
        _ => false,
    }
}
