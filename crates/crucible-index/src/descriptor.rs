use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A schema-described tool exposed by an MCP server.
///
/// Descriptors are immutable once registered; a changed schema produces a
/// new content version rather than mutating the existing row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub server: String,
    pub name: String,
    pub description: String,
    pub input_schema: Value,
    #[serde(default)]
    pub output_schema: Value,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Relative invocation cost, used as a search tie-breaker (lower first).
    #[serde(default)]
    pub cost_hint: u32,
}

impl ToolDescriptor {
    #[must_use]
    pub fn qualified_name(&self) -> String {
        format!("{}:{}", self.server, self.name)
    }

    /// Content version: hash over everything that affects generated code.
    #[must_use]
    pub fn version(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.server.as_bytes());
        hasher.update(self.name.as_bytes());
        hasher.update(self.description.as_bytes());
        hasher.update(self.input_schema.to_string().as_bytes());
        hasher.update(self.output_schema.to_string().as_bytes());
        hasher.finalize().to_hex().to_string()
    }
}

/// Maximum nesting depth accepted by [`check_schema`] unless overridden.
pub const DEFAULT_MAX_SCHEMA_DEPTH: usize = 16;

/// Validate that a schema is self-contained and within the depth limit.
///
/// External `$ref` targets are rejected outright; internal `#/...` pointers
/// must resolve within the same document.
///
/// # Errors
///
/// Returns a human-readable reason on the first offending node.
pub fn check_schema(schema: &Value, max_depth: usize) -> Result<(), String> {
    check_node(schema, schema, 0, max_depth)
}

fn check_node(root: &Value, node: &Value, depth: usize, max_depth: usize) -> Result<(), String> {
    if depth > max_depth {
        return Err(format!("schema deeper than {max_depth} levels"));
    }
    match node {
        Value::Object(map) => {
            if let Some(r) = map.get("$ref") {
                let Some(target) = r.as_str() else {
                    return Err("$ref is not a string".into());
                };
                if !target.starts_with("#/") {
                    return Err(format!("external $ref '{target}'"));
                }
                if resolve_pointer(root, target).is_none() {
                    return Err(format!("unresolved $ref '{target}'"));
                }
            }
            for (_, v) in map {
                check_node(root, v, depth + 1, max_depth)?;
            }
            Ok(())
        }
        Value::Array(items) => {
            for v in items {
                check_node(root, v, depth + 1, max_depth)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

fn resolve_pointer<'a>(root: &'a Value, target: &str) -> Option<&'a Value> {
    let pointer = target.strip_prefix('#')?;
    root.pointer(pointer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn make_descriptor() -> ToolDescriptor {
        ToolDescriptor {
            server: "math".into(),
            name: "sum".into(),
            description: "add two numbers".into(),
            input_schema: json!({"type": "object"}),
            output_schema: json!({"type": "number"}),
            tags: vec!["arithmetic".into()],
            cost_hint: 1,
        }
    }

    #[test]
    fn qualified_name_format() {
        assert_eq!(make_descriptor().qualified_name(), "math:sum");
    }

    #[test]
    fn version_is_stable() {
        let a = make_descriptor();
        let b = make_descriptor();
        assert_eq!(a.version(), b.version());
    }

    #[test]
    fn version_changes_with_schema() {
        let a = make_descriptor();
        let mut b = make_descriptor();
        b.input_schema = json!({"type": "string"});
        assert_ne!(a.version(), b.version());
    }

    #[test]
    fn descriptor_roundtrip_json() {
        let d = make_descriptor();
        let text = serde_json::to_string(&d).unwrap();
        let parsed: ToolDescriptor = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed.qualified_name(), "math:sum");
        assert_eq!(parsed.cost_hint, 1);
    }

    #[test]
    fn optional_fields_default() {
        let parsed: ToolDescriptor = serde_json::from_str(
            r#"{"server":"s","name":"n","description":"d","input_schema":{}}"#,
        )
        .unwrap();
        assert!(parsed.tags.is_empty());
        assert_eq!(parsed.cost_hint, 0);
        assert!(parsed.output_schema.is_null());
    }

    #[test]
    fn accepts_plain_schema() {
        let schema = json!({"type": "object", "properties": {"a": {"type": "number"}}});
        assert!(check_schema(&schema, DEFAULT_MAX_SCHEMA_DEPTH).is_ok());
    }

    #[test]
    fn accepts_internal_ref() {
        let schema = json!({
            "$defs": {"addr": {"type": "string"}},
            "properties": {"home": {"$ref": "#/$defs/addr"}}
        });
        assert!(check_schema(&schema, DEFAULT_MAX_SCHEMA_DEPTH).is_ok());
    }

    #[test]
    fn rejects_external_ref() {
        let schema = json!({"$ref": "https://example.com/schema.json"});
        let err = check_schema(&schema, DEFAULT_MAX_SCHEMA_DEPTH).unwrap_err();
        assert!(err.contains("external $ref"));
    }

    #[test]
    fn rejects_unresolved_internal_ref() {
        let schema = json!({"$ref": "#/$defs/missing"});
        let err = check_schema(&schema, DEFAULT_MAX_SCHEMA_DEPTH).unwrap_err();
        assert!(err.contains("unresolved $ref"));
    }

    #[test]
    fn rejects_too_deep() {
        let mut schema = json!({"type": "string"});
        for _ in 0..20 {
            schema = json!({"items": schema});
        }
        let err = check_schema(&schema, DEFAULT_MAX_SCHEMA_DEPTH).unwrap_err();
        assert!(err.contains("deeper than"));
    }
}
