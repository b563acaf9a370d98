//! Schema classification shared by both language renderers.
//!
//! The mapping from JSON Schema to host-language types is total: every
//! schema value classifies into one of [`SchemaKind`]'s arms, with unknown
//! constructs degrading to [`SchemaKind::Any`] (renderers attach a warning).

use serde_json::Value;

#[derive(Debug)]
pub enum SchemaKind<'a> {
    /// Record type; property list is sorted by name for determinism.
    Object {
        properties: Vec<(String, &'a Value)>,
        required: Vec<String>,
    },
    Array {
        items: Option<&'a Value>,
    },
    /// Union of string literals.
    Enum {
        variants: Vec<String>,
    },
    /// Tagged union of alternative schemas.
    OneOf {
        branches: Vec<&'a Value>,
    },
    String,
    Number,
    Integer,
    Boolean,
    Null,
    /// Anything the mapping does not model; degrades to an any-equivalent.
    Any,
}

/// Classify `node`, resolving internal `$ref` pointers against `root`.
///
/// `path` carries the `$ref` targets currently being expanded; revisiting
/// one means the schema is circular.
///
/// # Errors
///
/// Returns a reason string for circular or unresolved references.
pub fn classify<'a>(
    root: &'a Value,
    node: &'a Value,
    path: &mut Vec<String>,
) -> Result<SchemaKind<'a>, String> {
    let Value::Object(map) = node else {
        // Booleans `true`/`false` are valid schemas; treat both as open.
        return Ok(SchemaKind::Any);
    };

    if let Some(r) = map.get("$ref") {
        let Some(target) = r.as_str() else {
            return Err("$ref is not a string".into());
        };
        if path.iter().any(|p| p == target) {
            return Err(format!("circular $ref '{target}'"));
        }
        let pointer = target
            .strip_prefix('#')
            .ok_or_else(|| format!("external $ref '{target}'"))?;
        let resolved = root
            .pointer(pointer)
            .ok_or_else(|| format!("unresolved $ref '{target}'"))?;
        path.push(target.to_owned());
        let kind = classify(root, resolved, path)?;
        path.pop();
        return Ok(kind);
    }

    if let Some(variants) = map.get("enum") {
        let Some(items) = variants.as_array() else {
            return Ok(SchemaKind::Any);
        };
        if items.iter().all(Value::is_string) {
            let mut names: Vec<String> = items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_owned))
                .collect();
            names.sort_unstable();
            return Ok(SchemaKind::Enum { variants: names });
        }
        return Ok(SchemaKind::Any);
    }

    if let Some(branches) = map.get("oneOf").or_else(|| map.get("anyOf")) {
        let Some(items) = branches.as_array() else {
            return Ok(SchemaKind::Any);
        };
        return Ok(SchemaKind::OneOf {
            branches: items.iter().collect(),
        });
    }

    match map.get("type").and_then(Value::as_str) {
        Some("object") => {
            let mut properties: Vec<(String, &Value)> = map
                .get("properties")
                .and_then(Value::as_object)
                .map(|props| props.iter().map(|(k, v)| (k.clone(), v)).collect())
                .unwrap_or_default();
            properties.sort_by(|(a, _), (b, _)| a.cmp(b));
            let required = map
                .get("required")
                .and_then(Value::as_array)
                .map(|r| {
                    r.iter()
                        .filter_map(|v| v.as_str().map(str::to_owned))
                        .collect()
                })
                .unwrap_or_default();
            Ok(SchemaKind::Object {
                properties,
                required,
            })
        }
        Some("array") => Ok(SchemaKind::Array {
            items: map.get("items"),
        }),
        Some("string") => Ok(SchemaKind::String),
        Some("number") => Ok(SchemaKind::Number),
        Some("integer") => Ok(SchemaKind::Integer),
        Some("boolean") => Ok(SchemaKind::Boolean),
        Some("null") => Ok(SchemaKind::Null),
        _ => Ok(SchemaKind::Any),
    }
}

/// `snake_case` or kebab-case to PascalCase for generated type names.
#[must_use]
pub fn pascal_case(name: &str) -> String {
    name.split(|c: char| !c.is_alphanumeric())
        .filter(|s| !s.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect()
}

/// Sanitize a tool name into a host-language identifier.
#[must_use]
pub fn identifier(name: &str) -> String {
    let mut out: String = name
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect();
    if out.chars().next().is_some_and(|c| c.is_ascii_digit()) {
        out.insert(0, '_');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn classify_root(schema: &Value) -> Result<SchemaKind<'_>, String> {
        let mut path = Vec::new();
        classify(schema, schema, &mut path)
    }

    #[test]
    fn classifies_object_with_sorted_properties() {
        let schema = json!({
            "type": "object",
            "properties": {"zeta": {"type": "string"}, "alpha": {"type": "number"}},
            "required": ["alpha"]
        });
        let SchemaKind::Object { properties, required } = classify_root(&schema).unwrap() else {
            panic!("expected object");
        };
        assert_eq!(properties[0].0, "alpha");
        assert_eq!(properties[1].0, "zeta");
        assert_eq!(required, vec!["alpha"]);
    }

    #[test]
    fn classifies_string_enum() {
        let schema = json!({"enum": ["b", "a"]});
        let SchemaKind::Enum { variants } = classify_root(&schema).unwrap() else {
            panic!("expected enum");
        };
        assert_eq!(variants, vec!["a", "b"]);
    }

    #[test]
    fn mixed_enum_degrades_to_any() {
        let schema = json!({"enum": ["a", 1]});
        assert!(matches!(classify_root(&schema).unwrap(), SchemaKind::Any));
    }

    #[test]
    fn classifies_one_of() {
        let schema = json!({"oneOf": [{"type": "string"}, {"type": "number"}]});
        let SchemaKind::OneOf { branches } = classify_root(&schema).unwrap() else {
            panic!("expected oneOf");
        };
        assert_eq!(branches.len(), 2);
    }

    #[test]
    fn detects_circular_ref() {
        let schema = json!({
            "$defs": {"node": {"$ref": "#/$defs/node"}},
            "$ref": "#/$defs/node"
        });
        let err = classify_root(&schema).unwrap_err();
        assert!(err.contains("circular"));
    }

    #[test]
    fn resolves_internal_ref() {
        let schema = json!({
            "$defs": {"id": {"type": "integer"}},
            "$ref": "#/$defs/id"
        });
        assert!(matches!(classify_root(&schema).unwrap(), SchemaKind::Integer));
    }

    #[test]
    fn unknown_type_is_any() {
        let schema = json!({"type": "timestamp"});
        assert!(matches!(classify_root(&schema).unwrap(), SchemaKind::Any));
    }

    #[test]
    fn pascal_case_conversion() {
        assert_eq!(pascal_case("create_issue"), "CreateIssue");
        assert_eq!(pascal_case("read-file"), "ReadFile");
        assert_eq!(pascal_case("sum"), "Sum");
    }

    #[test]
    fn identifier_sanitizes() {
        assert_eq!(identifier("read-file"), "read_file");
        assert_eq!(identifier("2fa_check"), "_2fa_check");
    }
}
