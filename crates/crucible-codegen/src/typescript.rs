//! TypeScript wrapper template.

use serde_json::Value;

use crucible_index::ToolDescriptor;

use crate::error::CodegenError;
use crate::schema::{SchemaKind, classify, identifier, pascal_case};

/// Render the TypeScript artifact for a descriptor set.
///
/// # Errors
///
/// Returns [`CodegenError::Schema`] on circular or unresolved references.
pub fn render(
    descriptors: &[ToolDescriptor],
    warnings: &mut Vec<String>,
) -> Result<String, CodegenError> {
    let mut out = String::new();
    out.push_str("// Generated tool bindings; do not edit.\n");
    out.push_str("// __invoke forwards to the engine over the workspace RPC socket.\n\n");
    out.push_str(concat!(
        "function __hostCall(request: unknown): Promise<any> {\n",
        "  const net = require(\"net\");\n",
        "  const path = process.env.CRUCIBLE_RPC_SOCK ?? \"/workspace/.crucible_rpc.sock\";\n",
        "  return new Promise((resolve, reject) => {\n",
        "    const sock = net.createConnection(path);\n",
        "    let buf = \"\";\n",
        "    sock.on(\"data\", (chunk: Buffer) => {\n",
        "      buf += chunk.toString(\"utf8\");\n",
        "      if (!buf.endsWith(\"\\n\")) return;\n",
        "      sock.end();\n",
        "      const reply = JSON.parse(buf);\n",
        "      if (reply.error) reject(new Error(reply.error.message));\n",
        "      else resolve(reply.value);\n",
        "    });\n",
        "    sock.on(\"error\", reject);\n",
        "    sock.write(JSON.stringify(request) + \"\\n\");\n",
        "  });\n",
        "}\n\n",
        "function __invoke(server: string, tool: string, params: unknown): Promise<any> {\n",
        "  return __hostCall({ op: \"invoke\", server, tool, params });\n",
        "}\n",
    ));

    let mut sorted: Vec<&ToolDescriptor> = descriptors.iter().collect();
    sorted.sort_by_key(|d| d.qualified_name());

    for d in sorted {
        render_tool(d, &mut out, warnings).map_err(|reason| CodegenError::Schema {
            tool: d.qualified_name(),
            reason,
        })?;
    }
    Ok(out)
}

fn render_tool(
    d: &ToolDescriptor,
    out: &mut String,
    warnings: &mut Vec<String>,
) -> Result<(), String> {
    let func = identifier(&d.name);
    let input_name = format!("{}Input", pascal_case(&d.name));
    let mut path = Vec::new();

    out.push('\n');
    match classify(&d.input_schema, &d.input_schema, &mut path)? {
        SchemaKind::Object {
            properties,
            required,
        } => {
            out.push_str(&format!("export interface {input_name} {{\n"));
            for (field, schema) in properties {
                let ty = ts_type(&d.input_schema, schema, &mut path, warnings, d)?;
                let marker = if required.contains(&field) { "" } else { "?" };
                out.push_str(&format!("  {field}{marker}: {ty};\n"));
            }
            out.push_str("}\n\n");
        }
        _ => {
            let ty = ts_type(&d.input_schema, &d.input_schema, &mut path, warnings, d)?;
            out.push_str(&format!("export type {input_name} = {ty};\n\n"));
        }
    }

    let ret = if d.output_schema.is_null() {
        "any".to_owned()
    } else {
        ts_type(&d.output_schema, &d.output_schema, &mut path, warnings, d)?
    };

    if !d.description.is_empty() {
        out.push_str(&format!("/** {} */\n", d.description));
    }
    out.push_str(&format!(
        "export async function {func}(input: {input_name}): Promise<{ret}> {{\n  return __invoke(\"{}\", \"{}\", input);\n}}\n",
        d.server, d.name
    ));
    Ok(())
}

fn ts_type(
    root: &Value,
    node: &Value,
    path: &mut Vec<String>,
    warnings: &mut Vec<String>,
    d: &ToolDescriptor,
) -> Result<String, String> {
    Ok(match classify(root, node, path)? {
        SchemaKind::Object {
            properties,
            required,
        } => {
            if properties.is_empty() {
                "Record<string, any>".to_owned()
            } else {
                let mut fields = Vec::with_capacity(properties.len());
                for (field, schema) in properties {
                    let ty = ts_type(root, schema, path, warnings, d)?;
                    let marker = if required.contains(&field) { "" } else { "?" };
                    fields.push(format!("{field}{marker}: {ty}"));
                }
                format!("{{ {} }}", fields.join("; "))
            }
        }
        SchemaKind::Array { items } => match items {
            Some(items) => {
                let inner = ts_type(root, items, path, warnings, d)?;
                if inner.contains(' ') {
                    format!("Array<{inner}>")
                } else {
                    format!("{inner}[]")
                }
            }
            None => "any[]".to_owned(),
        },
        SchemaKind::Enum { variants } => variants
            .iter()
            .map(|v| format!("\"{v}\""))
            .collect::<Vec<_>>()
            .join(" | "),
        SchemaKind::OneOf { branches } => {
            let mut parts = Vec::with_capacity(branches.len());
            for branch in branches {
                parts.push(ts_type(root, branch, path, warnings, d)?);
            }
            parts.join(" | ")
        }
        SchemaKind::String => "string".to_owned(),
        SchemaKind::Number | SchemaKind::Integer => "number".to_owned(),
        SchemaKind::Boolean => "boolean".to_owned(),
        SchemaKind::Null => "null".to_owned(),
        SchemaKind::Any => {
            warnings.push(format!(
                "{}: unmapped schema construct, using any",
                d.qualified_name()
            ));
            "any".to_owned()
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tool(name: &str, input: Value, output: Value) -> ToolDescriptor {
        ToolDescriptor {
            server: "srv".into(),
            name: name.into(),
            description: format!("the {name} tool"),
            input_schema: input,
            output_schema: output,
            tags: vec![],
            cost_hint: 0,
        }
    }

    #[test]
    fn object_input_becomes_interface() {
        let d = tool(
            "sum",
            json!({
                "type": "object",
                "properties": {"a": {"type": "number"}, "b": {"type": "number"}},
                "required": ["a", "b"]
            }),
            json!({"type": "number"}),
        );
        let mut warnings = Vec::new();
        let out = render(&[d], &mut warnings).unwrap();
        assert!(out.contains("export interface SumInput {\n  a: number;\n  b: number;\n}"));
        assert!(out.contains("Promise<number>"));
        assert!(warnings.is_empty());
    }

    #[test]
    fn optional_fields_get_question_mark() {
        let d = tool(
            "greet",
            json!({
                "type": "object",
                "properties": {"name": {"type": "string"}, "loud": {"type": "boolean"}},
                "required": ["name"]
            }),
            Value::Null,
        );
        let mut warnings = Vec::new();
        let out = render(&[d], &mut warnings).unwrap();
        assert!(out.contains("loud?: boolean;"));
        assert!(out.contains("name: string;"));
    }

    #[test]
    fn enum_becomes_literal_union() {
        let d = tool(
            "set_mode",
            json!({
                "type": "object",
                "properties": {"mode": {"enum": ["fast", "safe"]}},
                "required": ["mode"]
            }),
            Value::Null,
        );
        let mut warnings = Vec::new();
        let out = render(&[d], &mut warnings).unwrap();
        assert!(out.contains(r#"mode: "fast" | "safe";"#));
    }

    #[test]
    fn array_and_nested_object() {
        let d = tool(
            "batch",
            json!({
                "type": "object",
                "properties": {
                    "items": {"type": "array", "items": {"type": "object",
                        "properties": {"id": {"type": "integer"}}, "required": ["id"]}}
                },
                "required": ["items"]
            }),
            Value::Null,
        );
        let mut warnings = Vec::new();
        let out = render(&[d], &mut warnings).unwrap();
        assert!(out.contains("items: Array<{ id: number }>;"));
    }

    #[test]
    fn unknown_construct_warns() {
        let d = tool(
            "odd",
            json!({"type": "object", "properties": {"x": {"type": "vector"}}}),
            Value::Null,
        );
        let mut warnings = Vec::new();
        let out = render(&[d], &mut warnings).unwrap();
        assert!(out.contains("x?: any;"));
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("srv:odd"));
    }

    #[test]
    fn tools_render_in_stable_order() {
        let a = tool("alpha", json!({"type": "object"}), Value::Null);
        let b = tool("beta", json!({"type": "object"}), Value::Null);
        let mut w1 = Vec::new();
        let mut w2 = Vec::new();
        let one = render(&[a.clone(), b.clone()], &mut w1).unwrap();
        let two = render(&[b, a], &mut w2).unwrap();
        assert_eq!(one, two);
    }

    #[test]
    fn prelude_contains_socket_client() {
        let d = tool("ping", json!({"type": "object"}), Value::Null);
        let mut warnings = Vec::new();
        let out = render(&[d], &mut warnings).unwrap();
        assert!(out.contains("net.createConnection"));
        assert!(out.contains("CRUCIBLE_RPC_SOCK"));
        assert!(out.contains("reject(new Error(reply.error.message))"));
    }

    #[test]
    fn circular_schema_is_error() {
        let d = tool(
            "cyc",
            json!({"$defs": {"n": {"$ref": "#/$defs/n"}}, "$ref": "#/$defs/n"}),
            Value::Null,
        );
        let mut warnings = Vec::new();
        let err = render(&[d], &mut warnings).unwrap_err();
        assert!(matches!(err, CodegenError::Schema { .. }));
    }
}
