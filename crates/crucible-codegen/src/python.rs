//! Python wrapper template.

use serde_json::Value;

use crucible_index::ToolDescriptor;

use crate::error::CodegenError;
use crate::schema::{SchemaKind, classify, identifier, pascal_case};

/// Render the Python artifact for a descriptor set.
///
/// # Errors
///
/// Returns [`CodegenError::Schema`] on circular or unresolved references.
pub fn render(
    descriptors: &[ToolDescriptor],
    warnings: &mut Vec<String>,
) -> Result<String, CodegenError> {
    let mut out = String::new();
    out.push_str("# Generated tool bindings; do not edit.\n");
    out.push_str("# __invoke forwards to the engine over the workspace RPC socket.\n\n");
    out.push_str("from __future__ import annotations\n\n");
    out.push_str("from typing import Any, Literal, NotRequired, TypedDict\n\n\n");
    out.push_str(concat!(
        "def _host_call(request: Any) -> Any:\n",
        "    import json, os, socket\n",
        "    path = os.environ.get(\"CRUCIBLE_RPC_SOCK\", \"/workspace/.crucible_rpc.sock\")\n",
        "    with socket.socket(socket.AF_UNIX, socket.SOCK_STREAM) as sock:\n",
        "        sock.connect(path)\n",
        "        sock.sendall(json.dumps(request).encode() + b\"\\n\")\n",
        "        buf = b\"\"\n",
        "        while not buf.endswith(b\"\\n\"):\n",
        "            chunk = sock.recv(65536)\n",
        "            if not chunk:\n",
        "                break\n",
        "            buf += chunk\n",
        "    reply = json.loads(buf)\n",
        "    if reply.get(\"error\"):\n",
        "        raise OSError(reply[\"error\"][\"message\"])\n",
        "    return reply.get(\"value\")\n",
        "\n\n",
        "async def __invoke(server: str, tool: str, params: Any) -> Any:\n",
        "    return _host_call(\n",
        "        {\"op\": \"invoke\", \"server\": server, \"tool\": tool, \"params\": params}\n",
        "    )\n",
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
    let mut classes = Vec::new();

    let input_ty = match classify(&d.input_schema, &d.input_schema, &mut path)? {
        SchemaKind::Object {
            properties,
            required,
        } if !properties.is_empty() => {
            emit_typed_dict(
                &d.input_schema,
                &input_name,
                &properties,
                &required,
                &mut path,
                &mut classes,
                warnings,
                d,
            )?;
            input_name.clone()
        }
        _ => py_type(
            &d.input_schema,
            &d.input_schema,
            &mut path,
            &input_name,
            &mut classes,
            warnings,
            d,
        )?,
    };

    let ret = if d.output_schema.is_null() {
        "Any".to_owned()
    } else {
        py_type(
            &d.output_schema,
            &d.output_schema,
            &mut path,
            &format!("{}Output", pascal_case(&d.name)),
            &mut classes,
            warnings,
            d,
        )?
    };

    for class in classes {
        out.push('\n');
        out.push('\n');
        out.push_str(&class);
    }

    out.push_str("\n\n");
    out.push_str(&format!("async def {func}(input: {input_ty}) -> {ret}:\n"));
    if !d.description.is_empty() {
        out.push_str(&format!("    \"\"\"{}\"\"\"\n", d.description));
    }
    out.push_str(&format!(
        "    return await __invoke(\"{}\", \"{}\", input)\n",
        d.server, d.name
    ));
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn emit_typed_dict(
    root: &Value,
    name: &str,
    properties: &[(String, &Value)],
    required: &[String],
    path: &mut Vec<String>,
    classes: &mut Vec<String>,
    warnings: &mut Vec<String>,
    d: &ToolDescriptor,
) -> Result<(), String> {
    let mut body = format!("class {name}(TypedDict):\n");
    for (field, schema) in properties {
        let nested_name = format!("{name}{}", pascal_case(field));
        let ty = py_type(root, schema, path, &nested_name, classes, warnings, d)?;
        if required.contains(field) {
            body.push_str(&format!("    {field}: {ty}\n"));
        } else {
            body.push_str(&format!("    {field}: NotRequired[{ty}]\n"));
        }
    }
    classes.push(body);
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn py_type(
    root: &Value,
    node: &Value,
    path: &mut Vec<String>,
    name_hint: &str,
    classes: &mut Vec<String>,
    warnings: &mut Vec<String>,
    d: &ToolDescriptor,
) -> Result<String, String> {
    Ok(match classify(root, node, path)? {
        SchemaKind::Object {
            properties,
            required,
        } => {
            if properties.is_empty() {
                "dict[str, Any]".to_owned()
            } else {
                emit_typed_dict(
                    root, name_hint, &properties, &required, path, classes, warnings, d,
                )?;
                name_hint.to_owned()
            }
        }
        SchemaKind::Array { items } => match items {
            Some(items) => {
                let inner = py_type(root, items, path, name_hint, classes, warnings, d)?;
                format!("list[{inner}]")
            }
            None => "list[Any]".to_owned(),
        },
        SchemaKind::Enum { variants } => {
            let literals = variants
                .iter()
                .map(|v| format!("\"{v}\""))
                .collect::<Vec<_>>()
                .join(", ");
            format!("Literal[{literals}]")
        }
        SchemaKind::OneOf { branches } => {
            let mut parts = Vec::with_capacity(branches.len());
            for (i, branch) in branches.iter().enumerate() {
                let hint = format!("{name_hint}V{i}");
                parts.push(py_type(root, branch, path, &hint, classes, warnings, d)?);
            }
            parts.join(" | ")
        }
        SchemaKind::String => "str".to_owned(),
        SchemaKind::Number => "float".to_owned(),
        SchemaKind::Integer => "int".to_owned(),
        SchemaKind::Boolean => "bool".to_owned(),
        SchemaKind::Null => "None".to_owned(),
        SchemaKind::Any => {
            warnings.push(format!(
                "{}: unmapped schema construct, using Any",
                d.qualified_name()
            ));
            "Any".to_owned()
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
    fn object_input_becomes_typed_dict() {
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
        assert!(out.contains("class SumInput(TypedDict):\n    a: float\n    b: float"));
        assert!(out.contains("async def sum(input: SumInput) -> float:"));
    }

    #[test]
    fn optional_fields_use_not_required() {
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
        assert!(out.contains("loud: NotRequired[bool]"));
        assert!(out.contains("name: str"));
    }

    #[test]
    fn nested_object_gets_own_class() {
        let d = tool(
            "ship",
            json!({
                "type": "object",
                "properties": {"address": {"type": "object",
                    "properties": {"city": {"type": "string"}}, "required": ["city"]}},
                "required": ["address"]
            }),
            Value::Null,
        );
        let mut warnings = Vec::new();
        let out = render(&[d], &mut warnings).unwrap();
        assert!(out.contains("class ShipInputAddress(TypedDict):\n    city: str"));
        assert!(out.contains("address: ShipInputAddress"));
    }

    #[test]
    fn enum_becomes_literal() {
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
        assert!(out.contains(r#"mode: Literal["fast", "safe"]"#));
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
        assert!(out.contains("x: NotRequired[Any]"));
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn prelude_contains_shim() {
        let d = tool("ping", json!({"type": "object"}), Value::Null);
        let mut warnings = Vec::new();
        let out = render(&[d], &mut warnings).unwrap();
        assert!(out.starts_with("# Generated tool bindings"));
        assert!(out.contains("async def __invoke"));
        assert!(out.contains("socket.AF_UNIX"));
        assert!(out.contains("CRUCIBLE_RPC_SOCK"));
        assert!(out.contains("raise OSError"));
    }
}
