use std::path::Path;

use serde_json::Value;

use crate::descriptor::{DEFAULT_MAX_SCHEMA_DEPTH, ToolDescriptor, check_schema};
use crate::error::IndexError;

/// Raw on-disk descriptor file: the server name comes from the directory.
#[derive(serde::Deserialize)]
struct DescriptorFile {
    name: String,
    description: String,
    input_schema: Value,
    #[serde(default)]
    output_schema: Value,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    cost_hint: u32,
}

/// Load every `*.json` descriptor under one server directory.
///
/// The directory name is the server namespace. Files with unresolved `$ref`
/// or schemas deeper than `max_depth` are rejected, which is fatal for
/// indexing (spec: never fabricate descriptors).
///
/// # Errors
///
/// Returns [`IndexError`] on io, parse, or schema failures.
pub fn load_server_dir(dir: &Path, max_depth: usize) -> Result<Vec<ToolDescriptor>, IndexError> {
    let server = dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let entries = std::fs::read_dir(dir).map_err(|source| IndexError::Io {
        path: dir.display().to_string(),
        source,
    })?;

    let mut descriptors = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| IndexError::Io {
            path: dir.display().to_string(),
            source,
        })?;
        let path = entry.path();
        if path.extension().is_none_or(|e| e != "json") {
            continue;
        }
        descriptors.push(load_descriptor_file(&path, &server, max_depth)?);
    }

    descriptors.sort_by(|a, b| a.name.cmp(&b.name));
    tracing::debug!(server = %server, count = descriptors.len(), "loaded tool descriptors");
    Ok(descriptors)
}

/// Load all server directories under a root descriptor directory.
///
/// # Errors
///
/// Returns the first io/parse/schema failure encountered.
pub fn load_descriptor_root(
    root: &Path,
    max_depth: usize,
) -> Result<Vec<ToolDescriptor>, IndexError> {
    let entries = std::fs::read_dir(root).map_err(|source| IndexError::Io {
        path: root.display().to_string(),
        source,
    })?;

    let mut all = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| IndexError::Io {
            path: root.display().to_string(),
            source,
        })?;
        if entry.path().is_dir() {
            all.extend(load_server_dir(&entry.path(), max_depth)?);
        }
    }
    Ok(all)
}

fn load_descriptor_file(
    path: &Path,
    server: &str,
    max_depth: usize,
) -> Result<ToolDescriptor, IndexError> {
    let display = path.display().to_string();
    let content = std::fs::read_to_string(path).map_err(|source| IndexError::Io {
        path: display.clone(),
        source,
    })?;
    let file: DescriptorFile =
        serde_json::from_str(&content).map_err(|source| IndexError::Parse {
            path: display.clone(),
            source,
        })?;

    check_schema(&file.input_schema, max_depth).map_err(|reason| IndexError::Schema {
        path: display.clone(),
        reason,
    })?;
    if !file.output_schema.is_null() {
        check_schema(&file.output_schema, max_depth).map_err(|reason| IndexError::Schema {
            path: display,
            reason,
        })?;
    }

    Ok(ToolDescriptor {
        server: server.to_owned(),
        name: file.name,
        description: file.description,
        input_schema: file.input_schema,
        output_schema: file.output_schema,
        tags: file.tags,
        cost_hint: file.cost_hint,
    })
}
