//! Discovery and loading of versioned lone OpenAPI documents.

use super::{build_operations, get_mime_types, LoneSpec, Resolver};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::info;

/// One discovered spec file, before parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecFile {
    pub lone: String,
    /// e.g. `v3.0.1`
    pub version: String,
    /// e.g. `v3`
    pub major_version: String,
    pub file_name: String,
    pub path: PathBuf,
}

/// Split a `vnd.<family>.<lone>.v<maj>.<min>.<patch>` file name into its
/// lone and version pieces.
pub fn parse_spec_file_name(file_name: &str) -> Option<(String, String, String)> {
    let parts: Vec<&str> = file_name.split('.').collect();
    if parts.len() < 4 {
        return None;
    }
    let version = parts[parts.len() - 3..].join(".");
    let major = parts[parts.len() - 3].to_string();
    if !major.starts_with('v') {
        return None;
    }
    let lone = parts[parts.len() - 4].to_string();
    Some((lone, version, major))
}

/// Discover every spec file in the family's openapi directory, optionally
/// filtered by lone.
pub fn discover_spec_files(
    openapi_dir: &Path,
    family: &str,
    lone: Option<&str>,
) -> anyhow::Result<Vec<SpecFile>> {
    let flat_family = family.replace('/', "_");
    let mut out = Vec::new();
    let entries = match std::fs::read_dir(openapi_dir) {
        Ok(e) => e,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
        Err(e) => anyhow::bail!("cannot read {}: {e}", openapi_dir.display()),
    };
    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let file_name = entry.file_name().to_string_lossy().to_string();
        let prefix = format!("vnd.{flat_family}.");
        if !file_name.starts_with(&prefix) {
            continue;
        }
        if let Some((file_lone, version, major)) = parse_spec_file_name(&file_name) {
            if lone.map(|l| l == file_lone).unwrap_or(true) {
                out.push(SpecFile {
                    lone: file_lone,
                    version,
                    major_version: major,
                    file_name,
                    path: entry.path(),
                });
            }
        }
    }
    // Greatest version sorts first, per lone.
    out.sort_by(|a, b| a.lone.cmp(&b.lone).then(b.file_name.cmp(&a.file_name)));
    Ok(out)
}

/// Latest spec file for one lone, if any.
pub fn latest_spec_file(
    openapi_dir: &Path,
    family: &str,
    lone: &str,
) -> anyhow::Result<Option<SpecFile>> {
    let files = discover_spec_files(openapi_dir, family, Some(lone))?;
    Ok(files.into_iter().next())
}

/// Parse a spec document; the vendor files carry no extension so JSON is
/// tried first, YAML second.
pub fn load_document(path: &Path) -> anyhow::Result<Value> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("cannot read {}: {e}", path.display()))?;
    match serde_json::from_str(&content) {
        Ok(v) => Ok(v),
        Err(_) => Ok(serde_yaml::from_str(&content)?),
    }
}

/// Load and compile one lone spec file into its operation table.
pub fn load_lone_spec(openapi_dir: &Path, file: &SpecFile) -> anyhow::Result<LoneSpec> {
    let doc = load_document(&file.path)?;
    info!(file = %file.file_name, lone = %file.lone, "loading spec file");
    let resolver = Resolver::new(openapi_dir.to_path_buf(), doc.clone());
    let media_types = get_mime_types(&doc);
    let schema_names = doc
        .pointer("/components/schemas")
        .and_then(Value::as_object)
        .map(|m| m.keys().cloned().collect())
        .unwrap_or_default();
    let parameter_names = doc
        .pointer("/components/parameters")
        .and_then(Value::as_object)
        .map(|m| m.keys().cloned().collect())
        .unwrap_or_default();
    let operations = build_operations(&doc, &resolver, file, &media_types)?;
    Ok(LoneSpec {
        lone: file.lone.clone(),
        version: file.version.clone(),
        major_version: file.major_version.clone(),
        file_name: file.file_name.clone(),
        file_path: file.path.clone(),
        media_types,
        schema_names,
        parameter_names,
        operations,
    })
}

/// Load the latest spec for every lone the server config lists.
pub fn load_family_specs(
    openapi_dir: &Path,
    family: &str,
    lones: &[String],
) -> anyhow::Result<Vec<LoneSpec>> {
    let mut specs = Vec::new();
    for lone in lones {
        match latest_spec_file(openapi_dir, family, lone)? {
            Some(file) => specs.push(load_lone_spec(openapi_dir, &file)?),
            None => {
                tracing::warn!(lone = %lone, "no openapi document found for lone");
            }
        }
    }
    Ok(specs)
}
