// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Stable serialization and idempotency fingerprinting (component B).
//!
//! Canonicalizes step inputs into a deterministic shape, then hashes that
//! shape so equivalent inputs — reordered object keys, differently-cased
//! path separators, differently-ordered artifact/file lists — always
//! produce the same digest.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// A reference to an artifact consumed as a step input. Must carry `name`
/// or `id`; both absent is a caller error.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ArtifactRef {
    pub workspace: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
}

impl ArtifactRef {
    fn sort_key(&self) -> (String, String) {
        let name_or_id = self.name.clone().or_else(|| self.id.clone()).unwrap_or_default();
        (self.workspace.clone(), name_or_id)
    }
}

/// Raw, uncanonicalized inputs to a step.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StepInputs {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_refs: Option<Vec<ArtifactRef>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_paths: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// Normalize a single file path: backslashes to forward slashes, collapse
/// trailing slashes except for the root, no `.`/`..` resolution.
fn normalize_file_path(path: &str) -> String {
    let slashed = path.replace('\\', "/");
    if slashed == "/" {
        return slashed;
    }
    let trimmed = slashed.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Canonicalize step inputs into a JSON value per the rules in §4.3:
/// drop empty arrays/objects/undefined fields, normalize and sort file
/// paths, validate and sort artifact refs, recursively sort param object
/// keys (handled by [`stable_stringify`] at hash time).
pub fn canonicalize_inputs(inputs: &StepInputs) -> Result<Value, String> {
    let mut obj = Map::new();

    if let Some(repo_hash) = &inputs.repo_hash {
        if !repo_hash.is_empty() {
            obj.insert("repo_hash".into(), Value::String(repo_hash.clone()));
        }
    }

    if let Some(refs) = &inputs.artifact_refs {
        if !refs.is_empty() {
            let mut sorted = refs.clone();
            for r in &sorted {
                if r.name.is_none() && r.id.is_none() {
                    return Err("artifact_ref must carry name or id".to_string());
                }
            }
            sorted.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
            let values: Vec<Value> = sorted.iter().map(artifact_ref_to_value).collect();
            obj.insert("artifact_refs".into(), Value::Array(values));
        }
    }

    if let Some(paths) = &inputs.file_paths {
        if !paths.is_empty() {
            let mut normalized: Vec<String> = paths.iter().map(|p| normalize_file_path(p)).collect();
            normalized.sort();
            obj.insert(
                "file_paths".into(),
                Value::Array(normalized.into_iter().map(Value::String).collect()),
            );
        }
    }

    if let Some(params) = &inputs.params {
        if !is_empty_value(params) {
            obj.insert("params".into(), params.clone());
        }
    }

    Ok(Value::Object(obj))
}

/// Render an [`ArtifactRef`] as a JSON object directly, skipping the
/// fallible `serde_json::to_value` path (the shape is fully controlled, so
/// there is no error case worth a `Result` for).
fn artifact_ref_to_value(r: &ArtifactRef) -> Value {
    let mut obj = Map::new();
    obj.insert("workspace".into(), Value::String(r.workspace.clone()));
    if let Some(name) = &r.name {
        obj.insert("name".into(), Value::String(name.clone()));
    }
    if let Some(id) = &r.id {
        obj.insert("id".into(), Value::String(id.clone()));
    }
    if let Some(version) = r.version {
        obj.insert("version".into(), Value::Number(version.into()));
    }
    Value::Object(obj)
}

/// True for `null`, empty arrays, and empty objects — the "undefined"
/// shapes that canonicalization drops entirely.
fn is_empty_value(v: &Value) -> bool {
    match v {
        Value::Null => true,
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        _ => false,
    }
}

/// Recursively stringify a JSON value with object keys sorted
/// alphabetically and `undefined`-shaped values dropped.
///
/// - primitives use standard JSON literal rules.
/// - arrays preserve element order; an element that is itself "undefined"
///   (represented here as `Value::Null` arising from a dropped field) is
///   mapped to the JSON literal `null`, never omitted.
/// - objects emit keys in sorted order, omitting any key whose value would
///   itself be considered absent (we represent "absent" as the key simply
///   not being present in the map, matching how `canonicalize_inputs`
///   constructs its output).
/// - no circular reference support; input shapes are controlled internally.
pub fn stable_stringify(value: &Value) -> String {
    let mut out = String::new();
    write_stable(value, &mut out);
    out
}

fn write_stable(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => out.push_str(&n.to_string()),
        Value::String(s) => push_json_string(s, out),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_stable(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            out.push('{');
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                push_json_string(key, out);
                out.push(':');
                write_stable(&map[*key], out);
            }
            out.push('}');
        }
    }
}

/// Append a JSON string literal for `s`, escaping quotes, backslashes,
/// control characters, and the ASCII control range per the JSON grammar.
fn push_json_string(s: &str, out: &mut String) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => out.push_str(&format!("\\u{:04x}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
}

/// `sha256_hex(stable_stringify(canonical_inputs))`, a lowercase 64-hex digest.
pub fn inputs_digest(canonical_inputs: &Value) -> String {
    sha256_hex(stable_stringify(canonical_inputs).as_bytes())
}

/// `sha256_hex(step_id + "\0" + inputs_digest + "\0" + model + "\0" + schema_version + "\0" + prompt_version)`.
pub fn step_instance_id(
    step_id: &str,
    inputs_digest: &str,
    model: &str,
    schema_version: &str,
    prompt_version: &str,
) -> String {
    let joined = format!(
        "{step_id}\0{inputs_digest}\0{model}\0{schema_version}\0{prompt_version}"
    );
    sha256_hex(joined.as_bytes())
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    let mut hex = String::with_capacity(64);
    for byte in digest {
        hex.push_str(&format!("{:02x}", byte));
    }
    hex
}

#[cfg(test)]
#[path = "fingerprint_tests.rs"]
mod tests;
