//! Audit redaction for engine payloads
//!
//! Every stored or logged copy of a request or response goes through
//! [`redact`]: oversized definition blobs are dropped, credential fields are
//! masked and long strings are cut with a visible marker.

use serde_json::{Map, Value};

/// Longest string kept verbatim
pub const MAX_STRING_CHARS: usize = 2000;

pub const MASK: &str = "***";

/// Keys dropped entirely (compared case-insensitively)
const OMITTED_KEYS: &[&str] = &[
    "bpmn_xml_file_contents",
    "bpmn_xml",
    "process_model_xml",
    "form_schema",
    "formschema",
    "form_ui_schema",
    "formuischema",
    "task_data_blob",
];

/// Key fragments whose values are masked
const SENSITIVE_FRAGMENTS: &[&str] = &[
    "token",
    "password",
    "secret",
    "authorization",
    "api_key",
    "apikey",
    "cookie",
];

pub fn redact(value: &Value) -> Value {
    match value {
        Value::Object(obj) => Value::Object(redact_object(obj)),
        Value::Array(items) => Value::Array(items.iter().map(redact).collect()),
        Value::String(s) => Value::String(truncate(s)),
        other => other.clone(),
    }
}

fn redact_object(obj: &Map<String, Value>) -> Map<String, Value> {
    let mut out = Map::new();
    for (key, value) in obj {
        let lower = key.to_ascii_lowercase();
        if OMITTED_KEYS.contains(&lower.as_str()) {
            continue;
        }
        if SENSITIVE_FRAGMENTS.iter().any(|f| lower.contains(f)) && !value.is_null() {
            out.insert(key.clone(), Value::String(MASK.to_string()));
            continue;
        }
        out.insert(key.clone(), redact(value));
    }
    out
}

fn truncate(s: &str) -> String {
    let total = s.chars().count();
    if total <= MAX_STRING_CHARS {
        return s.to_string();
    }
    let kept: String = s.chars().take(MAX_STRING_CHARS).collect();
    format!("{kept}...[truncated {} chars]", total - MAX_STRING_CHARS)
}
