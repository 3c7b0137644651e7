//! Broker property parsing and rendering
//!
//! Broker configuration arrives in two forms: a flat list of `"key=value"`
//! lines and an optional nested configuration map. Both are normalized into
//! ordered key/value pairs here, with duplicate-key detection on the flat
//! form and deterministic flattening of the nested form, so that repeated
//! reconciliation passes always render the same `broker.properties` payload.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A single broker property after parsing
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyPair {
    pub key: String,
    pub value: String,
}

impl PropertyPair {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Two entries resolved to the same unescaped key
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("duplicate broker property key \"{key}\" at entry {index}")]
pub struct DuplicateKeyError {
    /// The unescaped key both entries share
    pub key: String,
    /// 0-based position of the second occurrence in the source list
    pub index: usize,
}

/// Parse a flat property list into ordered pairs, rejecting duplicate keys.
///
/// Each entry splits on its first unescaped `=`; a `\=` is part of the key,
/// not a separator. Keys are compared after unescaping, so entries that only
/// differ in escape syntax still collide. Output order is input order.
pub fn key_value_pairs(entries: &[String]) -> Result<Vec<PropertyPair>, DuplicateKeyError> {
    let mut pairs: Vec<PropertyPair> = Vec::with_capacity(entries.len());

    for (index, entry) in entries.iter().enumerate() {
        let (key, value) = match split_first_unescaped(entry) {
            Some((key, value)) => (key, value.to_string()),
            // No separator at all: the whole line is the key
            None => (unescape(entry), String::new()),
        };

        if pairs.iter().any(|p| p.key == key) {
            return Err(DuplicateKeyError { key, index });
        }

        pairs.push(PropertyPair { key, value });
    }

    Ok(pairs)
}

/// Flatten a nested configuration map into dotted-path pairs.
///
/// Keys at each level are joined with `.`. Scalar values render in their
/// canonical textual form, so a map that has been serialized to JSON and
/// parsed back flattens to the identical pair sequence. The result is sorted
/// lexicographically by flattened key, independent of map iteration order.
pub fn flatten_config(config: &serde_json::Value) -> Vec<PropertyPair> {
    let mut pairs = Vec::new();
    flatten_into(config, String::new(), &mut pairs);
    pairs.sort_by(|a, b| a.key.cmp(&b.key));
    pairs
}

fn flatten_into(value: &serde_json::Value, prefix: String, out: &mut Vec<PropertyPair>) {
    match value {
        serde_json::Value::Object(map) => {
            for (key, child) in map {
                let path = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{prefix}.{key}")
                };
                flatten_into(child, path, out);
            }
        }
        scalar => out.push(PropertyPair {
            key: prefix,
            value: render_scalar(scalar),
        }),
    }
}

fn render_scalar(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Bool(b) => b.to_string(),
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::Null => String::new(),
        // Arrays keep their compact JSON form
        other => other.to_string(),
    }
}

/// Render pairs as a `broker.properties` file body, one entry per line
pub fn render_properties(pairs: &[PropertyPair]) -> String {
    let mut body = String::new();
    for pair in pairs {
        body.push_str(&pair.key);
        body.push('=');
        body.push_str(&pair.value);
        body.push('\n');
    }
    body
}

/// Split at the first `=` not preceded by an odd run of backslashes,
/// returning the unescaped key and the raw value.
fn split_first_unescaped(raw: &str) -> Option<(String, &str)> {
    let bytes = raw.as_bytes();
    let mut backslashes = 0usize;

    for (i, &b) in bytes.iter().enumerate() {
        match b {
            b'\\' => backslashes += 1,
            b'=' => {
                if backslashes % 2 == 0 {
                    return Some((unescape(&raw[..i]), &raw[i + 1..]));
                }
                backslashes = 0;
            }
            _ => backslashes = 0,
        }
    }

    None
}

fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some(next) => out.push(next),
                None => out.push(c),
            }
        } else {
            out.push(c);
        }
    }
    out
}
