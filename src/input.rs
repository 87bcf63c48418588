//! Parsing of JSON command-line arguments.
//!
//! Any JSON argument may be given inline or as `@path` to read it from a
//! file, which is the practical way to pass a 1536-dimension embedding.

use anyhow::{bail, Context, Result};
use serde_json::Value;

/// Parse an inline JSON string or the contents of `@file`.
pub fn parse_json_arg(arg: &str, what: &str) -> Result<Value> {
    let raw = match arg.strip_prefix('@') {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {} file: {}", what, path))?,
        None => arg.to_string(),
    };
    serde_json::from_str(&raw).with_context(|| format!("{} is not valid JSON", what))
}

/// Parse an embedding given as a JSON array of numbers.
pub fn parse_embedding(arg: &str) -> Result<Vec<f32>> {
    let value = parse_json_arg(arg, "embedding")?;
    let Value::Array(items) = value else {
        bail!("embedding must be a JSON array of numbers");
    };
    items
        .iter()
        .enumerate()
        .map(|(i, v)| match v.as_f64() {
            Some(x) => Ok(x as f32),
            None => bail!("embedding component {} is not a number: {}", i, v),
        })
        .collect()
}

/// Parse an optional JSON object argument; absent means `{}`.
pub fn parse_object_arg(arg: Option<&str>, what: &str) -> Result<serde_json::Map<String, Value>> {
    match arg {
        None => Ok(serde_json::Map::new()),
        Some(raw) => match parse_json_arg(raw, what)? {
            Value::Object(map) => Ok(map),
            other => bail!("{} must be a JSON object, got {}", what, other),
        },
    }
}
