//! Check command handler.

use std::path::Path;

use anyhow::{Context, Result};
use duplex_core::{DuplexSettings, load_settings};

/// Load `file` the way the engine would and print the effective settings.
///
/// Structural errors fail the command. Out-of-range tuning values are
/// clamped, logged, and reported as changed fields.
pub fn execute(file: &Path) -> Result<()> {
    let effective = load_settings(file)
        .with_context(|| format!("Settings file {} rejected", file.display()))?;

    let raw: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(file)?)?;
    let changed = clamped_fields(&raw, &effective)?;

    println!("{}", serde_json::to_string_pretty(&effective)?);
    if changed.is_empty() {
        eprintln!("{}: ok", file.display());
    } else {
        eprintln!("{}: ok, clamped {}", file.display(), changed.join(", "));
    }
    Ok(())
}

/// Dotted paths of values present in `raw` that differ after loading.
pub fn clamped_fields(raw: &serde_json::Value, effective: &DuplexSettings) -> Result<Vec<String>> {
    let effective = serde_json::to_value(effective)?;
    let mut changed = Vec::new();
    diff("", raw, &effective, &mut changed);
    Ok(changed)
}

fn diff(
    prefix: &str,
    raw: &serde_json::Value,
    effective: &serde_json::Value,
    out: &mut Vec<String>,
) {
    let serde_json::Value::Object(fields) = raw else {
        return;
    };
    for (key, value) in fields {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };
        let Some(after) = effective.get(key) else {
            continue;
        };
        if value.is_object() {
            diff(&path, value, after, out);
        } else if !same_value(value, after) {
            out.push(path);
        }
    }
}

/// Numbers compare by value so `600` and `600.0` match.
fn same_value(a: &serde_json::Value, b: &serde_json::Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => (x - y).abs() < 1e-6,
        _ => a == b,
    }
}
