//! CLI Commands

use anyhow::{bail, Context, Result};
use lexis_state::{SetOptions, StateManager, StateProvider, StateSnapshot};
use serde_json::Value;
use std::fs;
use std::path::Path;

const CLI_SOURCE: &str = "cli";

/// Parse a command-line value as JSON; anything else becomes a string
pub fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

pub fn get(store: &StateManager, path: &str) -> Result<String> {
    match store.get(path) {
        Some(value) => Ok(serde_json::to_string_pretty(&value)?),
        None => bail!("Nothing stored at '{}'", path),
    }
}

pub fn set(store: &StateManager, path: &str, raw: &str, merge: bool) -> Result<String> {
    let options = if merge {
        SetOptions::merge()
    } else {
        SetOptions::default()
    };
    let changed = store.set_with(path, parse_value(raw), options.with_source(CLI_SOURCE))?;

    Ok(if changed {
        format!("Updated '{}'", path)
    } else {
        format!("'{}' unchanged", path)
    })
}

pub fn unset(store: &StateManager, path: &str) -> Result<String> {
    let changed = store.unset_with(path, SetOptions::default().with_source(CLI_SOURCE))?;

    Ok(if changed {
        format!("Removed '{}'", path)
    } else {
        format!("Nothing stored at '{}'", path)
    })
}

pub fn dump(store: &StateManager, info: bool) -> Result<String> {
    let output = if info {
        serde_json::to_string_pretty(&store.get_debug_info())?
    } else {
        serde_json::to_string_pretty(&store.state())?
    };
    Ok(output)
}

pub fn snapshot(store: &StateManager, output: &Path) -> Result<String> {
    let snapshot = store.snapshot();
    fs::write(output, snapshot.to_json()?)
        .with_context(|| format!("Failed to write {}", output.display()))?;

    Ok(format!(
        "Snapshot {} written to {} ({} top-level keys, {} history entries)",
        snapshot.id,
        output.display(),
        snapshot.len(),
        snapshot.history.len()
    ))
}

pub fn restore_snapshot(store: &StateManager, input: &Path) -> Result<String> {
    let raw = fs::read_to_string(input)
        .with_context(|| format!("Failed to read {}", input.display()))?;
    let snapshot = StateSnapshot::from_json(&raw)?;
    store.restore_snapshot(&snapshot)?;

    Ok(format!("Restored snapshot {} from {}", snapshot.id, input.display()))
}

/// Tear the store down and delete what it persisted
pub fn clear(store: &StateManager) -> Result<String> {
    store.destroy();
    store.clear_persisted()?;
    Ok("Cleared persisted state".to_string())
}
