// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Load/save for the integrations config file.
//!
//! Every read and write passes through the migrator and the typed
//! schema, so callers only ever see a fully-normalized, current-version
//! object.

use crate::migrations::migrate;
use crate::schema::IntegrationsConfig;
use serde_json::Value;
use std::fs;
use std::io;
use std::path::Path;

/// Default integrations config (all sections present).
pub fn default_config() -> Value {
    IntegrationsConfig::default().to_value()
}

/// Normalize a raw config value through migrations and the schema.
pub fn normalize(raw: &Value) -> Value {
    if !raw.is_object() {
        return default_config();
    }
    let migrated = Value::Object(migrate(raw));
    IntegrationsConfig::from_value(&migrated).to_value()
}

/// Load the config from a JSON file; defaults when missing or invalid.
pub fn load_config(path: &Path) -> Value {
    let Ok(content) = fs::read_to_string(path) else {
        return default_config();
    };
    match serde_json::from_str::<Value>(&content) {
        Ok(raw) => normalize(&raw),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "invalid integrations config; using defaults");
            default_config()
        }
    }
}

/// Save the config, normalized, creating parent directories as needed.
pub fn save_config(path: &Path, config: &Value) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let normalized = normalize(config);
    let body = serde_json::to_string_pretty(&normalized)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    fs::write(path, body)
}

/// Import a config from a user-chosen file, merged with defaults so the
/// structure is always valid.
pub fn import_config(path: &Path) -> Value {
    load_config(path)
}

/// Export the full normalized config to a user-chosen path (e.g. backup).
pub fn export_config(path: &Path, config: &Value) -> io::Result<()> {
    save_config(path, config)
}

#[cfg(test)]
#[path = "file_tests.rs"]
mod tests;
