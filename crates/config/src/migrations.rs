// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Versioned migrations for the integrations config.
//!
//! The app historically stored integrations settings as an unversioned
//! JSON object. To evolve the file safely over time, a small migration
//! layer upgrades older configs step by step to the latest schema
//! version.
//!
//! Design goals:
//! - backward compatible: old configs load without errors
//! - forward tolerant: unknown keys are preserved (and ignored by the
//!   schema)

use serde_json::{Map, Value};

pub const LATEST_SCHEMA_VERSION: u64 = 2;

/// Return a migrated copy of `raw`.
///
/// Non-object input yields an empty object (the schema fills defaults).
pub fn migrate(raw: &Value) -> Map<String, Value> {
    let Some(obj) = raw.as_object() else {
        return Map::new();
    };

    let mut data = obj.clone();
    let mut version = version_of(&data);

    // Step-by-step migrations so future versions stack cleanly.
    while version < LATEST_SCHEMA_VERSION {
        match version {
            0 => {
                data = migrate_v0_to_v1(data);
                version = 1;
            }
            1 => {
                data = migrate_v1_to_v2(data);
                version = 2;
            }
            _ => break,
        }
    }

    data.insert(
        "schema_version".to_string(),
        Value::Number(LATEST_SCHEMA_VERSION.into()),
    );
    data
}

fn version_of(data: &Map<String, Value>) -> u64 {
    match data.get("schema_version") {
        Some(Value::Number(n)) => n.as_u64().unwrap_or(0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0),
        _ => 0,
    }
}

/// Initial migration: introduce `schema_version` and normalize legacy
/// section names (the originals are kept to be safe).
fn migrate_v0_to_v1(mut data: Map<String, Value>) -> Map<String, Value> {
    if let Some(section) = data.get("segmentation_isolation").cloned() {
        data.entry("seg_isolation".to_string()).or_insert(section);
    }
    if let Some(section) = data.get("ultralytics").cloned() {
        data.entry("ultralytics_solutions".to_string()).or_insert(section);
    }
    data
}

/// Add the default jobs policy section.
fn migrate_v1_to_v2(mut data: Map<String, Value>) -> Map<String, Value> {
    data.entry("jobs".to_string())
        .or_insert(Value::Object(Map::new()));
    data
}

#[cfg(test)]
#[path = "migrations_tests.rs"]
mod tests;
