// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Typed view over the integrations config.
//!
//! Coercion is deliberately forgiving ("30" parses as 30, a bool is not a
//! number); out-of-range values clamp to their legal range instead of
//! failing the whole file.

use serde_json::{Map, Value};

use crate::migrations::LATEST_SCHEMA_VERSION;

/// Recognised top-level sections besides `schema_version` and `jobs`.
pub const SECTION_KEYS: [&str; 12] = [
    "albumentations",
    "comet",
    "dvc",
    "sagemaker",
    "kfold",
    "tuning",
    "model_export",
    "sahi",
    "seg_isolation",
    "model_validation",
    "ultralytics_solutions",
    "detection_output",
];

/// Default retry/timeout policy for background jobs.
///
/// Stored under the top-level key `jobs`. Values are applied as
/// defaults; specific actions may override them.
#[derive(Debug, Clone, PartialEq)]
pub struct JobsPolicy {
    pub default_timeout_sec: u64,
    pub retries: u32,
    pub retry_backoff_sec: f64,
    /// Fraction in [0, 1].
    pub retry_jitter: f64,
    /// 0 disables the absolute retry deadline.
    pub retry_deadline_sec: u64,
}

impl Default for JobsPolicy {
    fn default() -> Self {
        Self {
            default_timeout_sec: 900,
            retries: 0,
            retry_backoff_sec: 1.0,
            retry_jitter: 0.3,
            retry_deadline_sec: 0,
        }
    }
}

impl JobsPolicy {
    pub fn from_value(value: &Value) -> Self {
        let defaults = Self::default();
        let Some(map) = value.as_object() else {
            return defaults;
        };
        Self {
            default_timeout_sec: as_u64(map.get("default_timeout_sec"), defaults.default_timeout_sec),
            retries: as_u64(map.get("retries"), u64::from(defaults.retries)) as u32,
            retry_backoff_sec: as_f64(map.get("retry_backoff_sec"), defaults.retry_backoff_sec)
                .max(0.0),
            retry_jitter: as_f64(map.get("retry_jitter"), defaults.retry_jitter).clamp(0.0, 1.0),
            retry_deadline_sec: as_u64(map.get("retry_deadline_sec"), defaults.retry_deadline_sec),
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::json!({
            "default_timeout_sec": self.default_timeout_sec,
            "retries": self.retries,
            "retry_backoff_sec": self.retry_backoff_sec,
            "retry_jitter": self.retry_jitter,
            "retry_deadline_sec": self.retry_deadline_sec,
        })
    }
}

/// The full settings file: a typed jobs policy plus raw JSON sections.
#[derive(Debug, Clone, PartialEq)]
pub struct IntegrationsConfig {
    pub schema_version: u64,
    pub jobs: JobsPolicy,
    /// Recognised sections, kept as raw objects.
    pub sections: Map<String, Value>,
    /// Unrecognised top-level keys, preserved verbatim.
    pub extras: Map<String, Value>,
}

impl Default for IntegrationsConfig {
    fn default() -> Self {
        let mut sections = Map::new();
        for key in SECTION_KEYS {
            sections.insert(key.to_string(), Value::Object(Map::new()));
        }
        Self {
            schema_version: LATEST_SCHEMA_VERSION,
            jobs: JobsPolicy::default(),
            sections,
            extras: Map::new(),
        }
    }
}

impl IntegrationsConfig {
    pub fn from_value(value: &Value) -> Self {
        let Some(map) = value.as_object() else {
            return Self::default();
        };

        // Legacy layouts stored the policy under `jobs_policy`; read it
        // when `jobs` is absent and drop the old key on save.
        let jobs_value = map
            .get("jobs")
            .or_else(|| map.get("jobs_policy"))
            .cloned()
            .unwrap_or(Value::Object(Map::new()));

        let mut sections = Map::new();
        for key in SECTION_KEYS {
            let section = match map.get(key) {
                Some(Value::Object(section)) => Value::Object(section.clone()),
                _ => Value::Object(Map::new()),
            };
            sections.insert(key.to_string(), section);
        }

        let mut extras = Map::new();
        for (key, val) in map {
            let recognised = key == "schema_version"
                || key == "jobs"
                || key == "jobs_policy"
                || SECTION_KEYS.contains(&key.as_str());
            if !recognised {
                extras.insert(key.clone(), val.clone());
            }
        }

        Self {
            schema_version: LATEST_SCHEMA_VERSION,
            jobs: JobsPolicy::from_value(&jobs_value),
            sections,
            extras,
        }
    }

    pub fn to_value(&self) -> Value {
        let mut out = Map::new();
        out.insert(
            "schema_version".to_string(),
            Value::Number(self.schema_version.into()),
        );
        out.insert("jobs".to_string(), self.jobs.to_value());
        for (key, section) in &self.sections {
            out.insert(key.clone(), section.clone());
        }
        for (key, extra) in &self.extras {
            out.insert(key.clone(), extra.clone());
        }
        Value::Object(out)
    }
}

fn as_u64(value: Option<&Value>, default: u64) -> u64 {
    match value {
        Some(Value::Number(n)) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
            .unwrap_or(default),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(default),
        _ => default,
    }
}

fn as_f64(value: Option<&Value>, default: f64) -> f64 {
    match value {
        Some(Value::Number(n)) => n.as_f64().filter(|f| f.is_finite()).unwrap_or(default),
        Some(Value::String(s)) => s.trim().parse().ok().filter(|f: &f64| f.is_finite()).unwrap_or(default),
        _ => default,
    }
}

#[cfg(test)]
#[path = "schema_tests.rs"]
mod tests;
