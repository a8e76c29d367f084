// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Child→parent message protocol.
//!
//! The worker child writes one JSON object per line on its stdout. The
//! parent is the sole authority on the schema: any deviation — unknown
//! kind, wrong shape, non-numeric or non-finite progress — is a fatal
//! supervisor error, because a child that cannot speak the protocol
//! cannot be trusted to report results either.

use serde::{Deserialize, Serialize};

/// Message sent by the worker child over its stdout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChildMessage {
    Progress {
        value: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    Log {
        line: String,
    },
    Result {
        value: serde_json::Value,
    },
    Error {
        message: String,
    },
    Cancelled {
        reason: String,
    },
}

impl ChildMessage {
    /// One-line JSON encoding, newline not included.
    pub fn encode(&self) -> Option<String> {
        match serde_json::to_string(self) {
            Ok(line) => Some(line),
            Err(e) => {
                tracing::warn!(error = %e, "failed to encode child message");
                None
            }
        }
    }
}

fn keys_are_exactly(obj: &serde_json::Map<String, serde_json::Value>, allowed: &[&str]) -> bool {
    obj.len() <= allowed.len() && obj.keys().all(|k| allowed.contains(&k.as_str()))
}

/// Parse and validate one protocol line.
///
/// Returns the fatal error text on any deviation from the schema.
pub fn parse_line(line: &str) -> Result<ChildMessage, String> {
    let value: serde_json::Value = serde_json::from_str(line)
        .map_err(|_| format!("Malformed child message: {line:?}"))?;
    let Some(obj) = value.as_object() else {
        return Err(format!("Malformed child message: {line:?}"));
    };
    let Some(kind) = obj.get("kind").and_then(serde_json::Value::as_str) else {
        return Err(format!("Malformed child message kind: {line:?}"));
    };

    match kind {
        "progress" => {
            if !keys_are_exactly(obj, &["kind", "value", "message"]) {
                return Err(format!("Malformed child progress message: {line:?}"));
            }
            let Some(value) = obj.get("value").and_then(serde_json::Value::as_f64) else {
                return Err(format!("Malformed child progress payload: {line:?}"));
            };
            if !value.is_finite() {
                return Err(format!("Malformed child progress payload: {line:?}"));
            }
            let message = match obj.get("message") {
                None | Some(serde_json::Value::Null) => None,
                Some(serde_json::Value::String(s)) => Some(s.clone()),
                Some(_) => return Err(format!("Malformed child progress payload: {line:?}")),
            };
            Ok(ChildMessage::Progress { value, message })
        }
        "log" => match obj.get("line").and_then(serde_json::Value::as_str) {
            Some(text) if keys_are_exactly(obj, &["kind", "line"]) => {
                Ok(ChildMessage::Log { line: text.to_string() })
            }
            _ => Err(format!("Malformed child log message: {line:?}")),
        },
        "result" => match obj.get("value") {
            Some(value) if keys_are_exactly(obj, &["kind", "value"]) => {
                Ok(ChildMessage::Result { value: value.clone() })
            }
            _ => Err(format!("Malformed child result message: {line:?}")),
        },
        "error" => match obj.get("message").and_then(serde_json::Value::as_str) {
            Some(message) if keys_are_exactly(obj, &["kind", "message"]) => {
                Ok(ChildMessage::Error { message: message.to_string() })
            }
            _ => Err(format!("Malformed child error message: {line:?}")),
        },
        "cancelled" => match obj.get("reason").and_then(serde_json::Value::as_str) {
            Some(reason) if keys_are_exactly(obj, &["kind", "reason"]) => {
                Ok(ChildMessage::Cancelled { reason: reason.to_string() })
            }
            _ => Err(format!("Malformed child cancelled message: {line:?}")),
        },
        other => Err(format!("Unknown child message kind: {other:?}")),
    }
}

#[cfg(test)]
#[path = "proto_tests.rs"]
mod tests;
