use super::types::OrchestrationEventRecord;
use serde::{Deserialize, Serialize};
use serde_json::Value;

const REDACTED: &str = "[REDACTED]";
const SECRET_KEY_FRAGMENTS: [&str; 5] = ["secret", "password", "token", "private_key", "credential"];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RedactMode {
    #[default]
    Default,
    Off,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedactOptions {
    #[serde(default)]
    pub mode: RedactMode,
    /// Dotted path globs left untouched; `*` matches one segment, `**` any number.
    #[serde(default)]
    pub allow_path_patterns: Vec<String>,
}

/// Masks secret-looking fields inside the event data of a record.
pub fn redact_event_record(record: &OrchestrationEventRecord, options: &RedactOptions) -> OrchestrationEventRecord {
    if options.mode == RedactMode::Off {
        return record.clone();
    }
    let mut redacted = record.clone();
    let mut data = Value::Object(std::mem::take(&mut redacted.event.data));
    redact_value(&mut data, options);
    if let Value::Object(data) = data {
        redacted.event.data = data;
    }
    redacted
}

pub fn redact_value(value: &mut Value, options: &RedactOptions) {
    if options.mode == RedactMode::Off {
        return;
    }
    walk(value, &mut Vec::new(), &options.allow_path_patterns);
}

fn walk(value: &mut Value, path: &mut Vec<String>, allowed: &[String]) {
    if is_allowed(path, allowed) {
        return;
    }
    match value {
        Value::Object(object) => {
            for (key, child) in object.iter_mut() {
                path.push(key.clone());
                if !is_allowed(path, allowed) {
                    if is_secret_key(key) {
                        *child = Value::String(REDACTED.to_string());
                    } else {
                        walk(child, path, allowed);
                    }
                }
                path.pop();
            }
        }
        Value::Array(items) => {
            for (index, item) in items.iter_mut().enumerate() {
                path.push(index.to_string());
                walk(item, path, allowed);
                path.pop();
            }
        }
        Value::String(text) => {
            if text.to_lowercase().contains("-----begin") {
                *text = REDACTED.to_string();
            }
        }
        _ => {}
    }
}

fn is_secret_key(key: &str) -> bool {
    let lower = key.to_lowercase();
    SECRET_KEY_FRAGMENTS
        .iter()
        .any(|fragment| lower.contains(fragment))
}

fn is_allowed(path: &[String], patterns: &[String]) -> bool {
    patterns.iter().any(|pattern| {
        let segments = pattern
            .split('.')
            .filter(|segment| !segment.is_empty())
            .collect::<Vec<_>>();
        match_segments(path, &segments)
    })
}

fn match_segments(path: &[String], pattern: &[&str]) -> bool {
    let Some((head, rest)) = pattern.split_first() else {
        return path.is_empty();
    };
    match *head {
        "**" => (0..=path.len()).any(|skip| match_segments(&path[skip..], rest)),
        "*" => !path.is_empty() && match_segments(&path[1..], rest),
        expected => path.first().is_some_and(|segment| segment == expected) && match_segments(&path[1..], rest),
    }
}

#[cfg(test)]
#[path = "redact_test.rs"]
mod tests;
