//! Budgeted digests of step results for oracle requests.
//!
//! Tool results can be arbitrarily large; a remedy request carries a digest
//! of each prior step instead of the raw value.

use serde_json::{Map, Value, json};

/// Longest string kept verbatim inside a truncated digest.
const MAX_STRING_CHARS: usize = 256;

/// Array elements kept inside a truncated digest.
const MAX_ARRAY_ITEMS: usize = 5;

/// Produces a compact representation of one step result.
pub trait ResultSummarizer: Send + Sync {
    fn summarize(&self, step_id: &str, value: &Value) -> Value;
}

/// Keeps results whole when they fit `byte_budget` (serialized JSON bytes).
///
/// Larger objects keep `priority_fields` first, then the remaining fields in
/// key order while the budget allows. Long strings and arrays inside the
/// digest are shortened, and non-object values become a text `preview` cut
/// to the budget. Truncated digests carry `"_truncated": true` and
/// `"_original_size"`; only those two markers may exceed a tiny budget.
#[derive(Debug, Clone)]
pub struct BudgetSummarizer {
    pub byte_budget: usize,
    pub priority_fields: Vec<String>,
}

impl BudgetSummarizer {
    pub fn new(byte_budget: usize, priority_fields: Vec<String>) -> Self {
        Self {
            byte_budget,
            priority_fields,
        }
    }
}

fn encoded_len(value: &Value) -> usize {
    serde_json::to_string(value).map(|s| s.len()).unwrap_or(usize::MAX)
}

fn shorten_str(s: &str) -> String {
    if s.chars().count() <= MAX_STRING_CHARS {
        return s.to_string();
    }
    let mut out: String = s.chars().take(MAX_STRING_CHARS).collect();
    out.push_str("...");
    out
}

/// Longest prefix of `text` whose JSON string encoding, plus a trailing
/// `...`, stays within `max_bytes`.
fn cut_to_encoded(text: &str, max_bytes: usize) -> String {
    let Some(mut room) = max_bytes.checked_sub("\"...\"".len()) else {
        return String::new();
    };
    let mut out = String::new();
    for c in text.chars() {
        let width = encoded_len(&Value::String(c.to_string())) - 2;
        if width > room {
            break;
        }
        room -= width;
        out.push(c);
    }
    out.push_str("...");
    out
}

/// Serialized size of `digest` with `key: value` added.
fn len_with(digest: &Map<String, Value>, key: &str, value: &Value) -> usize {
    let base = encoded_len(&Value::Object(digest.clone()));
    // Quotes, colon, and a comma when the object is not empty.
    let separator = if digest.is_empty() { 0 } else { 1 };
    base + key.len() + 3 + separator + encoded_len(value)
}

/// Shrink nested strings and arrays without dropping object keys.
fn shrink(value: &Value) -> Value {
    match value {
        Value::String(s) => Value::String(shorten_str(s)),
        Value::Array(items) => {
            let mut kept: Vec<Value> = items.iter().take(MAX_ARRAY_ITEMS).map(shrink).collect();
            if items.len() > MAX_ARRAY_ITEMS {
                kept.push(json!(format!("... {} more", items.len() - MAX_ARRAY_ITEMS)));
            }
            Value::Array(kept)
        }
        Value::Object(map) => Value::Object(map.iter().map(|(k, v)| (k.clone(), shrink(v))).collect()),
        other => other.clone(),
    }
}

impl ResultSummarizer for BudgetSummarizer {
    fn summarize(&self, step_id: &str, value: &Value) -> Value {
        let original_size = encoded_len(value);
        if original_size <= self.byte_budget {
            return value.clone();
        }

        tracing::debug!(
            step_id,
            original_size,
            budget = self.byte_budget,
            "summarizing step result"
        );

        let mut digest = Map::new();
        digest.insert("_truncated".into(), Value::Bool(true));
        digest.insert("_original_size".into(), json!(original_size));

        let Value::Object(map) = value else {
            let shrunk = shrink(value);
            let preview = if len_with(&digest, "preview", &shrunk) <= self.byte_budget {
                shrunk
            } else {
                let room = self
                    .byte_budget
                    .saturating_sub(len_with(&digest, "preview", &Value::String(String::new())) - 2);
                let text = match &shrunk {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                Value::String(cut_to_encoded(&text, room))
            };
            digest.insert("preview".into(), preview);
            return Value::Object(digest);
        };

        let priority = self.priority_fields.iter().filter_map(|f| map.get(f).map(|v| (f, v)));
        let rest = map.iter().filter(|(k, _)| !self.priority_fields.contains(*k));
        for (key, v) in priority.chain(rest) {
            if digest.contains_key(key) {
                continue;
            }
            let candidate = shrink(v);
            if len_with(&digest, key, &candidate) > self.byte_budget {
                continue;
            }
            digest.insert(key.clone(), candidate);
        }

        Value::Object(digest)
    }
}
