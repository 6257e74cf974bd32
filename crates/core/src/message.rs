use std::collections::BTreeMap;
use std::str::FromStr;

use serde::Serialize;
use tracing::warn;

/// Flat key/value configuration, keys namespaced like `battery/lowVoltage`.
pub type ConfigMap = BTreeMap<String, String>;

/// Reason attached to everything this station publishes.
pub const DEFAULT_REASON: &str = "send by yaha station";

// ---------------------------------------------------------------------------
// Outgoing broker message
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub topic: String,
    pub value: String,
    pub reason: String,
}

#[derive(Serialize)]
struct Reason<'a> {
    message: &'a str,
}

#[derive(Serialize)]
struct PublishBody<'a> {
    topic: &'a str,
    value: &'a str,
    reason: [Reason<'a>; 1],
}

impl Message {
    pub fn new(topic: impl Into<String>, value: impl ToString) -> Self {
        Self {
            topic: topic.into(),
            value: value.to_string(),
            reason: DEFAULT_REASON.to_string(),
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        self
    }

    /// Body understood by the yaha broker:
    /// `{"topic":…,"value":…,"reason":[{"message":…}]}`.
    pub fn to_publish_json(&self) -> String {
        let body = PublishBody {
            topic: &self.topic,
            value: &self.value,
            reason: [Reason {
                message: &self.reason,
            }],
        };
        // Serializing string fields into a String cannot fail.
        serde_json::to_string(&body).unwrap_or_default()
    }
}

/// `<base>/<suffix>`, tolerating a trailing slash on the base.
pub fn topic(base: &str, suffix: &str) -> String {
    format!("{}/{suffix}", base.trim_end_matches('/'))
}

// ---------------------------------------------------------------------------
// Config merging
// ---------------------------------------------------------------------------

/// Overwrite `target` with the parsed value of `key` if present.
///
/// A malformed value keeps the previous setting and is logged; returns
/// whether `target` was updated.
pub fn merge_parsed<T: FromStr>(config: &ConfigMap, key: &str, target: &mut T) -> bool {
    let Some(raw) = config.get(key) else {
        return false;
    };
    match raw.trim().parse::<T>() {
        Ok(v) => {
            *target = v;
            true
        }
        Err(_) => {
            warn!(key, value = %raw, "ignoring malformed config value");
            false
        }
    }
}

/// Copy a string setting; `keep_if_empty` keeps the old value on blank input
/// (password fields are posted empty when left untouched).
pub fn merge_string(config: &ConfigMap, key: &str, target: &mut String, keep_if_empty: bool) -> bool {
    match config.get(key) {
        Some(v) if keep_if_empty && v.is_empty() => false,
        Some(v) => {
            *target = v.clone();
            true
        }
        None => false,
    }
}

/// Checkbox semantics: `on` is true, anything else false.
pub fn merge_flag(config: &ConfigMap, key: &str, target: &mut bool) -> bool {
    match config.get(key) {
        Some(v) => {
            *target = v.eq_ignore_ascii_case("on") || v == "1" || v.eq_ignore_ascii_case("true");
            true
        }
        None => false,
    }
}

pub fn flag_value(on: bool) -> &'static str {
    if on {
        "on"
    } else {
        ""
    }
}

// ===========================================================================
// Tests
// ===========================================================================
