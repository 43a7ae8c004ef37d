//! Payload normalization
//!
//! Pure, total functions from a [`RawPayload`] to canonical items. Missing
//! or malformed fields degrade to `None`/defaults; entries without an
//! upstream id are dropped since no stable id can be derived for them.
//! Output is sorted in timeline order.

mod github;
mod reddit;
mod tasks;
mod twitter;
mod youtube;

use chrono::{DateTime, Utc};
use serde_json::Value;

use super::item::{RawPayload, TimelineItem, sort_items};
use crate::data::Platform;

/// Normalize a raw payload into timeline items
pub fn normalize(raw: &RawPayload) -> Vec<TimelineItem> {
    let mut items = match raw.platform {
        Platform::Github => github::normalize(raw),
        Platform::Reddit => reddit::normalize(raw),
        Platform::Twitter => twitter::normalize(raw),
        Platform::Youtube => youtube::normalize(raw),
        Platform::Tasks => tasks::normalize(raw),
    };
    sort_items(&mut items);
    items
}

// =============================================================================
// Field helpers
// =============================================================================

/// String at a JSON pointer, ignoring empty strings
fn str_at<'a>(value: &'a Value, pointer: &str) -> Option<&'a str> {
    value
        .pointer(pointer)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
}

fn string_at(value: &Value, pointer: &str) -> Option<String> {
    str_at(value, pointer).map(str::to_string)
}

/// Integer at a JSON pointer; numeric strings are accepted
fn i64_at(value: &Value, pointer: &str) -> Option<i64> {
    match value.pointer(pointer)? {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Upstream id as a string, whether it was sent as a number or a string
fn id_at(value: &Value, pointer: &str) -> Option<String> {
    match value.pointer(pointer)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// RFC 3339 timestamp at a JSON pointer
fn rfc3339_at(value: &Value, pointer: &str) -> Option<DateTime<Utc>> {
    str_at(value, pointer)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

/// Unix-seconds timestamp (possibly fractional) at a JSON pointer
fn unix_at(value: &Value, pointer: &str) -> Option<DateTime<Utc>> {
    let seconds = value.pointer(pointer)?.as_f64()?;
    if !seconds.is_finite() {
        return None;
    }
    DateTime::<Utc>::from_timestamp(seconds.trunc() as i64, 0)
}

/// First line of a message, trimmed
fn first_line(text: &str) -> String {
    text.lines().next().unwrap_or_default().trim().to_string()
}

/// Shorten a text for use as a title
fn title_from(text: &str, max_chars: usize) -> String {
    let line = first_line(text);
    if line.chars().count() <= max_chars {
        return line;
    }
    let cut: String = line.chars().take(max_chars).collect();
    format!("{}…", cut.trim_end())
}
