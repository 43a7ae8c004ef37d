//! Task tracker entries

use serde_json::Value;

use super::{id_at, rfc3339_at, str_at, string_at, title_from};
use crate::data::Platform;
use crate::sync::item::{ItemPayload, RawPayload, TaskPriority, TaskStatus, TimelineItem};

pub(super) fn normalize(raw: &RawPayload) -> Vec<TimelineItem> {
    raw.data
        .get("tasks")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|task| {
            let id = id_at(task, "/id")?;
            let timestamp =
                rfc3339_at(task, "/updated_at").or_else(|| rfc3339_at(task, "/created_at"))?;

            Some(TimelineItem {
                id: format!("tasks:{}", id),
                platform: Platform::Tasks,
                timestamp,
                title: str_at(task, "/title")
                    .map(|t| title_from(t, 200))
                    .unwrap_or_else(|| "Untitled task".to_string()),
                url: None,
                payload: ItemPayload::Task {
                    project: string_at(task, "/project"),
                    status: status(str_at(task, "/status")),
                    priority: priority(str_at(task, "/priority")),
                    description: string_at(task, "/description"),
                },
            })
        })
        .collect()
}

fn normalized_label(value: &str) -> String {
    value.trim().to_ascii_lowercase().replace([' ', '-'], "_")
}

/// Map tracker status labels onto the canonical set
pub(crate) fn status(value: Option<&str>) -> TaskStatus {
    match value.map(normalized_label).as_deref() {
        Some("todo" | "open" | "backlog" | "pending") => TaskStatus::Todo,
        Some("in_progress" | "doing" | "started" | "active") => TaskStatus::InProgress,
        Some("done" | "completed" | "complete" | "closed") => TaskStatus::Done,
        _ => TaskStatus::Unknown,
    }
}

/// Map tracker priority labels onto the canonical set
pub(crate) fn priority(value: Option<&str>) -> TaskPriority {
    match value.map(normalized_label).as_deref() {
        Some("low" | "minor") => TaskPriority::Low,
        Some("medium" | "normal") => TaskPriority::Medium,
        Some("high" | "urgent" | "critical") => TaskPriority::High,
        _ => TaskPriority::Unknown,
    }
}
