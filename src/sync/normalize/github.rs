//! GitHub events

use serde_json::Value;

use super::{first_line, i64_at, id_at, rfc3339_at, str_at, string_at, title_from};
use crate::data::Platform;
use crate::sync::item::{CommitRef, ItemPayload, RawPayload, TimelineItem};

const WEB_BASE: &str = "https://github.com";

pub(super) fn normalize(raw: &RawPayload) -> Vec<TimelineItem> {
    let events = raw
        .data
        .get("events")
        .and_then(Value::as_array)
        .or_else(|| raw.data.as_array());

    events
        .into_iter()
        .flatten()
        .filter_map(|event| match str_at(event, "/type") {
            Some("PushEvent") => push(event),
            Some("PullRequestEvent") => pull_request(event),
            Some("IssuesEvent") => issue(event),
            _ => None,
        })
        .collect()
}

/// Common envelope: id, repo and timestamp
fn envelope(event: &Value) -> Option<(String, String, chrono::DateTime<chrono::Utc>)> {
    let id = id_at(event, "/id")?;
    let repo = string_at(event, "/repo/name")?;
    let timestamp = rfc3339_at(event, "/created_at")?;
    Some((id, repo, timestamp))
}

/// A push with N commits becomes one item carrying the count
fn push(event: &Value) -> Option<TimelineItem> {
    let (id, repo, timestamp) = envelope(event)?;

    let commits: Vec<CommitRef> = event
        .pointer("/payload/commits")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|commit| {
            Some(CommitRef {
                sha: string_at(commit, "/sha"),
                message: first_line(str_at(commit, "/message")?),
            })
        })
        .collect();

    let reported = i64_at(event, "/payload/size")
        .or_else(|| i64_at(event, "/payload/distinct_size"))
        .unwrap_or(0)
        .max(0) as usize;
    let commit_count = reported.max(commits.len()) as u32;
    if commit_count == 0 {
        return None;
    }

    let branch = str_at(event, "/payload/ref").map(|r| {
        r.strip_prefix("refs/heads/")
            .unwrap_or(r)
            .to_string()
    });

    let title = match (commit_count, commits.first()) {
        (1, Some(commit)) => title_from(&commit.message, 120),
        _ => format!("Pushed {} commits to {}", commit_count, repo),
    };

    let url = match str_at(event, "/payload/head") {
        Some(head) if commit_count == 1 => format!("{}/{}/commit/{}", WEB_BASE, repo, head),
        _ => match (str_at(event, "/payload/before"), str_at(event, "/payload/head")) {
            (Some(before), Some(head)) => {
                format!("{}/{}/compare/{}...{}", WEB_BASE, repo, before, head)
            }
            _ => format!("{}/{}", WEB_BASE, repo),
        },
    };

    Some(TimelineItem {
        id: format!("github:push:{}", id),
        platform: Platform::Github,
        timestamp,
        title,
        url: Some(url),
        payload: ItemPayload::Commit {
            repo,
            branch,
            commit_count,
            commits,
        },
    })
}

fn pull_request(event: &Value) -> Option<TimelineItem> {
    let (id, repo, timestamp) = envelope(event)?;
    let number = i64_at(event, "/payload/pull_request/number")
        .or_else(|| i64_at(event, "/payload/number"))
        .and_then(|n| u64::try_from(n).ok());
    let action = string_at(event, "/payload/action");
    let merged = event
        .pointer("/payload/pull_request/merged")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    let title = str_at(event, "/payload/pull_request/title")
        .map(|t| title_from(t, 120))
        .unwrap_or_else(|| match number {
            Some(n) => format!("Pull request #{} in {}", n, repo),
            None => format!("Pull request in {}", repo),
        });

    Some(TimelineItem {
        id: format!("github:pr:{}", id),
        platform: Platform::Github,
        timestamp,
        title,
        url: string_at(event, "/payload/pull_request/html_url"),
        payload: ItemPayload::PullRequest {
            repo,
            number,
            action,
            state: string_at(event, "/payload/pull_request/state"),
            merged,
        },
    })
}

fn issue(event: &Value) -> Option<TimelineItem> {
    let (id, repo, timestamp) = envelope(event)?;
    let number = i64_at(event, "/payload/issue/number").and_then(|n| u64::try_from(n).ok());

    let title = str_at(event, "/payload/issue/title")
        .map(|t| title_from(t, 120))
        .unwrap_or_else(|| format!("Issue in {}", repo));

    Some(TimelineItem {
        id: format!("github:issue:{}", id),
        platform: Platform::Github,
        timestamp,
        title,
        url: string_at(event, "/payload/issue/html_url"),
        payload: ItemPayload::Issue {
            repo,
            number,
            action: string_at(event, "/payload/action"),
        },
    })
}
