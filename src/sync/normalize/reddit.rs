//! Reddit submissions and comments

use serde_json::Value;

use super::{i64_at, id_at, str_at, string_at, title_from, unix_at};
use crate::data::Platform;
use crate::sync::item::{ItemPayload, RawPayload, TimelineItem};

const WEB_BASE: &str = "https://www.reddit.com";

pub(super) fn normalize(raw: &RawPayload) -> Vec<TimelineItem> {
    let posts = raw
        .data
        .get("posts")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(post);
    let comments = raw
        .data
        .get("comments")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(comment);

    posts.chain(comments).collect()
}

fn subreddit(entry: &Value) -> String {
    str_at(entry, "/subreddit")
        .map(|s| s.trim_start_matches("r/").to_string())
        .unwrap_or_default()
}

fn permalink(entry: &Value) -> Option<String> {
    str_at(entry, "/permalink").map(|p| {
        if p.starts_with("http") {
            p.to_string()
        } else {
            format!("{}{}", WEB_BASE, p)
        }
    })
}

fn post(entry: &Value) -> Option<TimelineItem> {
    let id = id_at(entry, "/id")?;
    let timestamp = unix_at(entry, "/created_utc")?;
    let subreddit = subreddit(entry);

    Some(TimelineItem {
        id: format!("reddit:post:{}", id),
        platform: Platform::Reddit,
        timestamp,
        title: str_at(entry, "/title")
            .map(|t| title_from(t, 200))
            .unwrap_or_else(|| format!("Post in r/{}", subreddit)),
        url: permalink(entry).or_else(|| string_at(entry, "/url")),
        payload: ItemPayload::Post {
            subreddit,
            author: string_at(entry, "/author"),
            score: i64_at(entry, "/score").unwrap_or(0),
            comment_count: i64_at(entry, "/num_comments").unwrap_or(0),
            content: string_at(entry, "/selftext"),
        },
    })
}

fn comment(entry: &Value) -> Option<TimelineItem> {
    let id = id_at(entry, "/id")?;
    let timestamp = unix_at(entry, "/created_utc")?;
    let subreddit = subreddit(entry);
    let body = str_at(entry, "/body").unwrap_or_default().to_string();
    let parent_title = string_at(entry, "/link_title");

    let title = match parent_title.as_deref() {
        Some(parent) => format!("Commented on \"{}\"", title_from(parent, 120)),
        None => format!("Commented in r/{}", subreddit),
    };

    Some(TimelineItem {
        id: format!("reddit:comment:{}", id),
        platform: Platform::Reddit,
        timestamp,
        title,
        url: permalink(entry),
        payload: ItemPayload::Comment {
            subreddit,
            author: string_at(entry, "/author"),
            score: i64_at(entry, "/score").unwrap_or(0),
            body,
            parent_title,
        },
    })
}
