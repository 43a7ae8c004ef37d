//! Tweets

use serde_json::Value;

use super::{i64_at, id_at, rfc3339_at, str_at, string_at, title_from};
use crate::data::Platform;
use crate::sync::item::{ItemPayload, RawPayload, TimelineItem};

pub(super) fn normalize(raw: &RawPayload) -> Vec<TimelineItem> {
    let author = string_at(&raw.data, "/username");
    let lookup = Lookup {
        users: raw.data.get("users"),
        referenced: raw.data.get("referenced"),
    };

    raw.data
        .get("tweets")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|tweet| {
            let id = id_at(tweet, "/id")?;
            let timestamp = rfc3339_at(tweet, "/created_at")?;
            let text = str_at(tweet, "/text").unwrap_or_default().to_string();

            let url = match author.as_deref() {
                Some(handle) => format!("https://twitter.com/{}/status/{}", handle, id),
                None => format!("https://twitter.com/i/web/status/{}", id),
            };

            Some(TimelineItem {
                id: format!("twitter:{}", id),
                platform: Platform::Twitter,
                timestamp,
                title: title_from(&text, 140),
                url: Some(url),
                payload: ItemPayload::Tweet {
                    author: author.clone(),
                    likes: i64_at(tweet, "/public_metrics/like_count").unwrap_or(0),
                    retweets: i64_at(tweet, "/public_metrics/retweet_count").unwrap_or(0),
                    replies: i64_at(tweet, "/public_metrics/reply_count").unwrap_or(0),
                    referenced_accounts: lookup.referenced_accounts(tweet, &text),
                    text,
                },
            })
        })
        .collect()
}

/// Expansion maps carried next to the tweets
struct Lookup<'a> {
    /// user id -> username
    users: Option<&'a Value>,
    /// referenced tweet id -> author id
    referenced: Option<&'a Value>,
}

impl Lookup<'_> {
    fn username(&self, user_id: &str) -> Option<String> {
        self.users
            .and_then(|users| users.get(user_id))
            .and_then(Value::as_str)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
    }

    /// Retweeted, quoted and replied-to handles, first occurrence order
    fn referenced_accounts(&self, tweet: &Value, text: &str) -> Vec<String> {
        let mut handles: Vec<String> = Vec::new();
        let mut push = |handle: String| {
            if !handles.iter().any(|h| h.eq_ignore_ascii_case(&handle)) {
                handles.push(handle);
            }
        };

        for reference in tweet
            .get("referenced_tweets")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
        {
            let author = id_at(reference, "/id")
                .and_then(|id| self.referenced.and_then(|map| map.get(&id)))
                .and_then(|author_id| id_at(author_id, ""))
                .and_then(|author_id| self.username(&author_id));
            if let Some(handle) = author {
                push(handle);
            }
        }

        if let Some(handle) =
            id_at(tweet, "/in_reply_to_user_id").and_then(|user_id| self.username(&user_id))
        {
            push(handle);
        }

        // Retweets whose expansion is missing still name the source
        if let Some(handle) = retweet_source(text) {
            push(handle);
        }

        handles
    }
}

fn retweet_source(text: &str) -> Option<String> {
    let rest = text.strip_prefix("RT @")?;
    let handle: String = rest
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect();
    (!handle.is_empty()).then_some(handle)
}
