//! YouTube videos

use serde_json::Value;

use super::{rfc3339_at, str_at, string_at, title_from};
use crate::data::Platform;
use crate::sync::item::{ItemPayload, RawPayload, TimelineItem};

pub(super) fn normalize(raw: &RawPayload) -> Vec<TimelineItem> {
    raw.data
        .get("videos")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|video| {
            // search results nest the id; videos.list results do not
            let video_id = str_at(video, "/id/videoId").or_else(|| str_at(video, "/id"))?;
            let timestamp = rfc3339_at(video, "/snippet/publishedAt")?;
            let thumbnail_url = ["high", "medium", "default"]
                .iter()
                .find_map(|size| string_at(video, &format!("/snippet/thumbnails/{}/url", size)));

            Some(TimelineItem {
                id: format!("youtube:{}", video_id),
                platform: Platform::Youtube,
                timestamp,
                title: str_at(video, "/snippet/title")
                    .map(|t| title_from(t, 200))
                    .unwrap_or_else(|| "Untitled video".to_string()),
                url: Some(format!("https://www.youtube.com/watch?v={}", video_id)),
                payload: ItemPayload::Video {
                    channel: string_at(video, "/snippet/channelTitle"),
                    description: string_at(video, "/snippet/description"),
                    thumbnail_url,
                },
            })
        })
        .collect()
}
