use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, info};

use crate::fingerprint;
use crate::types::{Media, MediaKind, PlatformType, Post, SourceError};

use super::{SharedHttp, Source};

const WALL_GET_URL: &str = "https://api.vk.com/method/wall.get";

/// Collector for VK communities via the `wall.get` API method.
///
/// `wall.get` returns posts newest first with one exception: a pinned post is
/// listed first no matter how old it is. The cutoff therefore filters every
/// item instead of stopping at the first old one, otherwise a stale pinned
/// post would hide everything behind it.
pub struct VkSource {
    domain: String,
    access_token: String,
    api_version: String,
    http: Arc<SharedHttp>,
}

impl VkSource {
    pub fn new(
        domain: String,
        access_token: String,
        api_version: String,
        http: Arc<SharedHttp>,
    ) -> Self {
        Self {
            domain,
            access_token,
            api_version,
            http,
        }
    }
}

#[async_trait]
impl Source for VkSource {
    fn platform(&self) -> PlatformType {
        PlatformType::Vk
    }

    fn source_id(&self) -> &str {
        &self.domain
    }

    async fn fetch(
        &self,
        limit: usize,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Post>, SourceError> {
        let client = self.http.client()?;
        let count = limit.min(100).to_string();
        debug!("Fetching vk.com/{} wall", self.domain);

        let envelope: WallGetEnvelope = client
            .get(WALL_GET_URL)
            .query(&[
                ("domain", self.domain.as_str()),
                ("count", count.as_str()),
                ("filter", "owner"),
                ("v", self.api_version.as_str()),
                ("access_token", self.access_token.as_str()),
            ])
            .send()
            .await?
            .json()
            .await?;

        if let Some(error) = envelope.error {
            return Err(SourceError::Api {
                platform: PlatformType::Vk,
                code: error.error_code,
                message: error.error_msg,
            });
        }

        let items = envelope.response.map(|r| r.items).unwrap_or_default();
        let posts = filter_items(&self.domain, &items, limit, since);
        info!("Collected {} posts from vk.com/{}", posts.len(), self.domain);
        Ok(posts)
    }
}

fn filter_items(
    domain: &str,
    items: &[WallPost],
    limit: usize,
    since: Option<DateTime<Utc>>,
) -> Vec<Post> {
    let mut posts = Vec::new();
    for item in items {
        let post = match parse_wall_post(domain, item) {
            Some(post) => post,
            None => continue,
        };
        if let Some(since) = since {
            // a pinned post sorts first regardless of age; keep scanning
            if post.created_at < since {
                continue;
            }
        }
        posts.push(post);
        if posts.len() >= limit {
            break;
        }
    }
    posts
}

fn parse_wall_post(domain: &str, item: &WallPost) -> Option<Post> {
    let created_at = DateTime::from_timestamp(item.date, 0)?;
    let text = fingerprint::sanitize_text(Some(&item.text));
    let media = collect_attachments(&item.attachments);

    if text.is_none() && media.is_empty() {
        return None;
    }

    let media_urls: Vec<String> = media.iter().map(|m| m.url.clone()).collect();
    let content_hash = fingerprint::content_hash(text.as_deref(), &media_urls);
    let post_id = item.id.to_string();

    Some(Post {
        platform: PlatformType::Vk,
        source_id: domain.to_string(),
        post_id: post_id.clone(),
        text,
        media,
        url: format!("https://vk.com/wall{}_{}", item.owner_id, post_id),
        author: None,
        created_at,
        views: item.views.as_ref().map(|v| v.count),
        content_hash,
    })
}

fn collect_attachments(attachments: &[WallAttachment]) -> Vec<Media> {
    let mut media = Vec::new();
    for attachment in attachments {
        match attachment.kind.as_str() {
            "photo" => {
                if let Some(photo) = &attachment.photo {
                    if let Some(largest) = photo
                        .sizes
                        .iter()
                        .max_by_key(|size| size.width.unwrap_or(0))
                    {
                        if !largest.url.is_empty() {
                            media.push(Media {
                                kind: MediaKind::Photo,
                                url: largest.url.clone(),
                                width: largest.width,
                                height: largest.height,
                                duration: None,
                            });
                        }
                    }
                }
            }
            "video" => {
                if let Some(video) = &attachment.video {
                    if let (Some(id), Some(owner)) = (video.id, video.owner_id) {
                        media.push(Media {
                            kind: MediaKind::Video,
                            url: format!("https://vk.com/video{}_{}", owner, id),
                            width: video.width,
                            height: video.height,
                            duration: video.duration,
                        });
                    }
                }
            }
            // other attachment kinds are not mirrored
            _ => {}
        }
    }
    media
}

#[derive(Debug, Deserialize)]
struct WallGetEnvelope {
    response: Option<WallGetResponse>,
    error: Option<VkApiError>,
}

#[derive(Debug, Deserialize)]
struct WallGetResponse {
    #[serde(default)]
    items: Vec<WallPost>,
}

#[derive(Debug, Deserialize)]
struct VkApiError {
    error_code: i64,
    error_msg: String,
}

#[derive(Debug, Deserialize)]
struct WallPost {
    id: i64,
    owner_id: i64,
    date: i64,
    #[serde(default)]
    text: String,
    #[serde(default)]
    attachments: Vec<WallAttachment>,
    views: Option<ViewsInfo>,
}

#[derive(Debug, Deserialize)]
struct WallAttachment {
    #[serde(rename = "type")]
    kind: String,
    photo: Option<PhotoAttachment>,
    video: Option<VideoAttachment>,
}

#[derive(Debug, Deserialize)]
struct PhotoAttachment {
    #[serde(default)]
    sizes: Vec<PhotoSize>,
}

#[derive(Debug, Deserialize)]
struct PhotoSize {
    url: String,
    width: Option<i64>,
    height: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct VideoAttachment {
    id: Option<i64>,
    owner_id: Option<i64>,
    width: Option<i64>,
    height: Option<i64>,
    duration: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct ViewsInfo {
    count: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn wall_post(value: serde_json::Value) -> WallPost {
        serde_json::from_value(value).expect("fixture should deserialize")
    }

    #[test]
    fn parses_text_photo_and_video_attachments() {
        let item = wall_post(json!({
            "id": 42,
            "owner_id": -123,
            "date": 5000,
            "text": "Big   announcement",
            "views": { "count": 777 },
            "attachments": [
                {
                    "type": "photo",
                    "photo": {
                        "sizes": [
                            { "url": "https://img/s.jpg", "width": 130, "height": 87 },
                            { "url": "https://img/x.jpg", "width": 1280, "height": 853 },
                            { "url": "https://img/m.jpg", "width": 604, "height": 403 }
                        ]
                    }
                },
                {
                    "type": "video",
                    "video": { "id": 9, "owner_id": -123, "width": 1920, "height": 1080, "duration": 61 }
                },
                { "type": "doc" }
            ]
        }));

        let post = parse_wall_post("some_group", &item).expect("post should parse");
        assert_eq!(post.platform, PlatformType::Vk);
        assert_eq!(post.source_id, "some_group");
        assert_eq!(post.post_id, "42");
        assert_eq!(post.url, "https://vk.com/wall-123_42");
        assert_eq!(post.text.as_deref(), Some("Big   announcement"));
        assert_eq!(post.views, Some(777));
        assert_eq!(post.created_at, DateTime::from_timestamp(5000, 0).unwrap());

        assert_eq!(post.media.len(), 2);
        assert_eq!(post.media[0].kind, MediaKind::Photo);
        assert_eq!(post.media[0].url, "https://img/x.jpg");
        assert_eq!(post.media[0].width, Some(1280));
        assert_eq!(post.media[1].kind, MediaKind::Video);
        assert_eq!(post.media[1].url, "https://vk.com/video-123_9");
        assert_eq!(post.media[1].duration, Some(61));
        assert!(post.content_hash.is_some());
    }

    #[test]
    fn skips_posts_with_nothing_to_mirror() {
        let item = wall_post(json!({ "id": 1, "owner_id": -5, "date": 100, "text": "   " }));
        assert!(parse_wall_post("g", &item).is_none());
    }

    #[test]
    fn an_old_pinned_post_does_not_hide_newer_ones() {
        let items = vec![
            // pinned and ancient, listed first by the api
            wall_post(json!({ "id": 1, "owner_id": -5, "date": 100, "text": "pinned" })),
            wall_post(json!({ "id": 3, "owner_id": -5, "date": 5000, "text": "fresh" })),
            wall_post(json!({ "id": 2, "owner_id": -5, "date": 3000, "text": "stale" })),
        ];
        let since = DateTime::from_timestamp(4000, 0);

        let posts = filter_items("g", &items, 10, since);
        let ids: Vec<&str> = posts.iter().map(|p| p.post_id.as_str()).collect();
        assert_eq!(ids, ["3"]);
    }

    #[test]
    fn without_a_cutoff_everything_parseable_is_kept() {
        let items = vec![
            wall_post(json!({ "id": 1, "owner_id": -5, "date": 100, "text": "pinned" })),
            wall_post(json!({ "id": 2, "owner_id": -5, "date": 3000, "text": "" })),
            wall_post(json!({ "id": 3, "owner_id": -5, "date": 5000, "text": "fresh" })),
        ];
        let posts = filter_items("g", &items, 10, None);
        let ids: Vec<&str> = posts.iter().map(|p| p.post_id.as_str()).collect();
        // id 2 has no text and no media, so only the other two survive
        assert_eq!(ids, ["1", "3"]);
    }

    #[test]
    fn error_envelope_decodes() {
        let envelope: WallGetEnvelope = serde_json::from_str(
            r#"{ "error": { "error_code": 15, "error_msg": "Access denied: wall is disabled" } }"#,
        )
        .expect("envelope should decode");
        let error = envelope.error.expect("error should be present");
        assert_eq!(error.error_code, 15);
        assert_eq!(error.error_msg, "Access denied: wall is disabled");
        assert!(envelope.response.is_none());
    }

    #[test]
    fn response_envelope_decodes_without_optional_fields() {
        let envelope: WallGetEnvelope = serde_json::from_str(
            r#"{ "response": { "count": 240, "items": [ { "id": 7, "owner_id": -1, "date": 1000 } ] } }"#,
        )
        .expect("envelope should decode");
        let response = envelope.response.expect("response should be present");
        assert_eq!(response.items.len(), 1);
        assert_eq!(response.items[0].id, 7);
        assert_eq!(response.items[0].text, "");
        assert!(response.items[0].attachments.is_empty());
    }
}
