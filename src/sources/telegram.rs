use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use once_cell::sync::OnceCell;
use regex::Regex;
use tracing::{debug, info};

use crate::fingerprint;
use crate::types::{Media, MediaKind, PlatformType, Post, SourceError};

use super::{SharedHttp, Source};

/// Collector for public Telegram channels, backed by the web preview at
/// `https://t.me/s/<username>`. The page lists roughly the last twenty
/// messages in chronological order; the collector walks them newest first,
/// which lets a cutoff end the scan at the first message that predates it.
pub struct TelegramSource {
    username: String,
    http: Arc<SharedHttp>,
}

impl TelegramSource {
    pub fn new(username: String, http: Arc<SharedHttp>) -> Self {
        Self { username, http }
    }
}

#[async_trait]
impl Source for TelegramSource {
    fn platform(&self) -> PlatformType {
        PlatformType::Telegram
    }

    fn source_id(&self) -> &str {
        &self.username
    }

    async fn fetch(
        &self,
        limit: usize,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Post>, SourceError> {
        let client = self.http.client()?;
        let url = format!("https://t.me/s/{}", self.username);
        debug!("Fetching {}", url);

        let response = client.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Api {
                platform: PlatformType::Telegram,
                code: i64::from(status.as_u16()),
                message: status
                    .canonical_reason()
                    .unwrap_or("unexpected status")
                    .to_string(),
            });
        }

        let body = response.text().await?;
        let posts = parse_preview(&self.username, &body, limit, since);
        info!(
            "Collected {} posts from t.me/{}",
            posts.len(),
            self.username
        );
        Ok(posts)
    }
}

/// Walks the preview page newest first and returns up to `limit` posts,
/// newest first. Blocks that cannot be dated or carry nothing worth
/// mirroring are skipped.
fn parse_preview(
    username: &str,
    html: &str,
    limit: usize,
    since: Option<DateTime<Utc>>,
) -> Vec<Post> {
    let blocks: Vec<&str> = html.split("tgme_widget_message_wrap").skip(1).collect();
    let mut posts = Vec::new();

    for block in blocks.iter().rev() {
        if posts.len() >= limit {
            break;
        }
        let created_at = match message_date(block) {
            Some(date) => date,
            None => continue,
        };
        if let Some(since) = since {
            // everything below this block is older still
            if created_at < since {
                break;
            }
        }
        if let Some(post) = parse_message_block(username, block, created_at) {
            posts.push(post);
        }
    }

    posts
}

fn parse_message_block(username: &str, block: &str, created_at: DateTime<Utc>) -> Option<Post> {
    let post_id = message_post_id(block)?;
    let text = message_text(block);

    let mut media = Vec::new();
    for url in photo_urls(block) {
        media.push(Media::new(MediaKind::Photo, url));
    }
    for url in video_urls(block) {
        media.push(Media::new(MediaKind::Video, url));
    }

    // service messages and unsupported content have nothing to mirror
    if text.is_none() && media.is_empty() {
        return None;
    }

    let media_urls: Vec<String> = media.iter().map(|m| m.url.clone()).collect();
    let content_hash = fingerprint::content_hash(text.as_deref(), &media_urls);

    Some(Post {
        platform: PlatformType::Telegram,
        source_id: username.to_string(),
        post_id: post_id.clone(),
        text,
        media,
        url: format!("https://t.me/{}/{}", username, post_id),
        author: message_author(block),
        created_at,
        views: None,
        content_hash,
    })
}

fn message_post_id(block: &str) -> Option<String> {
    static RE: OnceCell<Regex> = OnceCell::new();
    let re = RE.get_or_init(|| Regex::new(r#"data-post="[^"]*/(\d+)""#).unwrap());
    re.captures(block).map(|caps| caps[1].to_string())
}

/// The footer `<time>` tag is the last dated element of a block; reply
/// quotes embed their own timestamps before it.
fn message_date(block: &str) -> Option<DateTime<Utc>> {
    static RE: OnceCell<Regex> = OnceCell::new();
    let re = RE.get_or_init(|| Regex::new(r#"datetime="([^"]+)""#).unwrap());
    let caps = re.captures_iter(block).last()?;
    DateTime::parse_from_rfc3339(&caps[1])
        .ok()
        .map(|date| date.with_timezone(&Utc))
}

fn message_text(block: &str) -> Option<String> {
    static RE_TEXT: OnceCell<Regex> = OnceCell::new();
    // `js-message_text` keeps reply-quote bodies (`js-message_reply_text`)
    // out; trailing classes like `before_footer` are allowed
    let re_text = RE_TEXT.get_or_init(|| {
        Regex::new(
            r#"(?s)<div class="tgme_widget_message_text js-message_text[^"]*"[^>]*>(.*?)</div>"#,
        )
        .unwrap()
    });
    let raw = re_text.captures(block)?.get(1)?.as_str();

    static RE_BR: OnceCell<Regex> = OnceCell::new();
    let re_br = RE_BR.get_or_init(|| Regex::new(r"(?i)<br\s*/?>").unwrap());
    let with_breaks = re_br.replace_all(raw, "\n");

    static RE_TAGS: OnceCell<Regex> = OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| Regex::new(r"(?s)</?[^>]+>").unwrap());
    let stripped = re_tags.replace_all(&with_breaks, "");

    let decoded = html_escape::decode_html_entities(&stripped);
    fingerprint::sanitize_text(Some(&decoded))
}

fn photo_urls(block: &str) -> Vec<String> {
    static RE: OnceCell<Regex> = OnceCell::new();
    let re = RE.get_or_init(|| {
        Regex::new(r#"tgme_widget_message_photo_wrap[^>]*background-image:url\('([^']+)'\)"#)
            .unwrap()
    });
    re.captures_iter(block).map(|caps| caps[1].to_string()).collect()
}

fn video_urls(block: &str) -> Vec<String> {
    static RE: OnceCell<Regex> = OnceCell::new();
    let re = RE.get_or_init(|| Regex::new(r#"<video[^>]*src="([^"]+)""#).unwrap());
    re.captures_iter(block).map(|caps| caps[1].to_string()).collect()
}

fn message_author(block: &str) -> Option<String> {
    static RE: OnceCell<Regex> = OnceCell::new();
    let re = RE.get_or_init(|| {
        Regex::new(r#"tgme_widget_message_from_author[^>]*>([^<]+)<"#).unwrap()
    });
    let raw = re.captures(block)?.get(1)?.as_str();
    let decoded = html_escape::decode_html_entities(raw).trim().to_string();
    if decoded.is_empty() {
        None
    } else {
        Some(decoded)
    }
}
