use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::sources::SharedHttp;
use crate::types::{MediaKind, Post, PublishError};

const API_BASE: &str = "https://api.telegram.org";
/// Bot API limit for photo/video captions.
const CAPTION_LIMIT: usize = 1024;
const MEDIA_GROUP_LIMIT: usize = 10;

/// Delivers posts to a mirror target.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Sends a post and returns the target-side message id.
    async fn publish(&self, post: &Post) -> Result<i64, PublishError>;

    async fn close(&self) -> Result<(), PublishError> {
        Ok(())
    }
}

/// Publisher backed by the Telegram Bot API.
///
/// Flood control (HTTP 429 with `parameters.retry_after`) is absorbed here by
/// sleeping and retrying the same call, so callers only ever see real errors.
pub struct TelegramPublisher {
    token: String,
    chat_id: String,
    http: Arc<SharedHttp>,
}

impl TelegramPublisher {
    pub fn new(token: String, chat_id: String, http: Arc<SharedHttp>) -> Self {
        Self {
            token,
            chat_id,
            http,
        }
    }

    async fn call(&self, method: &str, payload: &Value) -> Result<Value, PublishError> {
        let client = self.http.client()?;
        let url = format!("{}/bot{}/{}", API_BASE, self.token, method);

        loop {
            let envelope: ApiEnvelope = client
                .post(&url)
                .json(payload)
                .send()
                .await?
                .json()
                .await?;

            if envelope.ok {
                return envelope.result.ok_or_else(|| {
                    PublishError::UnexpectedResponse(format!("{} returned ok without a result", method))
                });
            }

            if let Some(retry_after) = envelope.parameters.and_then(|p| p.retry_after) {
                warn!(
                    "Telegram flood control on {}, waiting {}s before retrying",
                    method, retry_after
                );
                tokio::time::sleep(Duration::from_secs(retry_after.max(0) as u64)).await;
                continue;
            }

            return Err(PublishError::Api {
                code: envelope.error_code.unwrap_or(0),
                description: envelope
                    .description
                    .unwrap_or_else(|| "unknown error".to_string()),
            });
        }
    }
}

#[async_trait]
impl Publisher for TelegramPublisher {
    async fn publish(&self, post: &Post) -> Result<i64, PublishError> {
        let caption = build_caption(post);

        let result = if post.media.is_empty() {
            self.call(
                "sendMessage",
                &json!({
                    "chat_id": self.chat_id,
                    "text": caption,
                    "disable_web_page_preview": true,
                }),
            )
            .await?
        } else if post.media.len() == 1 {
            let media = &post.media[0];
            let (method, payload) = match media.kind {
                MediaKind::Photo => (
                    "sendPhoto",
                    json!({ "chat_id": self.chat_id, "photo": media.url, "caption": caption }),
                ),
                MediaKind::Video => (
                    "sendVideo",
                    json!({ "chat_id": self.chat_id, "video": media.url, "caption": caption }),
                ),
                MediaKind::Document | MediaKind::Audio => (
                    "sendDocument",
                    json!({ "chat_id": self.chat_id, "document": media.url, "caption": caption }),
                ),
            };
            self.call(method, &payload).await?
        } else {
            self.call(
                "sendMediaGroup",
                &json!({
                    "chat_id": self.chat_id,
                    "media": media_group(&post.media, &caption),
                }),
            )
            .await?
        };

        let id = message_id(&result)?;
        info!("Published {} as message {}", post.url, id);
        Ok(id)
    }
}

/// Appends the date/link footer and truncates the body (char-safe) so the
/// whole caption stays within the Bot API limit.
fn build_caption(post: &Post) -> String {
    let footer = format!(
        "\n\n📅 {}\n🔗 {}",
        post.created_at.format("%d.%m.%Y %H:%M"),
        post.url
    );
    let max_text_len = CAPTION_LIMIT
        .saturating_sub(footer.chars().count())
        .saturating_sub(5);

    let text = post.text.as_deref().unwrap_or("");
    if text.chars().count() > max_text_len {
        let truncated: String = text.chars().take(max_text_len).collect();
        format!("{}...{}", truncated, footer)
    } else {
        format!("{}{}", text, footer)
    }
}

/// Builds the `sendMediaGroup` payload. Albums accept photos and videos only,
/// at most ten of them, and the caption rides on the first entry.
fn media_group(media: &[crate::types::Media], caption: &str) -> Vec<Value> {
    let mut group = Vec::new();
    for item in media {
        if group.len() >= MEDIA_GROUP_LIMIT {
            break;
        }
        let kind = match item.kind {
            MediaKind::Photo => "photo",
            MediaKind::Video => "video",
            _ => continue,
        };
        let mut entry = json!({ "type": kind, "media": item.url });
        if group.is_empty() {
            entry["caption"] = json!(caption);
        }
        group.push(entry);
    }
    group
}

/// `sendMessage`/`sendPhoto` return a message object, `sendMediaGroup` an
/// array of them; either way the first message id is the one we record.
fn message_id(result: &Value) -> Result<i64, PublishError> {
    let message = if result.is_array() {
        result.get(0).unwrap_or(&Value::Null)
    } else {
        result
    };
    message
        .get("message_id")
        .and_then(Value::as_i64)
        .ok_or_else(|| {
            PublishError::UnexpectedResponse(format!("missing message_id in response: {}", result))
        })
}

#[derive(Debug, Deserialize)]
struct ApiEnvelope {
    ok: bool,
    result: Option<Value>,
    error_code: Option<i64>,
    description: Option<String>,
    parameters: Option<ResponseParameters>,
}

#[derive(Debug, Deserialize)]
struct ResponseParameters {
    retry_after: Option<i64>,
}
