pub mod telegram;
pub mod vk;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use once_cell::sync::OnceCell;
use reqwest::Client;
use tracing::debug;
use url::Url;

use crate::config::{Settings, SourceEntry};
use crate::types::{PlatformType, Post, SourceError};

pub use telegram::TelegramSource;
pub use vk::VkSource;

/// Capability contract for one content source (a Telegram channel, a VK
/// community).
#[async_trait]
pub trait Source: Send + Sync {
    fn platform(&self) -> PlatformType;

    /// Stable identifier within the platform: Telegram username or VK domain.
    fn source_id(&self) -> &str;

    /// Up to `limit` recent posts, newest first. Posts older than `since` are
    /// left out; whether a collector may stop scanning at the first one
    /// depends on the ordering its feed guarantees.
    async fn fetch(
        &self,
        limit: usize,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Post>, SourceError>;

    /// Releases any held session. Idempotent.
    async fn close(&self) -> Result<(), SourceError> {
        Ok(())
    }
}

const USER_AGENT: &str = "mirror-bot/0.1";

/// One `reqwest::Client` for the whole process, built on first use and handed
/// around explicitly. Collectors and the publisher all borrow from here.
pub struct SharedHttp {
    timeout: Duration,
    client: OnceCell<Client>,
}

impl SharedHttp {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            client: OnceCell::new(),
        }
    }

    pub fn client(&self) -> Result<&Client, reqwest::Error> {
        self.client.get_or_try_init(|| {
            Client::builder()
                .timeout(self.timeout)
                .user_agent(USER_AGENT)
                .build()
        })
    }
}

/// Username from a channel URL like `https://t.me/some_channel`. None when
/// the URL is not a plain channel link.
pub fn extract_telegram_username(url: &str) -> Option<String> {
    let username = sole_path_segment(url, "t.me")?;
    if username.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        Some(username)
    } else {
        None
    }
}

/// Community domain from a URL like `https://vk.com/club_name`. The optional
/// `public`/`club` prefix of numeric community links is stripped.
pub fn extract_vk_domain(url: &str) -> Option<String> {
    let segment = sole_path_segment(url, "vk.com")?;
    let domain = match segment
        .strip_prefix("public")
        .or_else(|| segment.strip_prefix("club"))
    {
        Some(rest) if !rest.is_empty() => rest,
        _ => segment.as_str(),
    };
    if domain.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        Some(domain.to_string())
    } else {
        None
    }
}

/// The single path segment of a plain `https://<host>/<segment>` link.
/// Extra segments, queries and fragments disqualify the URL.
fn sole_path_segment(url: &str, host: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    if !matches!(parsed.scheme(), "http" | "https")
        || parsed.host_str() != Some(host)
        || parsed.query().is_some()
        || parsed.fragment().is_some()
    {
        return None;
    }
    let mut segments = parsed.path_segments()?.filter(|s| !s.is_empty());
    let segment = segments.next()?.to_string();
    if segments.next().is_some() {
        return None;
    }
    Some(segment)
}

/// Builds the collector for one configured entry. A platform this build does
/// not know, a malformed URL, or a missing credential all come back as errors
/// the caller can log and skip without touching the other entries.
pub fn create_source(
    entry: &SourceEntry,
    http: Arc<SharedHttp>,
    settings: &Settings,
) -> Result<Arc<dyn Source>, SourceError> {
    match entry.platform.to_lowercase().as_str() {
        "telegram" => {
            let username = extract_telegram_username(&entry.url)
                .ok_or_else(|| SourceError::InvalidUrl(entry.url.clone()))?;
            debug!("Built telegram collector for {}", username);
            Ok(Arc::new(TelegramSource::new(username, http)))
        }
        "vk" => {
            let domain = extract_vk_domain(&entry.url)
                .ok_or_else(|| SourceError::InvalidUrl(entry.url.clone()))?;
            let access_token = settings
                .vk_access_token
                .clone()
                .ok_or(SourceError::MissingCredential("VK_ACCESS_TOKEN"))?;
            debug!("Built vk collector for {}", domain);
            Ok(Arc::new(VkSource::new(
                domain,
                access_token,
                settings.vk_api_version.clone(),
                http,
            )))
        }
        other => Err(SourceError::UnsupportedPlatform(other.to_string())),
    }
}
