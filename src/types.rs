use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::fingerprint;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlatformType {
    Telegram,
    Vk,
}

impl PlatformType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlatformType::Telegram => "telegram",
            PlatformType::Vk => "vk",
        }
    }
}

impl std::fmt::Display for PlatformType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Photo,
    Video,
    Document,
    Audio,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Media {
    pub kind: MediaKind,
    pub url: String,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub duration: Option<i64>,
}

impl Media {
    pub fn new(kind: MediaKind, url: impl Into<String>) -> Self {
        Self {
            kind,
            url: url.into(),
            width: None,
            height: None,
            duration: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Post {
    pub platform: PlatformType,
    pub source_id: String,
    pub post_id: String,
    pub text: Option<String>,
    pub media: Vec<Media>,
    pub url: String,
    pub author: Option<String>,
    pub created_at: DateTime<Utc>,
    pub views: Option<i64>,
    pub content_hash: Option<String>,
}

impl Post {
    pub fn media_urls(&self) -> Vec<String> {
        self.media.iter().map(|m| m.url.clone()).collect()
    }

    /// None when the post has neither text nor media to fingerprint.
    pub fn compute_hash(&self) -> Option<String> {
        fingerprint::content_hash(self.text.as_deref(), &self.media_urls())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ProcessedPost {
    pub id: i64,
    pub platform: String,
    pub source_id: String,
    pub post_id: String,
    pub content_hash: String,
    pub url: String,
    pub created_at: DateTime<Utc>,
    pub processed_at: DateTime<Utc>,
    pub published: bool,
    pub published_at: Option<DateTime<Utc>>,
    pub target_message_id: Option<i64>,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct CycleStats {
    pub fetched: usize,
    pub recorded: usize,
    pub published: usize,
    pub duplicates: usize,
    pub backlog: usize,
    pub source_errors: usize,
    pub publish_failures: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{platform} API error {code}: {message}")]
    Api {
        platform: PlatformType,
        code: i64,
        message: String,
    },

    #[error("Failed to parse source data: {0}")]
    Parse(String),

    #[error("Invalid source URL: {0}")]
    InvalidUrl(String),

    #[error("Unsupported source type: {0}")]
    UnsupportedPlatform(String),

    #[error("Missing credential: {0}")]
    MissingCredential(&'static str),

    #[error("Retries exhausted after {attempts} consecutive errors: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },
}

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Telegram API error {code}: {description}")]
    Api { code: i64, description: String },

    #[error("Unexpected Telegram response: {0}")]
    UnexpectedResponse(String),
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Content hash already recorded: {0}")]
    DuplicateHash(String),
}

#[derive(Debug, thiserror::Error)]
pub enum MirrorError {
    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    #[error("Publish error: {0}")]
    Publish(#[from] PublishError),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("Invalid sources file: {0}")]
    SourcesFile(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("No enabled sources configured in {0}")]
    NoSources(String),
}

pub type Result<T> = std::result::Result<T, MirrorError>;
