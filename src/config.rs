use std::env;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing environment variable: {0}")]
    Missing(&'static str),
    #[error("invalid value for {name}: {source}")]
    Invalid {
        name: &'static str,
        #[source]
        source: anyhow::Error,
    },
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub telegram_bot_token: String,
    pub telegram_target_chat_id: String,
    pub vk_access_token: Option<String>,
    pub vk_api_version: String,
    pub database_url: String,
    pub sources_config: String,
    pub scrape_interval: Duration,
    pub rate_limit_per_minute: u32,
    pub post_check_delay: Duration,
    pub fetch_limit: usize,
    pub max_fetch_retries: u32,
    pub retry_base_delay: Duration,
    pub max_cycle_failures: u32,
    pub http_timeout: Duration,
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        let telegram_bot_token = env_var("TELEGRAM_BOT_TOKEN")?;
        let telegram_target_chat_id = env_var("TELEGRAM_TARGET_CHAT_ID")?;
        // only needed when a vk source is enabled; checked at source build time
        let vk_access_token = env::var("VK_ACCESS_TOKEN").ok();
        let vk_api_version =
            env::var("VK_API_VERSION").unwrap_or_else(|_| "5.131".to_string());

        let database_url =
            env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite://data/mirror.db".to_string());
        let sources_config =
            env::var("SOURCES_CONFIG").unwrap_or_else(|_| "config/sources.yaml".to_string());

        let scrape_interval = parse_duration_secs("SCRAPE_INTERVAL_SECONDS", 60)?;
        let rate_limit_per_minute = parse_u32("RATE_LIMIT_REQUESTS_PER_MINUTE", 30)?;
        let post_check_delay = parse_duration_secs("POST_CHECK_DELAY_SECONDS", 600)?;
        let fetch_limit = parse_usize("FETCH_LIMIT", 10)?;
        let max_fetch_retries = parse_u32("MAX_FETCH_RETRIES", 5)?;
        let retry_base_delay = parse_duration_secs("RETRY_BASE_DELAY_SECONDS", 1)?;
        let max_cycle_failures = parse_u32("MAX_CYCLE_FAILURES", 5)?;
        let http_timeout = parse_duration_secs("HTTP_TIMEOUT_SECONDS", 30)?;

        Ok(Self {
            telegram_bot_token,
            telegram_target_chat_id,
            vk_access_token,
            vk_api_version,
            database_url,
            sources_config,
            scrape_interval,
            rate_limit_per_minute,
            post_check_delay,
            fetch_limit,
            max_fetch_retries,
            retry_base_delay,
            max_cycle_failures,
            http_timeout,
        })
    }

    /// Creates the directory the SQLite file lives in, if the URL names one.
    pub fn ensure_directories(&self) -> std::io::Result<()> {
        let path = self
            .database_url
            .strip_prefix("sqlite://")
            .or_else(|| self.database_url.strip_prefix("sqlite:"));
        if let Some(path) = path {
            if let Some(parent) = Path::new(path).parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
        }
        Ok(())
    }
}

/// One entry of the sources file. `platform` stays a raw string so an unknown
/// type skips that entry instead of failing the whole file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceEntry {
    #[serde(rename = "type")]
    pub platform: String,
    pub url: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct SourcesFile {
    sources: Vec<SourceEntry>,
}

pub fn parse_sources(raw: &str) -> Result<Vec<SourceEntry>, serde_yaml::Error> {
    let file: SourcesFile = serde_yaml::from_str(raw)?;
    Ok(file.sources)
}

pub fn load_sources(path: &str) -> crate::types::Result<Vec<SourceEntry>> {
    let raw = std::fs::read_to_string(path)?;
    Ok(parse_sources(&raw)?)
}

fn env_var(name: &'static str) -> Result<String, ConfigError> {
    env::var(name).map_err(|_| ConfigError::Missing(name))
}

fn parse_u32(name: &'static str, default: u32) -> Result<u32, ConfigError> {
    let raw = env::var(name).unwrap_or_else(|_| default.to_string());
    raw.parse::<u32>().map_err(|error| ConfigError::Invalid {
        name,
        source: anyhow::Error::new(error),
    })
}

fn parse_u64(name: &'static str, default: u64) -> Result<u64, ConfigError> {
    let raw = env::var(name).unwrap_or_else(|_| default.to_string());
    raw.parse::<u64>().map_err(|error| ConfigError::Invalid {
        name,
        source: anyhow::Error::new(error),
    })
}

fn parse_usize(name: &'static str, default: usize) -> Result<usize, ConfigError> {
    let raw = env::var(name).unwrap_or_else(|_| default.to_string());
    raw.parse::<usize>().map_err(|error| ConfigError::Invalid {
        name,
        source: anyhow::Error::new(error),
    })
}

fn parse_duration_secs(name: &'static str, default_secs: u64) -> Result<Duration, ConfigError> {
    let value = parse_u64(name, default_secs)?;
    Ok(Duration::from_secs(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn reset_env() {
        for name in [
            "TELEGRAM_BOT_TOKEN",
            "TELEGRAM_TARGET_CHAT_ID",
            "VK_ACCESS_TOKEN",
            "VK_API_VERSION",
            "DATABASE_URL",
            "SOURCES_CONFIG",
            "SCRAPE_INTERVAL_SECONDS",
            "RATE_LIMIT_REQUESTS_PER_MINUTE",
            "POST_CHECK_DELAY_SECONDS",
            "FETCH_LIMIT",
            "MAX_FETCH_RETRIES",
            "RETRY_BASE_DELAY_SECONDS",
            "MAX_CYCLE_FAILURES",
            "HTTP_TIMEOUT_SECONDS",
        ] {
            env::remove_var(name);
        }
    }

    #[test]
    #[serial]
    fn from_env_uses_defaults_when_optional_missing() {
        reset_env();
        env::set_var("TELEGRAM_BOT_TOKEN", "123:abc");
        env::set_var("TELEGRAM_TARGET_CHAT_ID", "@mirror");

        let settings = Settings::from_env().expect("settings should load");

        assert_eq!(settings.telegram_bot_token, "123:abc");
        assert_eq!(settings.telegram_target_chat_id, "@mirror");
        assert!(settings.vk_access_token.is_none());
        assert_eq!(settings.vk_api_version, "5.131");
        assert_eq!(settings.database_url, "sqlite://data/mirror.db");
        assert_eq!(settings.sources_config, "config/sources.yaml");
        assert_eq!(settings.scrape_interval, Duration::from_secs(60));
        assert_eq!(settings.rate_limit_per_minute, 30);
        assert_eq!(settings.post_check_delay, Duration::from_secs(600));
        assert_eq!(settings.fetch_limit, 10);
        assert_eq!(settings.max_fetch_retries, 5);
        assert_eq!(settings.retry_base_delay, Duration::from_secs(1));
        assert_eq!(settings.max_cycle_failures, 5);
        assert_eq!(settings.http_timeout, Duration::from_secs(30));
    }

    #[test]
    #[serial]
    fn from_env_overrides_values() {
        reset_env();
        env::set_var("TELEGRAM_BOT_TOKEN", "123:abc");
        env::set_var("TELEGRAM_TARGET_CHAT_ID", "-1002345");
        env::set_var("VK_ACCESS_TOKEN", "vk-token");
        env::set_var("DATABASE_URL", "sqlite://tmp/other.db");
        env::set_var("SCRAPE_INTERVAL_SECONDS", "5");
        env::set_var("RATE_LIMIT_REQUESTS_PER_MINUTE", "10");
        env::set_var("POST_CHECK_DELAY_SECONDS", "0");
        env::set_var("FETCH_LIMIT", "25");
        env::set_var("MAX_CYCLE_FAILURES", "2");

        let settings = Settings::from_env().expect("settings should load");

        assert_eq!(settings.telegram_target_chat_id, "-1002345");
        assert_eq!(settings.vk_access_token.as_deref(), Some("vk-token"));
        assert_eq!(settings.database_url, "sqlite://tmp/other.db");
        assert_eq!(settings.scrape_interval, Duration::from_secs(5));
        assert_eq!(settings.rate_limit_per_minute, 10);
        assert_eq!(settings.post_check_delay, Duration::ZERO);
        assert_eq!(settings.fetch_limit, 25);
        assert_eq!(settings.max_cycle_failures, 2);
    }

    #[test]
    #[serial]
    fn from_env_errors_when_bot_token_missing() {
        reset_env();
        env::set_var("TELEGRAM_TARGET_CHAT_ID", "@mirror");

        let error = Settings::from_env().expect_err("missing token should fail");
        assert!(matches!(error, ConfigError::Missing("TELEGRAM_BOT_TOKEN")));
    }

    #[test]
    #[serial]
    fn from_env_errors_on_unparseable_number() {
        reset_env();
        env::set_var("TELEGRAM_BOT_TOKEN", "123:abc");
        env::set_var("TELEGRAM_TARGET_CHAT_ID", "@mirror");
        env::set_var("FETCH_LIMIT", "lots");

        let error = Settings::from_env().expect_err("bad number should fail");
        assert!(matches!(
            error,
            ConfigError::Invalid {
                name: "FETCH_LIMIT",
                ..
            }
        ));
    }

    #[test]
    fn sources_yaml_parses_with_default_enabled() {
        let raw = "
sources:
  - type: telegram
    url: https://t.me/example_channel
  - type: vk
    url: https://vk.com/example_group
    enabled: false
";
        let entries = parse_sources(raw).expect("yaml should parse");
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].platform, "telegram");
        assert!(entries[0].enabled);
        assert_eq!(entries[1].platform, "vk");
        assert!(!entries[1].enabled);
    }

    #[test]
    fn sources_yaml_keeps_unknown_types_for_the_factory_to_reject() {
        let raw = "
sources:
  - type: rss
    url: https://example.com/feed.xml
";
        let entries = parse_sources(raw).expect("yaml should parse");
        assert_eq!(entries[0].platform, "rss");
    }

    #[test]
    fn sources_yaml_without_sources_key_is_an_error() {
        assert!(parse_sources("channels: []").is_err());
    }
}
