use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::config::{self, Settings};
use crate::publisher::{Publisher, TelegramPublisher};
use crate::rate_limit::{AdaptiveRateLimiter, RateLimitConfig};
use crate::repository::{PostRepository, SqlitePostRepository};
use crate::sources::{create_source, SharedHttp, Source};
use crate::types::{CycleStats, MirrorError, Post, Result, SourceError, StoreError};

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub scrape_interval: Duration,
    pub post_check_delay: Duration,
    pub fetch_limit: usize,
    pub max_cycle_failures: u32,
    pub rate_limit: RateLimitConfig,
}

impl OrchestratorConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            scrape_interval: settings.scrape_interval,
            post_check_delay: settings.post_check_delay,
            fetch_limit: settings.fetch_limit,
            max_cycle_failures: settings.max_cycle_failures,
            rate_limit: RateLimitConfig {
                max_requests: settings.rate_limit_per_minute,
                time_window: Duration::from_secs(60),
                max_retries: settings.max_fetch_retries,
                base_delay: settings.retry_base_delay,
            },
        }
    }
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Stopped by an external signal.
    Interrupted,
    /// Too many consecutive cycle failures.
    BudgetExhausted,
}

/// A source paired with its own pacer, so a slow or failing source never
/// throttles the others.
struct SourceSlot {
    source: Arc<dyn Source>,
    limiter: AdaptiveRateLimiter,
}

impl SourceSlot {
    fn label(&self) -> String {
        format!("{}/{}", self.source.platform(), self.source.source_id())
    }

    /// Paced fetch with backoff-driven retries. Exhausting the retry budget
    /// surfaces as one source error for this cycle; the error streak carries
    /// over so a source that keeps failing gives up faster next time.
    async fn fetch(
        &self,
        limit: usize,
        since: Option<DateTime<Utc>>,
    ) -> std::result::Result<Vec<Post>, SourceError> {
        loop {
            self.limiter.acquire().await;
            match self.source.fetch(limit, since).await {
                Ok(posts) => {
                    self.limiter.reset_errors().await;
                    return Ok(posts);
                }
                Err(err) => {
                    if let Err(err) = self.limiter.handle_error(err).await {
                        return Err(SourceError::RetriesExhausted {
                            attempts: self.limiter.consecutive_errors().await,
                            last_error: err.to_string(),
                        });
                    }
                }
            }
        }
    }
}

/// Drives the collect/filter/publish/record loop over every configured source.
pub struct Orchestrator {
    repository: Arc<dyn PostRepository>,
    publisher: Arc<dyn Publisher>,
    slots: Vec<SourceSlot>,
    config: OrchestratorConfig,
    process_start_time: DateTime<Utc>,
    consecutive_failures: u32,
    shut_down: bool,
}

impl Orchestrator {
    pub fn new(
        repository: Arc<dyn PostRepository>,
        publisher: Arc<dyn Publisher>,
        sources: Vec<Arc<dyn Source>>,
        config: OrchestratorConfig,
    ) -> Self {
        let slots = sources
            .into_iter()
            .map(|source| SourceSlot {
                limiter: AdaptiveRateLimiter::new(config.rate_limit.clone()),
                source,
            })
            .collect();

        Self {
            repository,
            publisher,
            slots,
            config,
            process_start_time: Utc::now(),
            consecutive_failures: 0,
            shut_down: false,
        }
    }

    /// Wires the production graph: SQLite repository, Telegram publisher and
    /// the sources listed in the YAML config. Zero usable sources is fatal.
    pub async fn bootstrap(settings: &Settings) -> Result<Self> {
        settings.ensure_directories()?;

        let repository = SqlitePostRepository::connect(&settings.database_url).await?;
        repository.init_schema().await?;
        info!("Database ready at {}", settings.database_url);

        let http = Arc::new(SharedHttp::new(settings.http_timeout));
        let publisher = TelegramPublisher::new(
            settings.telegram_bot_token.clone(),
            settings.telegram_target_chat_id.clone(),
            Arc::clone(&http),
        );

        let entries = config::load_sources(&settings.sources_config)?;
        let mut sources: Vec<Arc<dyn Source>> = Vec::new();
        for entry in &entries {
            if !entry.enabled {
                debug!("Source {} is disabled, skipping", entry.url);
                continue;
            }
            match create_source(entry, Arc::clone(&http), settings) {
                Ok(source) => {
                    info!("Configured source {}/{}", source.platform(), source.source_id());
                    sources.push(source);
                }
                Err(e) => warn!("Skipping source {}: {}", entry.url, e),
            }
        }
        if sources.is_empty() {
            return Err(MirrorError::NoSources(settings.sources_config.clone()));
        }

        Ok(Self::new(
            Arc::new(repository),
            Arc::new(publisher),
            sources,
            OrchestratorConfig::from_settings(settings),
        ))
    }

    pub fn process_start_time(&self) -> DateTime<Utc> {
        self.process_start_time
    }

    /// Runs cycles until the stop signal fires or the failure budget runs out,
    /// then shuts everything down.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> Result<RunOutcome> {
        info!(
            "Mirror loop starting: {} sources, cycle every {:?}",
            self.slots.len(),
            self.config.scrape_interval
        );

        let outcome = loop {
            match self.run_cycle(&mut shutdown).await {
                Ok(stats) => {
                    self.consecutive_failures = 0;
                    info!(
                        "Cycle done: fetched {}, recorded {}, published {}, duplicates {}, backlog {}, source errors {}, publish failures {}",
                        stats.fetched,
                        stats.recorded,
                        stats.published,
                        stats.duplicates,
                        stats.backlog,
                        stats.source_errors,
                        stats.publish_failures
                    );
                }
                Err(e) => {
                    self.consecutive_failures += 1;
                    error!("Cycle failed ({} consecutive): {}", self.consecutive_failures, e);
                    if self.consecutive_failures > self.config.max_cycle_failures {
                        error!(
                            "Exceeded {} consecutive cycle failures, giving up",
                            self.config.max_cycle_failures
                        );
                        break RunOutcome::BudgetExhausted;
                    }
                }
            }

            if *shutdown.borrow() {
                info!("Stop signal received");
                break RunOutcome::Interrupted;
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.scrape_interval) => {}
                _ = shutdown.changed() => {
                    info!("Stop signal received");
                    break RunOutcome::Interrupted;
                }
            }
        };

        self.shutdown().await;
        Ok(outcome)
    }

    /// Drives exactly one cycle, then tears down. Used by `--once`.
    pub async fn run_once(&mut self) -> Result<CycleStats> {
        let (_stop, mut shutdown) = watch::channel(false);
        let result = self.run_cycle(&mut shutdown).await;
        self.shutdown().await;
        result
    }

    async fn run_cycle(&self, shutdown: &mut watch::Receiver<bool>) -> Result<CycleStats> {
        let mut stats = CycleStats::default();
        let since = Some(self.process_start_time);
        let limit = self.config.fetch_limit;

        debug!("Collecting from {} sources", self.slots.len());
        let fetches = self
            .slots
            .iter()
            .map(|slot| async move { (slot.label(), slot.fetch(limit, since).await) });

        let mut posts = Vec::new();
        for (label, result) in join_all(fetches).await {
            match result {
                Ok(batch) => {
                    debug!("{} returned {} posts", label, batch.len());
                    posts.extend(batch);
                }
                Err(e) => {
                    stats.source_errors += 1;
                    warn!("Source {} failed this cycle: {}", label, e);
                }
            }
        }
        stats.fetched = posts.len();

        for post in &posts {
            if *shutdown.borrow() {
                info!("Stop signal received, abandoning the rest of the cycle");
                return Ok(stats);
            }
            self.process_post(post, &mut stats, shutdown).await?;
        }

        Ok(stats)
    }

    async fn process_post(
        &self,
        post: &Post,
        stats: &mut CycleStats,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<()> {
        let content_hash = match post.content_hash.clone().or_else(|| post.compute_hash()) {
            Some(hash) => hash,
            None => {
                debug!("Dropping unfingerprintable post {}", post.url);
                return Ok(());
            }
        };

        if self.repository.exists(&content_hash).await? {
            stats.duplicates += 1;
            debug!("Skipping duplicate {}", post.url);
            return Ok(());
        }

        // record before publish, so an interrupted publish leaves a
        // recoverable unpublished row instead of a re-publish candidate
        match self.repository.create(post, &content_hash).await {
            Ok(_) => stats.recorded += 1,
            Err(StoreError::DuplicateHash(_)) => {
                stats.duplicates += 1;
                debug!("Skipping duplicate {}", post.url);
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        }

        if post.created_at < self.process_start_time {
            stats.backlog += 1;
            debug!("Recorded backlog post {} without publishing", post.url);
            return Ok(());
        }

        debug!(
            "Waiting {:?} before publishing {}",
            self.config.post_check_delay, post.url
        );
        tokio::select! {
            _ = tokio::time::sleep(self.config.post_check_delay) => {}
            _ = shutdown.changed() => {
                info!("Stop signal received during publish delay");
                return Ok(());
            }
        }

        match self.publisher.publish(post).await {
            Ok(message_id) => {
                self.repository
                    .mark_published(&content_hash, message_id)
                    .await?;
                stats.published += 1;
            }
            Err(e) => {
                stats.publish_failures += 1;
                warn!("Publishing {} failed permanently: {}", post.url, e);
                self.repository
                    .mark_failed(&content_hash, &e.to_string())
                    .await?;
            }
        }

        Ok(())
    }

    /// Closes sources, publisher and repository independently. Safe to call
    /// more than once and after a partial bootstrap.
    pub async fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;
        info!("Shutting down");

        for slot in &self.slots {
            if let Err(e) = slot.source.close().await {
                warn!("Closing source {} failed: {}", slot.label(), e);
            }
        }
        if let Err(e) = self.publisher.close().await {
            warn!("Closing publisher failed: {}", e);
        }
        if let Err(e) = self.repository.close().await {
            warn!("Closing repository failed: {}", e);
        }
        info!("Shutdown complete");
    }
}
