pub mod types;
pub mod fingerprint;
pub mod rate_limit;
pub mod config;
pub mod sources;
pub mod repository;
pub mod publisher;
pub mod orchestrator;

pub use types::*;
pub use config::{Settings, SourceEntry};
pub use rate_limit::{AdaptiveRateLimiter, RateLimitConfig, RateLimiter};
pub use sources::{create_source, SharedHttp, Source, TelegramSource, VkSource};
pub use repository::{PostRepository, SqlitePostRepository};
pub use publisher::{Publisher, TelegramPublisher};
pub use orchestrator::{Orchestrator, OrchestratorConfig, RunOutcome};
