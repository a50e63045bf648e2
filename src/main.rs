use anyhow::Context;
use clap::Parser;
use mirror_bot::{Orchestrator, RunOutcome, Settings};
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "mirror-bot")]
#[command(about = "Mirrors posts from public Telegram and VK sources into a Telegram channel")]
struct Cli {
    /// Path to the YAML sources file (overrides SOURCES_CONFIG)
    #[arg(long)]
    sources: Option<String>,

    /// Database URL (overrides DATABASE_URL)
    #[arg(long)]
    database_url: Option<String>,

    /// Run a single cycle and exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let mut settings = Settings::from_env().context("loading configuration")?;
    if let Some(sources) = cli.sources {
        settings.sources_config = sources;
    }
    if let Some(database_url) = cli.database_url {
        settings.database_url = database_url;
    }

    info!("Starting mirror-bot");
    let mut orchestrator = Orchestrator::bootstrap(&settings)
        .await
        .context("initialization failed")?;

    if cli.once {
        let stats = orchestrator.run_once().await?;
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
        return Ok(());
    }

    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Ctrl-c received, stopping");
                let _ = stop_tx.send(true);
            }
            Err(e) => {
                error!("Failed to listen for ctrl-c: {}", e);
                // keep the channel open so the loop is not stopped by accident
                std::future::pending::<()>().await;
            }
        }
    });

    match orchestrator.run(stop_rx).await? {
        RunOutcome::Interrupted => {
            info!("Stopped cleanly");
            Ok(())
        }
        RunOutcome::BudgetExhausted => {
            anyhow::bail!("stopped after exceeding the cycle failure budget")
        }
    }
}
