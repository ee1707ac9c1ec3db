mod config;
mod scheduler;
mod telemetry;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::config::DigestConfig;
use digest_core::impls::{SpoolMailer, SqliteFeedbackStore};
use digest_core::{BatchNotifier, NotifierBuilder};

#[derive(Debug, Parser)]
#[command(name = "digest", about = "Feedback digest notifier", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Bring the feedback table up to the current schema (safe to repeat)
    Migrate,
    /// Fetch, deliver and mark one batch, then exit
    RunOnce,
    /// Run a batch every interval until Ctrl-C
    Watch {
        /// Overrides DIGEST_INTERVAL_SECS
        #[arg(long)]
        interval_secs: Option<u64>,
    },
}

fn build_notifier(config: &DigestConfig, store: Arc<SqliteFeedbackStore>) -> Result<BatchNotifier> {
    let mailer = Arc::new(SpoolMailer::new(&config.spool_dir, &config.sender));
    let notifier = NotifierBuilder::new()
        .store(store)
        .mailer(mailer)
        .recipient(&config.recipient)
        .subject_prefix(&config.subject_prefix)
        .build()
        .context("invalid notifier configuration (is DIGEST_RECIPIENT set?)")?;
    Ok(notifier)
}

async fn open_store(config: &DigestConfig, migrate: bool) -> Result<Arc<SqliteFeedbackStore>> {
    let store = SqliteFeedbackStore::connect(&config.database_url, config.max_connections)
        .await
        .context("failed to open feedback store")?;
    if migrate {
        let report = store.migrate().await.context("schema migration failed")?;
        info!(steps = report.applied.len(), "schema migration finished");
    }
    Ok(Arc::new(store))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = DigestConfig::from_env().context("failed to load configuration")?;
    telemetry::init_telemetry(&config.log_level, &config.log_format);

    let run_timeout = config.run_timeout_secs.map(Duration::from_secs);

    match cli.command {
        Command::Migrate => {
            open_store(&config, true).await?;
        }
        Command::RunOnce => {
            let store = open_store(&config, config.auto_migrate).await?;
            let notifier = build_notifier(&config, store)?;
            let result = scheduler::run_logged(&notifier, run_timeout).await;
            println!("{}", serde_json::to_string(&result)?);
            if result.is_none() {
                anyhow::bail!("run did not complete; see log for details");
            }
        }
        Command::Watch { interval_secs } => {
            let store = open_store(&config, config.auto_migrate).await?;
            let notifier = build_notifier(&config, store)?;
            let every = Duration::from_secs(interval_secs.unwrap_or(config.interval_secs).max(1));

            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            tokio::spawn(async move {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    warn!(error = %e, "failed to listen for ctrl-c");
                    return;
                }
                info!("shutdown requested; finishing current run");
                // ignore send error: the loop may already be gone
                let _ = shutdown_tx.send(true);
            });

            info!(interval_secs = every.as_secs(), recipient = notifier.recipient(), "watching for pending feedback");
            scheduler::watch_loop(&notifier, every, run_timeout, shutdown_rx).await;
        }
    }

    Ok(())
}
