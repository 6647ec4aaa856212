use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};
use pinboard_core::ArtifactName;
use pinboard_storage::{ArtifactStore, StorageConfig};
use pinboard_sync::{
    import_records, loaders, maybe_build_scheduler, render_tsv, run_site_rankings, EtlPipeline,
    SiteRankingEngine, SyncConfig,
};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "pinboard")]
#[command(about = "Fetch, normalize and cache dashboard tables as versioned artifacts")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Full refresh of every NCAA artifact.
    Sync {
        /// Reference day for the schedule window (defaults to today).
        #[arg(long)]
        today: Option<NaiveDate>,
    },
    /// Refresh today's scoreboard into `live_scores`.
    Live {
        #[arg(long)]
        today: Option<NaiveDate>,
    },
    /// Rank the stored `sites` table into `site_rankings`.
    RankSites,
    /// Store a JSON array of objects as an artifact.
    Import { name: String, file: PathBuf },
    /// Print an artifact as tab-separated text.
    Show {
        name: String,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Last update time of every artifact.
    Status,
    /// Run the cron scheduler until interrupted.
    Schedule,
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pinboard=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn build_pipeline(store: Arc<ArtifactStore>) -> Result<EtlPipeline<pinboard_storage::ApiClient>> {
    EtlPipeline::from_config(SyncConfig::from_env(), store).context("building ETL pipeline")
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let store = Arc::new(ArtifactStore::new(StorageConfig::from_env()));

    match cli.command.unwrap_or(Commands::Status) {
        Commands::Sync { today } => {
            let today = today.unwrap_or_else(|| Local::now().date_naive());
            let summary = build_pipeline(store)?.run_full_refresh(today).await;
            println!("{}", serde_json::to_string_pretty(&summary)?);
            if !summary.is_complete() {
                bail!("{} artifact(s) failed to write", summary.failed.len());
            }
        }
        Commands::Live { today } => {
            let today = today.unwrap_or_else(|| Local::now().date_naive());
            let summary = build_pipeline(store)?.run_fast_refresh(today).await?;
            println!(
                "live scores: {} total games, {} live now",
                summary.games, summary.live_now
            );
        }
        Commands::RankSites => {
            let summary = run_site_rankings(&store, &SiteRankingEngine::default()).await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Commands::Import { name, file } => {
            let meta = import_records(&store, &name, &file).await?;
            println!(
                "imported {} rows into {} (version {})",
                meta.rows,
                meta.name,
                meta.version.as_deref().unwrap_or("-")
            );
        }
        Commands::Show { name, limit } => {
            let table = match ArtifactName::parse(&name) {
                Some(artifact) => loaders::load(&store, artifact).await,
                None => store.read(&name).await,
            };
            print!("{}", render_tsv(&table, limit));
        }
        Commands::Status => {
            for (artifact, updated) in loaders::freshness(&store).await {
                println!("{artifact:<18} {updated}");
            }
        }
        Commands::Schedule => {
            let pipeline = Arc::new(build_pipeline(store)?);
            let Some(mut sched) = maybe_build_scheduler(pipeline).await? else {
                bail!("scheduler disabled; set PINBOARD_SCHEDULER_ENABLED=true");
            };
            sched.start().await.context("starting scheduler")?;
            info!("scheduler running; press ctrl-c to stop");
            tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
            sched.shutdown().await.context("stopping scheduler")?;
        }
    }

    Ok(())
}
