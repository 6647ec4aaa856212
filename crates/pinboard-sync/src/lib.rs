//! ETL orchestration: full and fast refresh jobs, site rankings, cron scheduling.

pub mod loaders;
pub mod ranking;

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Datelike, Duration as DayDuration, Local, NaiveDate, Utc};
use pinboard_core::{ArtifactMeta, ArtifactName, Cell, Table};
use pinboard_storage::client::{
    DEFAULT_CONFERENCE, DEFAULT_INDIVIDUAL_STAT_ID, DEFAULT_TEAM_STAT_ID, NCAA_API_BASE,
};
use pinboard_storage::{ApiClient, ApiClientConfig, ArtifactStore, JsonSource, NcaaEndpoints};
use pinboard_transform::{
    build_schedule, classify_game_state, records_to_table, transform_schools,
    transform_scoreboard, transform_standings, transform_team_rankings, transform_team_stats,
};
use serde::Serialize;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

pub use ranking::{
    min_max_normalize, rank_within_group, tier_for, PerformanceTier, RankingError,
    RankingSummary, RankingWeights, SiteRankingEngine,
};

pub const CRATE_NAME: &str = "pinboard-sync";

pub const CURRENT_POLL: &str = "current";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    pub api_base_url: String,
    pub http_timeout_secs: u64,
    pub min_request_interval_ms: u64,
    pub user_agent: String,
    pub schedule_past_days: i64,
    pub schedule_future_days: i64,
    pub scheduler_enabled: bool,
    pub daily_etl_cron: String,
    pub live_scores_cron: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

impl SyncConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let number = |key: &str, default: u64| {
            lookup(key)
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(default)
        };
        let days = |key: &str, default: i64| {
            lookup(key)
                .and_then(|v| v.trim().parse().ok())
                .filter(|d: &i64| *d >= 0)
                .unwrap_or(default)
        };

        Self {
            api_base_url: lookup("NCAA_API_BASE_URL").unwrap_or_else(|| NCAA_API_BASE.to_string()),
            http_timeout_secs: number("PINBOARD_HTTP_TIMEOUT_SECS", 30),
            min_request_interval_ms: number("PINBOARD_MIN_REQUEST_INTERVAL_MS", 220),
            user_agent: lookup("PINBOARD_USER_AGENT")
                .unwrap_or_else(|| format!("pinboard/{}", env!("CARGO_PKG_VERSION"))),
            schedule_past_days: days("PINBOARD_SCHEDULE_PAST_DAYS", 7),
            schedule_future_days: days("PINBOARD_SCHEDULE_FUTURE_DAYS", 30),
            scheduler_enabled: lookup("PINBOARD_SCHEDULER_ENABLED")
                .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "True"))
                .unwrap_or(false),
            daily_etl_cron: lookup("DAILY_ETL_CRON").unwrap_or_else(|| "0 0 6 * * *".to_string()),
            live_scores_cron: lookup("LIVE_SCORES_CRON")
                .unwrap_or_else(|| "0 * * * * *".to_string()),
        }
    }

    pub fn api_client_config(&self) -> ApiClientConfig {
        ApiClientConfig {
            base_url: self.api_base_url.clone(),
            timeout: Duration::from_secs(self.http_timeout_secs),
            min_interval: Duration::from_millis(self.min_request_interval_ms),
            user_agent: Some(self.user_agent.clone()),
        }
    }

    /// Inclusive schedule window around `today`.
    pub fn schedule_window(&self, today: NaiveDate) -> (NaiveDate, NaiveDate) {
        (
            today - DayDuration::days(self.schedule_past_days),
            today + DayDuration::days(self.schedule_future_days),
        )
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ArtifactFailure {
    pub artifact: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RefreshSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Rows written per artifact.
    pub rows: BTreeMap<String, usize>,
    pub failed: Vec<ArtifactFailure>,
}

impl RefreshSummary {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LiveSummary {
    pub run_id: Uuid,
    pub games: usize,
    pub live_now: usize,
    pub written_at: DateTime<Utc>,
}

/// Count games whose state classifies as live.
pub fn count_live_games(live_scores: &Table) -> usize {
    live_scores
        .column("game_state")
        .unwrap_or_default()
        .into_iter()
        .filter(|cell| classify_game_state(&cell.to_string()) == "Live")
        .count()
}

pub struct EtlPipeline<S> {
    config: SyncConfig,
    source: S,
    store: Arc<ArtifactStore>,
}

impl EtlPipeline<ApiClient> {
    pub fn from_config(config: SyncConfig, store: Arc<ArtifactStore>) -> Result<Self> {
        let client = ApiClient::new(config.api_client_config())?;
        Ok(Self::new(config, client, store))
    }
}

impl<S: JsonSource> EtlPipeline<S> {
    pub fn new(config: SyncConfig, source: S, store: Arc<ArtifactStore>) -> Self {
        Self {
            config,
            source,
            store,
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    async fn record_write(&self, artifact: ArtifactName, table: Table, summary: &mut RefreshSummary) {
        match self.store.write(artifact.as_str(), &table).await {
            Ok(meta) => {
                summary.rows.insert(artifact.to_string(), meta.rows);
            }
            Err(err) => {
                error!(artifact = %artifact, error = %err, "artifact write failed; continuing");
                summary.failed.push(ArtifactFailure {
                    artifact: artifact.to_string(),
                    error: err.to_string(),
                });
            }
        }
    }

    /// Rebuild every tracked NCAA artifact. A failed write is recorded in the
    /// summary and the run moves on to the next artifact.
    pub async fn run_full_refresh(&self, today: NaiveDate) -> RefreshSummary {
        let run_id = Uuid::new_v4();
        let span = info_span!("full_refresh", %run_id);
        async move {
            let mut summary = RefreshSummary {
                run_id,
                started_at: Utc::now(),
                finished_at: Utc::now(),
                rows: BTreeMap::new(),
                failed: Vec::new(),
            };

            info!("fetching rankings");
            let raw = self.source.rankings(CURRENT_POLL).await;
            self.record_write(ArtifactName::Rankings, transform_team_rankings(raw.as_ref()), &mut summary)
                .await;

            info!("fetching team stats");
            let rows = self.source.all_team_stats(DEFAULT_TEAM_STAT_ID).await;
            self.record_write(ArtifactName::TeamStats, transform_team_stats(&rows), &mut summary)
                .await;

            info!("fetching individual stats");
            let rows = self.source.all_individual_stats(DEFAULT_INDIVIDUAL_STAT_ID).await;
            self.record_write(ArtifactName::IndividualStats, transform_team_stats(&rows), &mut summary)
                .await;

            info!("fetching standings");
            let raw = self.source.standings(today.year()).await;
            self.record_write(ArtifactName::Standings, transform_standings(raw.as_ref()), &mut summary)
                .await;

            info!("fetching schools index");
            let schools = self.source.schools().await;
            self.record_write(ArtifactName::Schools, transform_schools(&schools), &mut summary)
                .await;

            let (start, end) = self.config.schedule_window(today);
            info!(%start, %end, "fetching schedule window");
            let games = self.source.scoreboard_range(start, end).await;
            self.record_write(ArtifactName::Schedule, build_schedule(&games), &mut summary)
                .await;

            summary.finished_at = Utc::now();
            if summary.is_complete() {
                info!(rows = ?summary.rows, "full refresh complete");
            } else {
                warn!(rows = ?summary.rows, failed = summary.failed.len(), "full refresh finished with failures");
            }
            summary
        }
        .instrument(span)
        .await
    }

    /// Overwrite `live_scores` from today's scoreboard. A write failure aborts.
    pub async fn run_fast_refresh(&self, today: NaiveDate) -> Result<LiveSummary> {
        let run_id = Uuid::new_v4();
        let span = info_span!("fast_refresh", %run_id);
        async move {
            let raw = self.source.scoreboard(today, DEFAULT_CONFERENCE).await;
            let table = transform_scoreboard(raw.as_ref());
            let meta = self
                .store
                .write(ArtifactName::LiveScores.as_str(), &table)
                .await
                .context("writing live_scores")?;

            let live_now = count_live_games(&table);
            info!(games = meta.rows, live_now, "live scores refreshed");
            Ok(LiveSummary {
                run_id,
                games: meta.rows,
                live_now,
                written_at: meta.updated_at,
            })
        }
        .instrument(span)
        .await
    }
}

/// Rank the stored `sites` table and persist the result as `site_rankings`.
pub async fn run_site_rankings(
    store: &ArtifactStore,
    engine: &SiteRankingEngine,
) -> Result<RankingSummary> {
    let Some(sites) = store
        .try_read(ArtifactName::Sites.as_str())
        .await
        .context("reading sites")?
    else {
        bail!("the `sites` artifact has not been written yet");
    };

    let rankings = engine.rank_sites(&sites).context("ranking sites")?;
    store
        .write(ArtifactName::SiteRankings.as_str(), &rankings)
        .await
        .context("writing site_rankings")?;

    let summary = engine.summarize(&rankings);
    info!(
        sites = summary.n_sites_ranked,
        avg = summary.avg_composite_score,
        "site rankings computed"
    );
    Ok(summary)
}

/// Load a JSON list of objects from `path` and store it as artifact `name`.
pub async fn import_records(store: &ArtifactStore, name: &str, path: &Path) -> Result<ArtifactMeta> {
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    let value: serde_json::Value =
        serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
    let Some(items) = value.as_array() else {
        bail!("{} must contain a JSON array of objects", path.display());
    };

    let mut table = records_to_table(items);
    if let Some(artifact) = ArtifactName::parse(name) {
        table.ensure_columns(artifact.columns());
    }
    store
        .write(name, &table)
        .await
        .with_context(|| format!("writing artifact {name}"))
}

/// Cron jobs for both refresh modes, or `None` when scheduling is disabled.
pub async fn maybe_build_scheduler<S>(pipeline: Arc<EtlPipeline<S>>) -> Result<Option<JobScheduler>>
where
    S: JsonSource + 'static,
{
    if !pipeline.config.scheduler_enabled {
        return Ok(None);
    }

    let sched = JobScheduler::new().await.context("creating scheduler")?;

    let daily = pipeline.clone();
    let job = Job::new_async(&pipeline.config.daily_etl_cron, move |_uuid, _l| {
        let pipeline = daily.clone();
        Box::pin(async move {
            let summary = pipeline.run_full_refresh(Local::now().date_naive()).await;
            info!(run_id = %summary.run_id, failed = summary.failed.len(), "scheduled full refresh finished");
        })
    })
    .with_context(|| format!("creating daily job for cron {}", pipeline.config.daily_etl_cron))?;
    sched.add(job).await.context("adding daily job")?;

    let live = pipeline.clone();
    let job = Job::new_async(&pipeline.config.live_scores_cron, move |_uuid, _l| {
        let pipeline = live.clone();
        Box::pin(async move {
            if let Err(err) = pipeline.run_fast_refresh(Local::now().date_naive()).await {
                error!(error = %err, "scheduled live refresh failed");
            }
        })
    })
    .with_context(|| format!("creating live job for cron {}", pipeline.config.live_scores_cron))?;
    sched.add(job).await.context("adding live job")?;

    Ok(Some(sched))
}

/// Render a table as tab-separated text with a header line.
pub fn render_tsv(table: &Table, limit: Option<usize>) -> String {
    let mut out = table.columns().join("\t");
    out.push('\n');
    for row in table.rows().iter().take(limit.unwrap_or(usize::MAX)) {
        let line: Vec<String> = row.iter().map(Cell::to_string).collect();
        out.push_str(&line.join("\t"));
        out.push('\n');
    }
    out
}
