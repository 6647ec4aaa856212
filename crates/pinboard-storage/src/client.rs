//! Rate-limited JSON API client plus pagination and date-range helpers.

use std::time::{Duration, Instant};

use anyhow::Context;
use async_trait::async_trait;
use chrono::{Datelike, NaiveDate};
use serde_json::Value as JsonValue;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, error, info_span, warn, Instrument};

pub const NCAA_API_BASE: &str = "https://ncaa-api.henrygd.me";
pub const SPORT: &str = "wrestling";
pub const DIVISION: &str = "d1";
pub const DEFAULT_CONFERENCE: &str = "all-conf";
pub const DEFAULT_TEAM_STAT_ID: u32 = 170;
pub const DEFAULT_INDIVIDUAL_STAT_ID: u32 = 171;

/// Field added to every record fetched through [`fetch_date_range`].
pub const FETCH_DATE_FIELD: &str = "_fetch_date";

/// ~4.5 requests/second, under the upstream ceiling of 5/s.
pub const DEFAULT_MIN_INTERVAL: Duration = Duration::from_millis(220);

#[derive(Debug, Clone, Copy)]
pub struct RequestThrottle {
    min_interval: Duration,
    last_request: Option<Instant>,
}

impl RequestThrottle {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_request: None,
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// How long a request issued at `now` has to wait.
    pub fn delay_at(&self, now: Instant) -> Duration {
        match self.last_request {
            Some(last) => self
                .min_interval
                .saturating_sub(now.saturating_duration_since(last)),
            None => Duration::ZERO,
        }
    }

    pub fn record(&mut self, at: Instant) {
        self.last_request = Some(at);
    }
}

#[derive(Debug, Clone)]
pub struct ApiClientConfig {
    pub base_url: String,
    pub timeout: Duration,
    pub min_interval: Duration,
    pub user_agent: Option<String>,
}

impl Default for ApiClientConfig {
    fn default() -> Self {
        Self {
            base_url: NCAA_API_BASE.to_string(),
            timeout: Duration::from_secs(30),
            min_interval: DEFAULT_MIN_INTERVAL,
            user_agent: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("invalid json from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: reqwest::Error,
    },
}

/// Best-effort JSON GET. `None` means "no data", whatever the cause.
#[async_trait]
pub trait JsonSource: Send + Sync {
    async fn get(&self, path: &str, params: &[(&str, String)]) -> Option<JsonValue>;
}

#[derive(Debug)]
pub struct ApiClient {
    client: reqwest::Client,
    base_url: String,
    throttle: Mutex<RequestThrottle>,
}

impl ApiClient {
    pub fn new(config: ApiClientConfig) -> anyhow::Result<Self> {
        // No idle pool: every call opens and releases its own connection.
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout)
            .pool_max_idle_per_host(0);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            throttle: Mutex::new(RequestThrottle::new(config.min_interval)),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn url_for(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Single throttled GET with the failure cause preserved.
    pub async fn try_get(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<JsonValue, FetchError> {
        let url = self.url_for(path);

        // Held for the whole request so calls stay strictly sequential.
        let mut throttle = self.throttle.lock().await;
        let delay = throttle.delay_at(Instant::now());
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let span = info_span!("api_get", url = %url);
        let sent = self
            .client
            .get(&url)
            .query(params)
            .send()
            .instrument(span)
            .await;
        throttle.record(Instant::now());
        drop(throttle);

        let resp = sent.map_err(|source| FetchError::Request {
            url: url.clone(),
            source,
        })?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::HttpStatus {
                status: status.as_u16(),
                url,
            });
        }
        resp.json::<JsonValue>()
            .await
            .map_err(|source| FetchError::Decode { url, source })
    }
}

#[async_trait]
impl JsonSource for ApiClient {
    async fn get(&self, path: &str, params: &[(&str, String)]) -> Option<JsonValue> {
        match self.try_get(path, params).await {
            Ok(value) => Some(value),
            Err(FetchError::HttpStatus { status, url }) => {
                warn!(status, %url, "http status; treating as no data");
                None
            }
            Err(err) => {
                error!(error = %err, "request failed; treating as no data");
                None
            }
        }
    }
}

fn with_page<'a>(params: &[(&'a str, String)], page: u64) -> Vec<(&'a str, String)> {
    let mut out: Vec<(&'a str, String)> = params
        .iter()
        .filter(|(key, _)| *key != "page")
        .cloned()
        .collect();
    out.push(("page", page.to_string()));
    out
}

fn page_count(body: &JsonValue) -> u64 {
    match body.get("pages") {
        Some(JsonValue::Number(n)) => n.as_u64().unwrap_or(1),
        Some(JsonValue::String(s)) => s.trim().parse().unwrap_or(1),
        _ => 1,
    }
}

fn data_rows(body: &JsonValue) -> Vec<JsonValue> {
    body.get("data")
        .and_then(JsonValue::as_array)
        .cloned()
        .unwrap_or_default()
}

/// Fetch page 1, then pages `2..=pages`, concatenating every `data` list.
/// A failed page contributes nothing; a failed first page yields no rows.
pub async fn fetch_all_pages<S>(source: &S, path: &str, params: &[(&str, String)]) -> Vec<JsonValue>
where
    S: JsonSource + ?Sized,
{
    let Some(first) = source.get(path, &with_page(params, 1)).await else {
        return Vec::new();
    };
    let mut rows = data_rows(&first);
    let total_pages = page_count(&first);

    for page in 2..=total_pages {
        match source.get(path, &with_page(params, page)).await {
            Some(body) => rows.extend(data_rows(&body)),
            None => warn!(path, page, "page fetch failed; skipping"),
        }
    }
    debug!(path, pages = total_pages, rows = rows.len(), "fetched paginated endpoint");
    rows
}

/// One request per calendar day in `[start, end]`. Every extracted record is
/// tagged with its fetch date under [`FETCH_DATE_FIELD`].
pub async fn fetch_date_range<S, P, E>(
    source: &S,
    start: NaiveDate,
    end: NaiveDate,
    path_for_day: P,
    extract: E,
) -> Vec<JsonValue>
where
    S: JsonSource + ?Sized,
    P: Fn(NaiveDate) -> String + Send + Sync,
    E: Fn(&JsonValue) -> Vec<JsonValue> + Send + Sync,
{
    let mut records = Vec::new();
    for day in start.iter_days().take_while(|d| *d <= end) {
        let Some(body) = source.get(&path_for_day(day), &[]).await else {
            debug!(%day, "no data for day");
            continue;
        };
        for mut record in extract(&body) {
            if let Some(obj) = record.as_object_mut() {
                obj.insert(
                    FETCH_DATE_FIELD.to_string(),
                    JsonValue::String(day.format("%Y-%m-%d").to_string()),
                );
                records.push(record);
            }
        }
    }
    records
}

/// Games of a scoreboard response, unwrapping the `{game: {...}}` envelope.
pub fn scoreboard_games(body: &JsonValue) -> Vec<JsonValue> {
    body.get("games")
        .and_then(JsonValue::as_array)
        .map(|games| {
            games
                .iter()
                .map(|entry| entry.get("game").unwrap_or(entry).clone())
                .collect()
        })
        .unwrap_or_default()
}

pub fn scoreboard_path(date: NaiveDate, conference: &str) -> String {
    format!(
        "/scoreboard/{SPORT}/{DIVISION}/{}/{:02}/{:02}/{conference}",
        date.year(),
        date.month(),
        date.day()
    )
}

pub fn team_stats_path(stat_id: u32) -> String {
    format!("/stats/{SPORT}/{DIVISION}/current/team/{stat_id}")
}

pub fn individual_stats_path(stat_id: u32) -> String {
    format!("/stats/{SPORT}/{DIVISION}/current/individual/{stat_id}")
}

/// NCAA wrestling endpoints available on any [`JsonSource`].
#[async_trait]
pub trait NcaaEndpoints: JsonSource {
    async fn scoreboard(&self, date: NaiveDate, conference: &str) -> Option<JsonValue> {
        self.get(&scoreboard_path(date, conference), &[]).await
    }

    /// Games across `[start, end]`, each tagged with its fetch date.
    async fn scoreboard_range(&self, start: NaiveDate, end: NaiveDate) -> Vec<JsonValue> {
        fetch_date_range(
            self,
            start,
            end,
            |day| scoreboard_path(day, DEFAULT_CONFERENCE),
            scoreboard_games,
        )
        .await
    }

    async fn rankings(&self, poll: &str) -> Option<JsonValue> {
        self.get(&format!("/rankings/{SPORT}/{DIVISION}/{poll}"), &[])
            .await
    }

    async fn standings(&self, year: i32) -> Option<JsonValue> {
        self.get(&format!("/standings/{SPORT}/{DIVISION}/{year}"), &[])
            .await
    }

    async fn team_stats(&self, stat_id: u32, page: u64) -> Option<JsonValue> {
        self.get(&team_stats_path(stat_id), &[("page", page.to_string())])
            .await
    }

    async fn all_team_stats(&self, stat_id: u32) -> Vec<JsonValue> {
        fetch_all_pages(self, &team_stats_path(stat_id), &[]).await
    }

    async fn individual_stats(&self, stat_id: u32, page: u64) -> Option<JsonValue> {
        self.get(&individual_stats_path(stat_id), &[("page", page.to_string())])
            .await
    }

    async fn all_individual_stats(&self, stat_id: u32) -> Vec<JsonValue> {
        fetch_all_pages(self, &individual_stats_path(stat_id), &[]).await
    }

    /// The schools index is a bare list; anything else counts as empty.
    async fn schools(&self) -> Vec<JsonValue> {
        match self.get("/schools-index", &[]).await {
            Some(JsonValue::Array(items)) => items,
            _ => Vec::new(),
        }
    }

    async fn game_boxscore(&self, game_id: &str) -> Option<JsonValue> {
        self.get(&format!("/game/{game_id}/boxscore"), &[]).await
    }

    async fn game_play_by_play(&self, game_id: &str) -> Option<JsonValue> {
        self.get(&format!("/game/{game_id}/play-by-play"), &[]).await
    }

    async fn game_scoring_summary(&self, game_id: &str) -> Option<JsonValue> {
        self.get(&format!("/game/{game_id}/scoring-summary"), &[])
            .await
    }

    async fn game_team_stats(&self, game_id: &str) -> Option<JsonValue> {
        self.get(&format!("/game/{game_id}/team-stats"), &[]).await
    }
}

impl<T: JsonSource> NcaaEndpoints for T {}
