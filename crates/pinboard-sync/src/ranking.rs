//! Composite site ranking: min-max normalized sub-scores blended with fixed
//! weights, ranked within each study and bucketed into performance tiers.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use pinboard_core::{Cell, Table, TableError, SITE_RANKINGS_COLUMNS};
use serde::Serialize;
use thiserror::Error;

/// Weights must sum to 1 within this tolerance.
pub const WEIGHT_TOLERANCE: f64 = 1e-9;

/// Upper-inclusive tier cut points over `[0, 1]`.
pub const TIER_CUTS: [f64; 3] = [0.35, 0.55, 0.75];

#[derive(Debug, Error, PartialEq)]
pub enum RankingError {
    #[error("ranking weights sum to {sum}, expected 1.0")]
    WeightSum { sum: f64 },
    #[error("ranking weight for {metric} is negative or not finite")]
    BadWeight { metric: &'static str },
    #[error("sites table is missing required column `{0}`")]
    MissingColumn(String),
    #[error(transparent)]
    Table(#[from] TableError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    HigherIsBetter,
    LowerIsBetter,
}

/// One ranked metric: raw sites column, output sub-score column, direction.
#[derive(Debug, Clone, Copy)]
pub struct Metric {
    pub input: &'static str,
    pub output: &'static str,
    pub direction: Direction,
}

pub const METRICS: [Metric; 6] = [
    Metric {
        input: "enrollment_rate_per_month",
        output: "enrollment_score",
        direction: Direction::HigherIsBetter,
    },
    Metric {
        input: "quality_score",
        output: "quality_norm",
        direction: Direction::HigherIsBetter,
    },
    Metric {
        input: "screen_fail_rate",
        output: "screen_fail_score",
        direction: Direction::LowerIsBetter,
    },
    Metric {
        input: "query_rate_per_100_crfs",
        output: "query_score",
        direction: Direction::LowerIsBetter,
    },
    Metric {
        input: "protocol_deviations",
        output: "deviation_score",
        direction: Direction::LowerIsBetter,
    },
    Metric {
        input: "days_to_activate",
        output: "activation_score",
        direction: Direction::LowerIsBetter,
    },
];

const GROUP_COLUMN: &str = "study_id";
const PASSTHROUGH_COLUMNS: [&str; 5] = ["study_id", "site_id", "site_name", "country", "investigator"];

/// Sub-score for a metric with no value on a row.
const NEUTRAL_SCORE: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RankingWeights {
    pub enrollment: f64,
    pub quality: f64,
    pub screen_fail: f64,
    pub query: f64,
    pub deviation: f64,
    pub activation: f64,
}

impl Default for RankingWeights {
    fn default() -> Self {
        Self {
            enrollment: 0.25,
            quality: 0.20,
            screen_fail: 0.15,
            query: 0.15,
            deviation: 0.15,
            activation: 0.10,
        }
    }
}

impl RankingWeights {
    /// Weights in [`METRICS`] order.
    pub fn as_array(&self) -> [f64; 6] {
        [
            self.enrollment,
            self.quality,
            self.screen_fail,
            self.query,
            self.deviation,
            self.activation,
        ]
    }

    pub fn validate(&self) -> Result<(), RankingError> {
        for (weight, metric) in self.as_array().iter().zip(METRICS.iter()) {
            if !weight.is_finite() || *weight < 0.0 {
                return Err(RankingError::BadWeight {
                    metric: metric.output,
                });
            }
        }
        let sum: f64 = self.as_array().iter().sum();
        if (sum - 1.0).abs() > WEIGHT_TOLERANCE {
            return Err(RankingError::WeightSum { sum });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum PerformanceTier {
    Underperforming,
    BelowAverage,
    Good,
    TopPerformer,
}

impl PerformanceTier {
    pub fn label(self) -> &'static str {
        match self {
            PerformanceTier::Underperforming => "Underperforming",
            PerformanceTier::BelowAverage => "Below Average",
            PerformanceTier::Good => "Good",
            PerformanceTier::TopPerformer => "Top Performer",
        }
    }
}

/// Bucket a composite score. Bins are upper-inclusive; 0, anything below and
/// NaN land in the lowest tier.
pub fn tier_for(score: f64) -> PerformanceTier {
    if score.is_nan() || score <= TIER_CUTS[0] {
        PerformanceTier::Underperforming
    } else if score <= TIER_CUTS[1] {
        PerformanceTier::BelowAverage
    } else if score <= TIER_CUTS[2] {
        PerformanceTier::Good
    } else {
        PerformanceTier::TopPerformer
    }
}

/// `(x - min) / (max - min)` over the present values. A constant column, or one
/// whose span overflows, maps every present value to 0.5; missing values stay
/// missing.
pub fn min_max_normalize(values: &[Option<f64>]) -> Vec<Option<f64>> {
    let present = values.iter().flatten().copied();
    let (min, max) = present.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
        (lo.min(v), hi.max(v))
    });
    let span = max - min;
    values
        .iter()
        .map(|v| {
            v.map(|x| {
                if span == 0.0 || !span.is_finite() {
                    0.5
                } else {
                    (x - min) / span
                }
            })
        })
        .collect()
}

/// Competition ranking of `scores` within each group, highest score first:
/// ties share the minimum rank and the next distinct score skips past them.
pub fn rank_within_group(scores: &[f64], groups: &[String]) -> Vec<u32> {
    let mut members: HashMap<&str, Vec<usize>> = HashMap::new();
    for (idx, group) in groups.iter().enumerate().take(scores.len()) {
        members.entry(group.as_str()).or_default().push(idx);
    }

    let mut ranks = vec![0u32; scores.len()];
    for mut idxs in members.into_values() {
        idxs.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));
        let mut rank = 1u32;
        for (pos, &idx) in idxs.iter().enumerate() {
            if pos > 0 && scores[idx] != scores[idxs[pos - 1]] {
                rank = pos as u32 + 1;
            }
            ranks[idx] = rank;
        }
    }
    ranks
}

fn numeric(cell: &Cell) -> Option<f64> {
    match cell {
        Cell::Text(s) => s.trim().parse::<f64>().ok().filter(|v| v.is_finite()),
        other => other.as_f64(),
    }
}

/// Run report for one ranking pass.
#[derive(Debug, Clone, Serialize)]
pub struct RankingSummary {
    pub n_sites_ranked: usize,
    pub tier_distribution: BTreeMap<String, usize>,
    pub avg_composite_score: f64,
    pub weights_used: RankingWeights,
    pub computed_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct SiteRankingEngine {
    weights: RankingWeights,
}

impl Default for SiteRankingEngine {
    fn default() -> Self {
        Self {
            weights: RankingWeights::default(),
        }
    }
}

impl SiteRankingEngine {
    pub fn new(weights: RankingWeights) -> Result<Self, RankingError> {
        weights.validate()?;
        Ok(Self { weights })
    }

    pub fn weights(&self) -> &RankingWeights {
        &self.weights
    }

    /// Score, rank and tier every site. The output follows the
    /// `site_rankings` schema sorted by `(study_id, rank_within_study)`.
    pub fn rank_sites(&self, sites: &Table) -> Result<Table, RankingError> {
        for column in std::iter::once(GROUP_COLUMN).chain(METRICS.iter().map(|m| m.input)) {
            if !sites.has_column(column) {
                return Err(RankingError::MissingColumn(column.to_string()));
            }
        }

        let sub_scores: Vec<Vec<Option<f64>>> = METRICS
            .iter()
            .map(|metric| {
                let raw: Vec<Option<f64>> = sites
                    .iter()
                    .map(|row| row.get(metric.input).and_then(numeric))
                    .collect();
                let normalized = min_max_normalize(&raw);
                match metric.direction {
                    Direction::HigherIsBetter => normalized,
                    Direction::LowerIsBetter => {
                        normalized.into_iter().map(|v| v.map(|x| 1.0 - x)).collect()
                    }
                }
            })
            .collect();

        let weights = self.weights.as_array();
        let composite: Vec<f64> = (0..sites.len())
            .map(|row| {
                sub_scores
                    .iter()
                    .zip(weights)
                    .map(|(scores, w)| scores[row].unwrap_or(NEUTRAL_SCORE) * w)
                    .sum::<f64>()
                    .clamp(0.0, 1.0)
            })
            .collect();

        let groups: Vec<String> = sites
            .iter()
            .map(|row| row.get(GROUP_COLUMN).map(|c| c.to_string()).unwrap_or_default())
            .collect();
        let ranks = rank_within_group(&composite, &groups);

        let mut out = Table::empty(SITE_RANKINGS_COLUMNS);
        for (idx, row) in sites.iter().enumerate() {
            let mut cells: Vec<Cell> = PASSTHROUGH_COLUMNS
                .iter()
                .map(|c| row.get(c).cloned().unwrap_or_default())
                .collect();
            cells.extend(sub_scores.iter().map(|scores| Cell::from(scores[idx])));
            cells.push(Cell::Float(composite[idx]));
            cells.push(Cell::Int(i64::from(ranks[idx])));
            cells.push(Cell::text(tier_for(composite[idx]).label()));
            out.push_row(cells)?;
        }
        out.sort_by_columns(&["study_id", "rank_within_study"]);
        Ok(out)
    }

    pub fn summarize(&self, rankings: &Table) -> RankingSummary {
        let mut tier_distribution = BTreeMap::new();
        for tier in rankings
            .column("performance_tier")
            .unwrap_or_default()
            .into_iter()
            .filter_map(Cell::as_str)
        {
            *tier_distribution.entry(tier.to_string()).or_insert(0) += 1;
        }

        let scores: Vec<f64> = rankings
            .column("composite_rank_score")
            .unwrap_or_default()
            .into_iter()
            .filter_map(Cell::as_f64)
            .collect();
        let avg = if scores.is_empty() {
            0.0
        } else {
            scores.iter().sum::<f64>() / scores.len() as f64
        };

        RankingSummary {
            n_sites_ranked: rankings.len(),
            tier_distribution,
            avg_composite_score: (avg * 10_000.0).round() / 10_000.0,
            weights_used: self.weights,
            computed_at: Utc::now(),
        }
    }
}
