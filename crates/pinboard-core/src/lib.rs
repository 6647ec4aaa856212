//! Core table model and artifact catalogue for Pinboard.

use std::cmp::Ordering;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const CRATE_NAME: &str = "pinboard-core";

/// One table cell. `Null` is the missing-value marker produced by failed coercions.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Cell {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl Cell {
    pub fn text(value: impl Into<String>) -> Self {
        Cell::Text(value.into())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Cell::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Cell::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Numeric view of the cell; integers widen to floats.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Cell::Int(v) => Some(*v as f64),
            Cell::Float(v) if v.is_finite() => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Cell::Text(v) => Some(v.as_str()),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Cell::Bool(v) => Some(*v),
            _ => None,
        }
    }

    fn kind_rank(&self) -> u8 {
        match self {
            Cell::Bool(_) => 0,
            Cell::Int(_) | Cell::Float(_) => 1,
            Cell::Text(_) => 2,
            Cell::Null => 3,
        }
    }

    /// Ascending order with nulls last; ints and floats compare numerically.
    pub fn sort_cmp(&self, other: &Cell) -> Ordering {
        match (self, other) {
            (Cell::Int(a), Cell::Int(b)) => a.cmp(b),
            (Cell::Bool(a), Cell::Bool(b)) => a.cmp(b),
            (Cell::Text(a), Cell::Text(b)) => a.cmp(b),
            (a, b) if a.kind_rank() == 1 && b.kind_rank() == 1 => {
                let (x, y) = (a.as_f64(), b.as_f64());
                match (x, y) {
                    (Some(x), Some(y)) => x.total_cmp(&y),
                    (Some(_), None) => Ordering::Less,
                    (None, Some(_)) => Ordering::Greater,
                    (None, None) => Ordering::Equal,
                }
            }
            (a, b) => a.kind_rank().cmp(&b.kind_rank()),
        }
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Null => Ok(()),
            Cell::Bool(v) => write!(f, "{v}"),
            Cell::Int(v) => write!(f, "{v}"),
            Cell::Float(v) => write!(f, "{v}"),
            Cell::Text(v) => f.write_str(v),
        }
    }
}

impl From<i64> for Cell {
    fn from(value: i64) -> Self {
        Cell::Int(value)
    }
}

impl From<f64> for Cell {
    fn from(value: f64) -> Self {
        Cell::Float(value)
    }
}

impl From<bool> for Cell {
    fn from(value: bool) -> Self {
        Cell::Bool(value)
    }
}

impl From<&str> for Cell {
    fn from(value: &str) -> Self {
        Cell::Text(value.to_string())
    }
}

impl From<String> for Cell {
    fn from(value: String) -> Self {
        Cell::Text(value)
    }
}

impl<T: Into<Cell>> From<Option<T>> for Cell {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Cell::Null)
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum TableError {
    #[error("row has {actual} cells but table has {expected} columns")]
    RowWidth { expected: usize, actual: usize },
    #[error("column `{column}` has {actual} cells but table has {expected} rows")]
    ColumnLength {
        column: String,
        expected: usize,
        actual: usize,
    },
}

/// A named-column table. Every row carries exactly one cell per column.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<Cell>>,
}

impl Table {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    /// Zero-row table with the given schema.
    pub fn empty(columns: &[&str]) -> Self {
        Self::new(columns.iter().map(|c| c.to_string()).collect())
    }

    /// Build from insertion-ordered records. The column set is the union of all
    /// record keys in first-seen order; absent cells become `Null`.
    pub fn from_records(records: Vec<Vec<(String, Cell)>>) -> Self {
        let mut columns: Vec<String> = Vec::new();
        for record in &records {
            for (key, _) in record {
                if !columns.iter().any(|c| c == key) {
                    columns.push(key.clone());
                }
            }
        }

        let rows = records
            .into_iter()
            .map(|record| {
                let mut row = vec![Cell::Null; columns.len()];
                for (key, cell) in record {
                    if let Some(idx) = columns.iter().position(|c| *c == key) {
                        row[idx] = cell;
                    }
                }
                row
            })
            .collect();

        Self { columns, rows }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Cell>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    pub fn get(&self, row: usize, column: &str) -> Option<&Cell> {
        let idx = self.column_index(column)?;
        self.rows.get(row).and_then(|r| r.get(idx))
    }

    /// All cells of one column, top to bottom.
    pub fn column(&self, name: &str) -> Option<Vec<&Cell>> {
        let idx = self.column_index(name)?;
        Some(self.rows.iter().map(|r| &r[idx]).collect())
    }

    pub fn iter(&self) -> impl Iterator<Item = Row<'_>> {
        self.rows.iter().map(move |cells| Row {
            columns: &self.columns,
            cells,
        })
    }

    pub fn push_row(&mut self, row: Vec<Cell>) -> Result<(), TableError> {
        if row.len() != self.columns.len() {
            return Err(TableError::RowWidth {
                expected: self.columns.len(),
                actual: row.len(),
            });
        }
        self.rows.push(row);
        Ok(())
    }

    /// Replace the named column, or append it when absent.
    pub fn set_column(&mut self, name: &str, cells: Vec<Cell>) -> Result<(), TableError> {
        if cells.len() != self.rows.len() {
            return Err(TableError::ColumnLength {
                column: name.to_string(),
                expected: self.rows.len(),
                actual: cells.len(),
            });
        }
        match self.column_index(name) {
            Some(idx) => {
                for (row, cell) in self.rows.iter_mut().zip(cells) {
                    row[idx] = cell;
                }
            }
            None => {
                self.columns.push(name.to_string());
                for (row, cell) in self.rows.iter_mut().zip(cells) {
                    row.push(cell);
                }
            }
        }
        Ok(())
    }

    /// Append any missing column from `names`, filled with `Null`.
    pub fn ensure_columns(&mut self, names: &[&str]) {
        for name in names {
            if !self.has_column(name) {
                self.columns.push(name.to_string());
                for row in &mut self.rows {
                    row.push(Cell::Null);
                }
            }
        }
    }

    pub fn rename_column(&mut self, from: &str, to: &str) {
        if self.has_column(to) {
            return;
        }
        if let Some(idx) = self.column_index(from) {
            self.columns[idx] = to.to_string();
        }
    }

    /// Stable ascending sort on the given columns, nulls last. Unknown columns are ignored.
    pub fn sort_by_columns(&mut self, names: &[&str]) {
        let indices: Vec<usize> = names.iter().filter_map(|n| self.column_index(n)).collect();
        if indices.is_empty() {
            return;
        }
        self.rows.sort_by(|a, b| {
            indices
                .iter()
                .map(|&i| a[i].sort_cmp(&b[i]))
                .find(|o| *o != Ordering::Equal)
                .unwrap_or(Ordering::Equal)
        });
    }

    pub fn sort_by_column(&mut self, name: &str) {
        self.sort_by_columns(&[name]);
    }

    /// Stable descending sort on one column; nulls still sort last.
    pub fn sort_by_column_desc(&mut self, name: &str) {
        let Some(idx) = self.column_index(name) else {
            return;
        };
        self.rows.sort_by(|a, b| match (a[idx].is_null(), b[idx].is_null()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Greater,
            (false, true) => Ordering::Less,
            (false, false) => b[idx].sort_cmp(&a[idx]),
        });
    }

    pub fn filter(&self, mut keep: impl FnMut(&Row<'_>) -> bool) -> Table {
        let rows = self
            .iter()
            .filter(|row| keep(row))
            .map(|row| row.cells.to_vec())
            .collect();
        Table {
            columns: self.columns.clone(),
            rows,
        }
    }

    /// Project onto `names` in that order; unknown names become `Null` columns.
    pub fn select(&self, names: &[&str]) -> Table {
        let indices: Vec<Option<usize>> = names.iter().map(|n| self.column_index(n)).collect();
        let rows = self
            .rows
            .iter()
            .map(|r| {
                indices
                    .iter()
                    .map(|i| i.map(|i| r[i].clone()).unwrap_or(Cell::Null))
                    .collect()
            })
            .collect();
        Table {
            columns: names.iter().map(|n| n.to_string()).collect(),
            rows,
        }
    }
}

/// Borrowed view of one table row.
#[derive(Debug, Clone, Copy)]
pub struct Row<'a> {
    columns: &'a [String],
    cells: &'a [Cell],
}

impl<'a> Row<'a> {
    pub fn get(&self, column: &str) -> Option<&'a Cell> {
        let idx = self.columns.iter().position(|c| c == column)?;
        self.cells.get(idx)
    }

    pub fn cells(&self) -> &'a [Cell] {
        self.cells
    }
}

/// Metadata persisted next to every artifact data file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactMeta {
    pub name: String,
    pub rows: usize,
    pub columns: Vec<String>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub file: Option<String>,
    #[serde(default)]
    pub file_size: Option<u64>,
    #[serde(default)]
    pub file_sha256: Option<String>,
}

pub const RANKINGS_COLUMNS: &[&str] = &[
    "rank",
    "school",
    "votes",
    "points",
    "previous_rank",
    "record",
    "wins",
    "losses",
    "movement",
];

pub const TEAM_STATS_COLUMNS: &[&str] = &["rank", "team", "wins", "losses", "win_pct"];

pub const STANDINGS_COLUMNS: &[&str] = &[
    "conference",
    "team",
    "conf_wins",
    "conf_losses",
    "overall_wins",
    "overall_losses",
];

pub const SCHOOLS_COLUMNS: &[&str] = &["slug", "name", "full_name"];

pub const SCHEDULE_COLUMNS: &[&str] = &[
    "game_id",
    "date",
    "start_time",
    "start_time_epoch",
    "away_team",
    "away_rank",
    "home_team",
    "home_rank",
    "network",
    "location",
    "status",
    "away_score",
    "home_score",
    "title",
    "url",
];

pub const LIVE_SCORES_COLUMNS: &[&str] = &[
    "game_id",
    "game_state",
    "start_date",
    "start_time",
    "start_time_epoch",
    "network",
    "final_message",
    "current_period",
    "contest_clock",
    "title",
    "url",
    "away_team",
    "away_team_full",
    "away_team_seo",
    "away_score",
    "away_rank",
    "away_record",
    "away_winner",
    "away_conference",
    "home_team",
    "home_team_full",
    "home_team_seo",
    "home_score",
    "home_rank",
    "home_record",
    "home_winner",
    "home_conference",
];

pub const SITES_COLUMNS: &[&str] = &[
    "study_id",
    "site_id",
    "site_name",
    "country",
    "investigator",
    "enrollment_rate_per_month",
    "quality_score",
    "screen_fail_rate",
    "query_rate_per_100_crfs",
    "protocol_deviations",
    "days_to_activate",
];

pub const SITE_RANKINGS_COLUMNS: &[&str] = &[
    "study_id",
    "site_id",
    "site_name",
    "country",
    "investigator",
    "enrollment_score",
    "quality_norm",
    "screen_fail_score",
    "query_score",
    "deviation_score",
    "activation_score",
    "composite_rank_score",
    "rank_within_study",
    "performance_tier",
];

/// Artifacts produced by the ETL jobs and read by the dashboards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactName {
    Rankings,
    TeamStats,
    IndividualStats,
    Standings,
    Schools,
    Schedule,
    LiveScores,
    Sites,
    SiteRankings,
}

impl ArtifactName {
    pub const ALL: [ArtifactName; 9] = [
        ArtifactName::Rankings,
        ArtifactName::TeamStats,
        ArtifactName::IndividualStats,
        ArtifactName::Standings,
        ArtifactName::Schools,
        ArtifactName::Schedule,
        ArtifactName::LiveScores,
        ArtifactName::Sites,
        ArtifactName::SiteRankings,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ArtifactName::Rankings => "rankings",
            ArtifactName::TeamStats => "team_stats",
            ArtifactName::IndividualStats => "individual_stats",
            ArtifactName::Standings => "standings",
            ArtifactName::Schools => "schools",
            ArtifactName::Schedule => "schedule",
            ArtifactName::LiveScores => "live_scores",
            ArtifactName::Sites => "sites",
            ArtifactName::SiteRankings => "site_rankings",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|a| a.as_str() == name)
    }

    pub fn columns(self) -> &'static [&'static str] {
        match self {
            ArtifactName::Rankings => RANKINGS_COLUMNS,
            ArtifactName::TeamStats | ArtifactName::IndividualStats => TEAM_STATS_COLUMNS,
            ArtifactName::Standings => STANDINGS_COLUMNS,
            ArtifactName::Schools => SCHOOLS_COLUMNS,
            ArtifactName::Schedule => SCHEDULE_COLUMNS,
            ArtifactName::LiveScores => LIVE_SCORES_COLUMNS,
            ArtifactName::Sites => SITES_COLUMNS,
            ArtifactName::SiteRankings => SITE_RANKINGS_COLUMNS,
        }
    }
}

impl fmt::Display for ArtifactName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Documented schema for an artifact name; unknown names have none.
pub fn documented_columns(name: &str) -> &'static [&'static str] {
    ArtifactName::parse(name).map(ArtifactName::columns).unwrap_or(&[])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(pairs: &[(&str, Cell)]) -> Vec<(String, Cell)> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn from_records_unions_columns_in_first_seen_order() {
        let table = Table::from_records(vec![
            rec(&[("a", Cell::Int(1)), ("b", Cell::text("x"))]),
            rec(&[("c", Cell::Bool(true)), ("a", Cell::Int(2))]),
        ]);
        assert_eq!(table.columns(), &["a", "b", "c"]);
        assert_eq!(table.get(1, "b"), Some(&Cell::Null));
        assert_eq!(table.get(1, "a"), Some(&Cell::Int(2)));
        assert_eq!(table.get(0, "c"), Some(&Cell::Null));
    }

    #[test]
    fn sort_puts_nulls_last_and_is_stable() {
        let mut table = Table::empty(&["rank", "name"]);
        table.push_row(vec![Cell::Null, "z".into()]).unwrap();
        table.push_row(vec![Cell::Int(2), "b".into()]).unwrap();
        table.push_row(vec![Cell::Float(1.5), "a".into()]).unwrap();
        table.push_row(vec![Cell::Int(2), "c".into()]).unwrap();
        table.sort_by_column("rank");
        let names: Vec<String> = table
            .column("name")
            .unwrap()
            .into_iter()
            .map(|c| c.to_string())
            .collect();
        assert_eq!(names, vec!["a", "b", "c", "z"]);

        table.sort_by_column_desc("rank");
        let names: Vec<String> = table.iter().map(|r| r.get("name").unwrap().to_string()).collect();
        assert_eq!(names, vec!["b", "c", "a", "z"]);
    }

    #[test]
    fn push_row_rejects_wrong_width() {
        let mut table = Table::empty(&["a", "b"]);
        assert_eq!(
            table.push_row(vec![Cell::Int(1)]),
            Err(TableError::RowWidth {
                expected: 2,
                actual: 1
            })
        );
    }

    #[test]
    fn ensure_columns_adds_missing_null_columns() {
        let mut table = Table::empty(&["team"]);
        table.push_row(vec!["Iowa".into()]).unwrap();
        table.ensure_columns(TEAM_STATS_COLUMNS);
        assert_eq!(table.columns().len(), 5);
        assert_eq!(table.get(0, "win_pct"), Some(&Cell::Null));
        assert_eq!(table.get(0, "team"), Some(&Cell::text("Iowa")));
    }

    #[test]
    fn unknown_artifact_has_no_documented_schema() {
        assert!(documented_columns("brackets").is_empty());
        assert_eq!(documented_columns("rankings"), RANKINGS_COLUMNS);
        assert_eq!(ArtifactName::parse("live_scores"), Some(ArtifactName::LiveScores));
    }

    #[test]
    fn cell_json_is_untagged() {
        let cells: Vec<Cell> = serde_json::from_str(r#"[null, true, 3, 2.5, "x"]"#).unwrap();
        assert_eq!(
            cells,
            vec![
                Cell::Null,
                Cell::Bool(true),
                Cell::Int(3),
                Cell::Float(2.5),
                Cell::text("x")
            ]
        );
    }
}
