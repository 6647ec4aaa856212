use pinboard_core::{Cell, Table, SCHOOLS_COLUMNS, STANDINGS_COLUMNS, TEAM_STATS_COLUMNS};
use serde::Deserialize;
use serde_json::Value as JsonValue;

use tracing::warn;

use crate::{coerce_number, decode_rows, push_row_logged, value_to_cell, Loose};

/// Canonical stats column for each accepted raw header spelling (lower-cased).
const STAT_COLUMN_ALIASES: &[(&str, &[&str])] = &[
    ("rank", &["rank", "#"]),
    ("team", &["team", "school", "name"]),
    ("wins", &["w", "wins"]),
    ("losses", &["l", "losses"]),
    ("win_pct", &["pct", "win pct", "winning percentage"]),
    ("games", &["g", "gp", "games"]),
    ("falls", &["falls"]),
    ("tech_falls", &["tech falls", "tf"]),
    ("major_decisions", &["maj. dec.", "major decisions", "md"]),
];

const STAT_NUMERIC_COLUMNS: &[&str] = &[
    "rank",
    "wins",
    "losses",
    "games",
    "falls",
    "tech_falls",
    "major_decisions",
];

const STANDINGS_RENAMES: &[(&str, &str)] = &[
    ("school", "team"),
    ("conference_w", "conf_wins"),
    ("conference_l", "conf_losses"),
    ("conference_pct", "conf_pct"),
    ("overall_w", "overall_wins"),
    ("overall_l", "overall_losses"),
    ("overall_streak", "streak"),
];

const STANDINGS_NUMERIC_COLUMNS: &[&str] =
    &["conf_wins", "conf_losses", "overall_wins", "overall_losses"];

pub fn canonical_stat_column(raw: &str) -> String {
    let lower = raw.trim().to_lowercase();
    STAT_COLUMN_ALIASES
        .iter()
        .find(|(_, spellings)| spellings.contains(&lower.as_str()))
        .map(|(canonical, _)| canonical.to_string())
        .unwrap_or_else(|| lower.replace(' ', "_").replace('.', ""))
}

fn coerce_columns(table: &mut Table, names: &[&str], prepare: impl Fn(&Cell) -> Cell) {
    for name in names {
        let Some(coerced) = table
            .column(name)
            .map(|cells| cells.into_iter().map(|c| coerce_number(&prepare(c))).collect::<Vec<_>>())
        else {
            continue;
        };
        if let Err(err) = table.set_column(name, coerced) {
            warn!(column = *name, error = %err, "column coercion skipped");
        }
    }
}

/// Documented columns first (added as nulls when absent), then any extras in
/// their incoming order. Raw object keys carry no meaningful order.
fn documented_first(table: &Table, documented: &[&str]) -> Table {
    let mut order: Vec<&str> = documented.to_vec();
    order.extend(
        table
            .columns()
            .iter()
            .map(String::as_str)
            .filter(|c| !documented.contains(c)),
    );
    table.select(&order)
}

fn strip_percent(cell: &Cell) -> Cell {
    match cell {
        Cell::Text(s) => Cell::Text(s.replace('%', "")),
        other => other.clone(),
    }
}

/// Normalize team or individual stats rows (the concatenated `data` of every
/// page) with table-driven header renames, sorted by rank.
pub fn transform_team_stats(rows: &[JsonValue]) -> Table {
    let records: Vec<Vec<(String, Cell)>> = rows
        .iter()
        .filter_map(JsonValue::as_object)
        .map(|row| {
            row.iter()
                .map(|(key, value)| (canonical_stat_column(key), value_to_cell(value)))
                .collect()
        })
        .collect();
    if records.is_empty() {
        return Table::empty(TEAM_STATS_COLUMNS);
    }

    let mut table = Table::from_records(records);
    coerce_columns(&mut table, STAT_NUMERIC_COLUMNS, Cell::clone);
    coerce_columns(&mut table, &["win_pct"], strip_percent);
    let mut table = documented_first(&table, TEAM_STATS_COLUMNS);
    table.sort_by_column("rank");
    table
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ConferenceBlock {
    conference: Loose,
    standings: Option<Vec<JsonValue>>,
}

fn standings_key(raw: &str) -> String {
    let clean = raw.trim().to_lowercase().replace(' ', "_");
    STANDINGS_RENAMES
        .iter()
        .find(|(from, _)| *from == clean)
        .map(|(_, to)| to.to_string())
        .unwrap_or(clean)
}

/// Flatten per-conference standings blocks into one `standings` table.
pub fn transform_standings(raw: Option<&JsonValue>) -> Table {
    let mut records = Vec::new();
    for block in decode_rows::<ConferenceBlock>(raw, "data", "standings") {
        let conference = if block.conference.is_missing() {
            "Unknown".to_string()
        } else {
            block.conference.text()
        };
        let teams = block.standings.unwrap_or_default();
        for team in teams.iter().filter_map(JsonValue::as_object) {
            let mut record = vec![("conference".to_string(), Cell::text(&conference))];
            record.extend(
                team.iter()
                    .map(|(key, value)| (standings_key(key), value_to_cell(value))),
            );
            records.push(record);
        }
    }
    if records.is_empty() {
        return Table::empty(STANDINGS_COLUMNS);
    }

    let mut table = Table::from_records(records);
    coerce_columns(&mut table, STANDINGS_NUMERIC_COLUMNS, Cell::clone);
    documented_first(&table, STANDINGS_COLUMNS)
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawSchool {
    slug: Loose,
    name: Loose,
    long: Loose,
}

/// Normalize the schools index (`{slug, name, long}` items) into `schools`.
pub fn transform_schools(list: &[JsonValue]) -> Table {
    let mut table = Table::empty(SCHOOLS_COLUMNS);
    for school in list.iter().filter_map(|v| RawSchool::deserialize(v).ok()) {
        let row = vec![
            school.slug.text_cell(),
            school.name.text_cell(),
            school.long.text_cell(),
        ];
        push_row_logged(&mut table, row, "schools");
    }
    table
}
