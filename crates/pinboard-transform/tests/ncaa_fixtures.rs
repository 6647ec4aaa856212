use std::path::PathBuf;

use pinboard_core::{Cell, LIVE_SCORES_COLUMNS, RANKINGS_COLUMNS, STANDINGS_COLUMNS};
use pinboard_transform::{
    transform_schools, transform_scoreboard, transform_standings, transform_team_rankings,
    transform_team_stats,
};
use serde_json::Value;

fn fixture(name: &str) -> Value {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("../../fixtures/ncaa")
        .join(name);
    let text = std::fs::read_to_string(&path).unwrap_or_else(|e| panic!("{}: {e}", path.display()));
    serde_json::from_str(&text).expect("fixture json")
}

fn column_text(table: &pinboard_core::Table, column: &str) -> Vec<String> {
    table
        .column(column)
        .expect("column")
        .into_iter()
        .map(|c| c.to_string())
        .collect()
}

#[test]
fn rankings_fixture_normalizes_and_sorts() {
    let table = transform_team_rankings(Some(&fixture("rankings.json")));

    assert_eq!(table.columns(), RANKINGS_COLUMNS);
    assert_eq!(
        column_text(&table, "school"),
        vec!["Penn St.", "Iowa", "Oklahoma St.", "Nebraska"]
    );
    assert_eq!(table.get(0, "votes"), Some(&Cell::Int(16)));
    assert_eq!(table.get(1, "movement"), Some(&Cell::Int(1)));
    assert_eq!(table.get(2, "movement"), Some(&Cell::Int(-2)));
    assert_eq!(table.get(3, "movement"), Some(&Cell::Int(0)));
    assert_eq!(table.get(3, "losses"), Some(&Cell::Int(3)));
}

#[test]
fn scoreboard_fixture_counts_live_games() {
    let table = transform_scoreboard(Some(&fixture("scoreboard.json")));

    assert_eq!(table.columns(), LIVE_SCORES_COLUMNS);
    assert_eq!(table.len(), 2);
    let live = table.filter(|r| r.get("game_state") == Some(&Cell::text("live")));
    assert_eq!(live.len(), 1);
    assert_eq!(table.get(1, "away_rank"), Some(&Cell::Null));
    assert_eq!(table.get(1, "away_conference"), Some(&Cell::text("")));
    assert_eq!(table.get(0, "home_team_full"), Some(&Cell::text("Pennsylvania State University")));
}

#[test]
fn team_stats_fixture_keeps_extra_columns_after_documented_ones() {
    let body = fixture("team_stats.json");
    let rows = body["data"].as_array().cloned().unwrap_or_default();
    let table = transform_team_stats(&rows);

    assert_eq!(column_text(&table, "team"), vec!["Penn St.", "Oklahoma St.", "Iowa"]);
    assert_eq!(table.columns().last().map(String::as_str), Some("falls"));
    assert_eq!(table.get(2, "falls"), Some(&Cell::Int(41)));
    assert_eq!(table.get(0, "falls"), Some(&Cell::Null));
}

#[test]
fn standings_fixture_flattens_every_conference() {
    let table = transform_standings(Some(&fixture("standings.json")));

    assert_eq!(&table.columns()[..STANDINGS_COLUMNS.len()], STANDINGS_COLUMNS);
    assert_eq!(column_text(&table, "conference"), vec!["Big Ten", "Big Ten", "Big 12"]);
    assert_eq!(table.get(1, "conf_pct"), Some(&Cell::text(".778")));
    assert_eq!(table.get(2, "streak"), Some(&Cell::Null));
}

#[test]
fn schools_fixture_is_a_bare_list() {
    let list = fixture("schools.json").as_array().cloned().unwrap_or_default();
    let table = transform_schools(&list);
    assert_eq!(table.len(), 3);
    assert_eq!(column_text(&table, "slug"), vec!["penn-st", "iowa", "oklahoma-st"]);
}
