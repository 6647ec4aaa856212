use chrono::{Duration, NaiveDate};
use pinboard_core::{Cell, Table, LIVE_SCORES_COLUMNS, SCHEDULE_COLUMNS};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use tracing::debug;

use crate::{decode_rows, push_row_logged, Loose};

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum GameEntry {
    Wrapped { game: RawGame },
    Bare(RawGame),
}

impl GameEntry {
    fn into_game(self) -> RawGame {
        match self {
            GameEntry::Wrapped { game } | GameEntry::Bare(game) => game,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct RawGame {
    #[serde(rename = "gameID")]
    game_id: Loose,
    game_state: Loose,
    start_date: Loose,
    start_time: Loose,
    start_time_epoch: Loose,
    network: Loose,
    final_message: Loose,
    current_period: Loose,
    contest_clock: Loose,
    title: Loose,
    url: Loose,
    away: Option<RawSide>,
    home: Option<RawSide>,
    #[serde(rename = "_fetch_date")]
    fetch_date: Loose,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawSide {
    score: Loose,
    rank: Loose,
    winner: Loose,
    /// Win-loss record text, e.g. `"(12-1)"`.
    description: Loose,
    names: Option<RawNames>,
    conferences: Option<Vec<RawConference>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawNames {
    short: Loose,
    full: Loose,
    seo: Loose,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct RawConference {
    conference_name: Loose,
}

impl RawSide {
    fn name(&self, pick: impl Fn(&RawNames) -> &Loose) -> Cell {
        self.names
            .as_ref()
            .map(|n| pick(n).text_cell())
            .unwrap_or_else(|| Cell::text(""))
    }

    fn conference(&self) -> Cell {
        self.conferences
            .as_ref()
            .and_then(|c| c.first())
            .map(|c| c.conference_name.text_cell())
            .unwrap_or_else(|| Cell::text(""))
    }
}

/// Map a raw `gameState` onto `Final`, `Live` or `Upcoming`; unknown codes are
/// title-cased rather than rejected.
pub fn classify_game_state(state: &str) -> String {
    let state = state.trim().to_lowercase();
    match state.as_str() {
        "final" => "Final".to_string(),
        "live" => "Live".to_string(),
        "pre" | "" => "Upcoming".to_string(),
        other => title_case(other),
    }
}

fn title_case(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut in_word = false;
    for ch in raw.chars() {
        if ch.is_alphabetic() {
            if in_word {
                out.extend(ch.to_lowercase());
            } else {
                out.extend(ch.to_uppercase());
            }
            in_word = true;
        } else {
            out.push(ch);
            in_word = false;
        }
    }
    out
}

/// `MM-DD-YYYY` to ISO; anything else passes through unchanged.
fn iso_date(raw: &str) -> String {
    NaiveDate::parse_from_str(raw, "%m-%d-%Y")
        .map(|d| d.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|_| raw.to_string())
}

fn side_cells(side: &RawSide) -> [Cell; 8] {
    [
        side.name(|n| &n.short),
        side.name(|n| &n.full),
        side.name(|n| &n.seo),
        side.score.int_cell(),
        side.rank.int_cell(),
        side.description.text_cell(),
        Cell::Bool(side.winner.flag()),
        side.conference(),
    ]
}

/// Normalize a scoreboard response into the `live_scores` table.
pub fn transform_scoreboard(raw: Option<&JsonValue>) -> Table {
    let mut table = Table::empty(LIVE_SCORES_COLUMNS);
    let games = decode_rows::<GameEntry>(raw, "games", "scoreboard");

    for game in games.into_iter().map(GameEntry::into_game) {
        let away = game.away.unwrap_or_default();
        let home = game.home.unwrap_or_default();

        let mut row = vec![
            game.game_id.text_cell(),
            game.game_state.text_cell(),
            Cell::Text(iso_date(&game.start_date.text())),
            game.start_time.text_cell(),
            game.start_time_epoch.text_cell(),
            game.network.text_cell(),
            game.final_message.text_cell(),
            game.current_period.text_cell(),
            game.contest_clock.text_cell(),
            game.title.text_cell(),
            game.url.text_cell(),
        ];
        row.extend(side_cells(&away));
        row.extend(side_cells(&home));
        push_row_logged(&mut table, row, "live_scores");
    }
    table
}

/// Build the `schedule` table from scoreboard games tagged with `_fetch_date`,
/// sorted by date.
pub fn build_schedule(games: &[JsonValue]) -> Table {
    let mut table = Table::empty(SCHEDULE_COLUMNS);

    for raw in games {
        let game = match RawGame::deserialize(raw) {
            Ok(game) => game,
            Err(err) => {
                debug!(error = %err, "skipping malformed schedule game");
                continue;
            }
        };
        let away = game.away.unwrap_or_default();
        let home = game.home.unwrap_or_default();
        let state = if game.game_state.is_missing() {
            "pre".to_string()
        } else {
            game.game_state.text()
        };
        let date: Cell = NaiveDate::parse_from_str(game.fetch_date.text().trim(), "%Y-%m-%d")
            .ok()
            .map(|d| d.format("%Y-%m-%d").to_string())
            .into();

        let row = vec![
            game.game_id.text_cell(),
            date,
            game.start_time.text_cell(),
            game.start_time_epoch.text_cell(),
            away.name(|n| &n.short),
            away.rank.int_cell(),
            home.name(|n| &n.short),
            home.rank.int_cell(),
            game.network.text_cell(),
            // The scoreboard carries no venue.
            Cell::text(""),
            Cell::Text(classify_game_state(&state)),
            away.score.int_cell(),
            home.score.int_cell(),
            game.title.text_cell(),
            game.url.text_cell(),
        ];
        push_row_logged(&mut table, row, "schedule");
    }

    table.sort_by_column("date");
    table
}

fn row_date(row: &pinboard_core::Row<'_>) -> Option<NaiveDate> {
    row.get("date")
        .and_then(Cell::as_str)
        .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
}

/// Schedule rows dated `today` or later.
pub fn upcoming_games(schedule: &Table, today: NaiveDate) -> Table {
    schedule.filter(|row| row_date(row).is_some_and(|d| d >= today))
}

/// Final results from the last `days_back` days, newest first.
pub fn recent_results(schedule: &Table, today: NaiveDate, days_back: i64) -> Table {
    let cutoff = today - Duration::days(days_back);
    let mut recent = schedule.filter(|row| {
        row.get("status").and_then(Cell::as_str) == Some("Final")
            && row_date(row).is_some_and(|d| d >= cutoff)
    });
    recent.sort_by_column_desc("date");
    recent
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn dual(id: &str, state: &str, fetch_date: &str) -> JsonValue {
        json!({
            "gameID": id,
            "gameState": state,
            "startTime": "7:00PM ET",
            "away": {"score": "12", "rank": "1", "names": {"short": "Iowa"}},
            "home": {"score": "24", "rank": "2", "names": {"short": "Penn St."}},
            "_fetch_date": fetch_date,
        })
    }

    #[test]
    fn game_states_classify_case_insensitively() {
        assert_eq!(classify_game_state("FINAL"), "Final");
        assert_eq!(classify_game_state(" live "), "Live");
        assert_eq!(classify_game_state("pre"), "Upcoming");
        assert_eq!(classify_game_state(""), "Upcoming");
        assert_eq!(classify_game_state("postponed"), "Postponed");
        assert_eq!(classify_game_state("half-time"), "Half-Time");
    }

    #[test]
    fn scoreboard_flattens_both_sides() {
        let raw = json!({"games": [{"game": {
            "gameID": "6154104",
            "gameState": "final",
            "startDate": "02-01-2025",
            "away": {"score": "12", "rank": "1", "winner": false, "description": "(12-1)",
                     "names": {"short": "Iowa", "full": "University of Iowa", "seo": "iowa"},
                     "conferences": [{"conferenceName": "Big Ten"}]},
            "home": {"score": "24", "rank": "2", "winner": true,
                     "names": {"short": "Penn St.", "seo": "penn-st"}}
        }}]});
        let table = transform_scoreboard(Some(&raw));

        assert_eq!(table.columns(), LIVE_SCORES_COLUMNS);
        assert_eq!(table.get(0, "game_id"), Some(&Cell::text("6154104")));
        assert_eq!(table.get(0, "start_date"), Some(&Cell::text("2025-02-01")));
        assert_eq!(table.get(0, "away_score"), Some(&Cell::Int(12)));
        assert_eq!(table.get(0, "away_conference"), Some(&Cell::text("Big Ten")));
        assert_eq!(table.get(0, "away_record"), Some(&Cell::text("(12-1)")));
        assert_eq!(table.get(0, "home_winner"), Some(&Cell::Bool(true)));
        assert_eq!(table.get(0, "home_team_full"), Some(&Cell::text("")));
        assert_eq!(table.get(0, "home_conference"), Some(&Cell::text("")));
    }

    #[test]
    fn scoreboard_accepts_unwrapped_games_and_odd_dates() {
        let raw = json!({"games": [{"gameID": 7, "startDate": "TBA"}]});
        let table = transform_scoreboard(Some(&raw));
        assert_eq!(table.get(0, "game_id"), Some(&Cell::text("7")));
        assert_eq!(table.get(0, "start_date"), Some(&Cell::text("TBA")));
        assert_eq!(table.get(0, "away_score"), Some(&Cell::Null));
    }

    #[test]
    fn scoreboard_skips_a_junk_entry_and_keeps_the_rest() {
        let raw = json!({"games": [
            {"game": {"gameID": "1", "gameState": "live"}},
            "oops",
            null,
            {"game": {"gameID": "2", "gameState": "final"}}
        ]});
        let table = transform_scoreboard(Some(&raw));
        assert_eq!(table.len(), 2);
        assert_eq!(table.get(0, "game_id"), Some(&Cell::text("1")));
        assert_eq!(table.get(1, "game_id"), Some(&Cell::text("2")));
    }

    #[test]
    fn empty_scoreboard_keeps_live_schema() {
        let table = transform_scoreboard(Some(&json!({"games": []})));
        assert!(table.is_empty());
        assert_eq!(table.columns(), LIVE_SCORES_COLUMNS);
        assert_eq!(transform_scoreboard(None).columns(), LIVE_SCORES_COLUMNS);
    }

    #[test]
    fn schedule_sorts_by_fetch_date_and_classifies() {
        let games = vec![
            dual("2", "pre", "2025-02-03"),
            dual("1", "final", "2025-02-01"),
            json!({"gameID": "3", "_fetch_date": "2025-02-02"}),
        ];
        let table = build_schedule(&games);

        assert_eq!(table.columns(), SCHEDULE_COLUMNS);
        let ids: Vec<String> = table.iter().map(|r| r.get("game_id").unwrap().to_string()).collect();
        assert_eq!(ids, vec!["1", "3", "2"]);
        assert_eq!(table.get(0, "status"), Some(&Cell::text("Final")));
        assert_eq!(table.get(1, "status"), Some(&Cell::text("Upcoming")));
        assert_eq!(table.get(0, "home_team"), Some(&Cell::text("Penn St.")));
        assert_eq!(table.get(0, "location"), Some(&Cell::text("")));
    }

    #[test]
    fn upcoming_and_recent_windows() {
        let schedule = build_schedule(&[
            dual("old", "final", "2025-01-20"),
            dual("a", "final", "2025-02-01"),
            dual("b", "final", "2025-02-03"),
            dual("c", "live", "2025-02-04"),
            dual("d", "pre", "2025-02-10"),
        ]);
        let today = NaiveDate::from_ymd_opt(2025, 2, 4).unwrap();

        let upcoming = upcoming_games(&schedule, today);
        let ids: Vec<String> = upcoming.iter().map(|r| r.get("game_id").unwrap().to_string()).collect();
        assert_eq!(ids, vec!["c", "d"]);

        let recent = recent_results(&schedule, today, 7);
        let ids: Vec<String> = recent.iter().map(|r| r.get("game_id").unwrap().to_string()).collect();
        assert_eq!(ids, vec!["b", "a"]);
    }
}
