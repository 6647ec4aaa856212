use pinboard_core::{Cell, Table, RANKINGS_COLUMNS};
use serde::Deserialize;
use serde_json::Value as JsonValue;

use crate::{decode_rows, parse_record, parse_school_votes, push_row_logged, Loose};

/// Poll rows arrive with upper-case keys on some polls and title-case on others.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RankingRow {
    #[serde(rename = "RANK")]
    rank_upper: Loose,
    #[serde(rename = "Rank")]
    rank_title: Loose,
    #[serde(rename = "SCHOOL")]
    school_upper: Loose,
    #[serde(rename = "School")]
    school_title: Loose,
    #[serde(rename = "POINTS")]
    points_upper: Loose,
    #[serde(rename = "Points")]
    points_title: Loose,
    #[serde(rename = "PREVIOUS")]
    previous_upper: Loose,
    #[serde(rename = "Previous")]
    previous_title: Loose,
    #[serde(rename = "RECORD")]
    record_upper: Loose,
    #[serde(rename = "Record")]
    record_title: Loose,
}

fn pick<'a>(upper: &'a Loose, title: &'a Loose) -> &'a Loose {
    if upper.is_missing() {
        title
    } else {
        upper
    }
}

impl RankingRow {
    fn into_cells(self) -> Vec<Cell> {
        let rank = pick(&self.rank_upper, &self.rank_title).int();
        let previous = pick(&self.previous_upper, &self.previous_title).int();
        let points = pick(&self.points_upper, &self.points_title).int();
        let (school, votes) = parse_school_votes(&pick(&self.school_upper, &self.school_title).text());
        let record = pick(&self.record_upper, &self.record_title).text();
        let (wins, losses) = parse_record(&record);

        // Zero ranks mean "unranked", so they never produce movement.
        let movement = match (previous, rank) {
            (Some(prev), Some(cur)) if prev != 0 && cur != 0 => prev - cur,
            _ => 0,
        };

        vec![
            rank.into(),
            school.into(),
            votes.into(),
            points.into(),
            previous.into(),
            record.into(),
            wins.into(),
            losses.into(),
            Cell::Int(movement),
        ]
    }
}

/// Normalize a `/rankings` response into the `rankings` table, sorted by rank.
pub fn transform_team_rankings(raw: Option<&JsonValue>) -> Table {
    let mut table = Table::empty(RANKINGS_COLUMNS);
    for row in decode_rows::<RankingRow>(raw, "data", "rankings") {
        push_row_logged(&mut table, row.into_cells(), "rankings");
    }
    table.sort_by_column("rank");
    table
}
