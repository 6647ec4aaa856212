//! Normalizers turning raw NCAA API JSON into fixed-schema tables.
//!
//! Every normalizer is pure and infallible: null, empty or mis-shaped input
//! yields a zero-row table carrying the artifact's documented columns.

pub mod rankings;
pub mod records;
pub mod scores;
pub mod teams;

use pinboard_core::{Cell, Table};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use tracing::{debug, warn};

pub use rankings::transform_team_rankings;
pub use records::{records_to_table, value_to_cell};
pub use scores::{
    build_schedule, classify_game_state, recent_results, transform_scoreboard, upcoming_games,
};
pub use teams::{transform_schools, transform_standings, transform_team_stats};

pub const CRATE_NAME: &str = "pinboard-transform";

/// A raw field the API may send as a string, a number, a bool or not at all.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(transparent)]
pub struct Loose(Option<JsonValue>);

impl Loose {
    pub fn is_missing(&self) -> bool {
        matches!(&self.0, None | Some(JsonValue::Null))
    }

    /// Text form; missing becomes the empty string.
    pub fn text(&self) -> String {
        match &self.0 {
            None | Some(JsonValue::Null) => String::new(),
            Some(JsonValue::String(s)) => s.clone(),
            Some(other) => other.to_string(),
        }
    }

    pub fn int(&self) -> Option<i64> {
        match self.0.as_ref()? {
            JsonValue::Number(n) => n
                .as_i64()
                .or_else(|| n.as_f64().filter(|v| v.is_finite()).map(|v| v.trunc() as i64)),
            JsonValue::String(s) => parse_int(s),
            _ => None,
        }
    }

    pub fn flag(&self) -> bool {
        match &self.0 {
            Some(JsonValue::Bool(b)) => *b,
            Some(JsonValue::String(s)) => s.trim().eq_ignore_ascii_case("true"),
            _ => false,
        }
    }

    pub fn int_cell(&self) -> Cell {
        self.int().into()
    }

    pub fn text_cell(&self) -> Cell {
        Cell::Text(self.text())
    }
}

impl From<JsonValue> for Loose {
    fn from(value: JsonValue) -> Self {
        Loose(Some(value))
    }
}

fn parse_int(raw: &str) -> Option<i64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed.parse().ok()
}

/// `"Penn St. (16)"` becomes `("Penn St.", Some(16))`. Only a trailing
/// parenthesised group counts, split at the rightmost `(`.
pub fn parse_school_votes(raw: &str) -> (String, Option<i64>) {
    let raw = raw.trim();
    if raw.ends_with(')') {
        if let Some(idx) = raw.rfind('(') {
            let school = raw[..idx].trim().to_string();
            let votes = parse_int(&raw[idx + 1..raw.len() - 1]);
            return (school, votes);
        }
    }
    (raw.to_string(), None)
}

/// `"15-0"` becomes `(Some(15), Some(0))`; anything malformed gives `(None, None)`.
pub fn parse_record(record: &str) -> (Option<i64>, Option<i64>) {
    let mut parts = record.split('-');
    match (parts.next(), parts.next()) {
        (Some(wins), Some(losses)) => match (parse_int(wins), parse_int(losses)) {
            (Some(w), Some(l)) => (Some(w), Some(l)),
            _ => (None, None),
        },
        _ => (None, None),
    }
}

/// Numeric coercion for stats columns: integers stay integral, decimals become
/// floats, anything else is `Null`.
pub fn coerce_number(cell: &Cell) -> Cell {
    match cell {
        Cell::Int(_) => cell.clone(),
        Cell::Float(v) if v.is_finite() => cell.clone(),
        Cell::Text(s) => {
            let trimmed = s.trim();
            if let Ok(v) = trimmed.parse::<i64>() {
                Cell::Int(v)
            } else {
                match trimmed.parse::<f64>() {
                    Ok(v) if v.is_finite() => Cell::Float(v),
                    _ => Cell::Null,
                }
            }
        }
        _ => Cell::Null,
    }
}

/// Decode each element of the `key` list of a raw document on its own.
/// Elements that do not match the expected shape are logged and skipped;
/// a missing or non-list `key` yields no rows.
pub(crate) fn decode_rows<T: DeserializeOwned>(raw: Option<&JsonValue>, key: &str, what: &str) -> Vec<T> {
    let Some(items) = raw.and_then(|v| v.get(key)).and_then(JsonValue::as_array) else {
        return Vec::new();
    };
    items
        .iter()
        .enumerate()
        .filter_map(|(idx, item)| match T::deserialize(item) {
            Ok(parsed) => Some(parsed),
            Err(err) => {
                debug!(shape = what, index = idx, error = %err, "skipping malformed row");
                None
            }
        })
        .collect()
}

/// Append a row, logging instead of panicking when its width is off.
pub(crate) fn push_row_logged(table: &mut Table, row: Vec<Cell>, what: &str) {
    if let Err(err) = table.push_row(row) {
        warn!(shape = what, error = %err, "dropping row that does not fit the table");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn school_votes_split_on_rightmost_paren() {
        assert_eq!(parse_school_votes("Penn St. (16)"), ("Penn St.".to_string(), Some(16)));
        assert_eq!(parse_school_votes("Iowa"), ("Iowa".to_string(), None));
        assert_eq!(
            parse_school_votes("Miami (Ohio) (2)"),
            ("Miami (Ohio)".to_string(), Some(2))
        );
        assert_eq!(parse_school_votes("Ohio St. (x)"), ("Ohio St.".to_string(), None));
        assert_eq!(parse_school_votes("  Cornell  "), ("Cornell".to_string(), None));
    }

    #[test]
    fn records_split_into_wins_and_losses() {
        assert_eq!(parse_record("15-0"), (Some(15), Some(0)));
        assert_eq!(parse_record(" 9 - 3 "), (Some(9), Some(3)));
        assert_eq!(parse_record("abc"), (None, None));
        assert_eq!(parse_record("x-1"), (None, None));
        assert_eq!(parse_record(""), (None, None));
    }

    #[test]
    fn loose_fields_tolerate_strings_and_numbers() {
        assert_eq!(Loose::from(json!("12")).int(), Some(12));
        assert_eq!(Loose::from(json!(12)).int(), Some(12));
        assert_eq!(Loose::from(json!("")).int(), None);
        assert_eq!(Loose::from(json!("n/a")).int(), None);
        assert_eq!(Loose::default().text(), "");
        assert_eq!(Loose::from(json!(6154104)).text(), "6154104");
        assert!(Loose::from(json!(true)).flag());
        assert!(!Loose::from(json!(null)).flag());
    }

    #[derive(Debug, Deserialize, PartialEq)]
    struct Pair {
        a: i64,
    }

    #[test]
    fn row_decoding_skips_only_the_bad_rows() {
        let raw = json!({"data": [{"a": 1}, null, "oops", {"a": 2}, {"a": "x"}]});
        let rows: Vec<Pair> = decode_rows(Some(&raw), "data", "pair");
        assert_eq!(rows, vec![Pair { a: 1 }, Pair { a: 2 }]);

        assert!(decode_rows::<Pair>(Some(&json!({"data": "nope"})), "data", "pair").is_empty());
        assert!(decode_rows::<Pair>(Some(&json!([1, 2])), "data", "pair").is_empty());
        assert!(decode_rows::<Pair>(None, "data", "pair").is_empty());
    }

    #[test]
    fn misfit_rows_are_dropped_not_fatal() {
        let mut table = Table::empty(&["a", "b"]);
        push_row_logged(&mut table, vec![Cell::Int(1)], "pair");
        push_row_logged(&mut table, vec![Cell::Int(1), Cell::Int(2)], "pair");
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn numeric_coercion_marks_failures_missing() {
        assert_eq!(coerce_number(&Cell::text("7")), Cell::Int(7));
        assert_eq!(coerce_number(&Cell::text("0.750")), Cell::Float(0.75));
        assert_eq!(coerce_number(&Cell::text("-")), Cell::Null);
        assert_eq!(coerce_number(&Cell::Bool(true)), Cell::Null);
    }
}
