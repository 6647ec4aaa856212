use pinboard_core::{Cell, Table};
use serde_json::Value as JsonValue;

/// Scalar JSON maps onto the matching cell; arrays and objects are kept as JSON text.
pub fn value_to_cell(value: &JsonValue) -> Cell {
    match value {
        JsonValue::Null => Cell::Null,
        JsonValue::Bool(b) => Cell::Bool(*b),
        JsonValue::Number(n) => match n.as_i64() {
            Some(v) => Cell::Int(v),
            None => n.as_f64().map(Cell::Float).unwrap_or(Cell::Null),
        },
        JsonValue::String(s) => Cell::Text(s.clone()),
        nested => Cell::Text(nested.to_string()),
    }
}

/// Generic list-of-objects to table. Non-object items are skipped; the column
/// set is the union of keys.
pub fn records_to_table(list: &[JsonValue]) -> Table {
    Table::from_records(
        list.iter()
            .filter_map(JsonValue::as_object)
            .map(|obj| {
                obj.iter()
                    .map(|(key, value)| (key.clone(), value_to_cell(value)))
                    .collect()
            })
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn objects_become_rows() {
        let table = records_to_table(&[
            json!({"site_id": "S1", "quality_score": 0.9, "days_to_activate": 30}),
            json!({"site_id": "S2", "tags": ["a"], "active": true}),
            json!(42),
        ]);
        assert_eq!(table.len(), 2);
        assert_eq!(table.get(0, "quality_score"), Some(&Cell::Float(0.9)));
        assert_eq!(table.get(0, "days_to_activate"), Some(&Cell::Int(30)));
        assert_eq!(table.get(1, "tags"), Some(&Cell::text("[\"a\"]")));
        assert_eq!(table.get(1, "active"), Some(&Cell::Bool(true)));
        assert_eq!(table.get(1, "quality_score"), Some(&Cell::Null));
    }
}
