//! Parquet encoding for [`Table`]s.

use std::collections::HashMap;
use std::sync::Arc;

use arrow_array::cast::AsArray;
use arrow_array::types::{Float64Type, Int32Type, Int64Type};
use arrow_array::{Array, ArrayRef, BooleanArray, Float64Array, Int64Array, RecordBatch, StringArray};
use arrow_schema::{ArrowError, DataType, Field as ArrowField, Schema};
use bytes::Bytes;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::errors::ParquetError;
use pinboard_core::{Cell, Table, TableError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("cannot encode a table without columns")]
    NoColumns,
    #[error("unsupported parquet column type {data_type} for `{column}`")]
    UnsupportedType { column: String, data_type: String },
    #[error(transparent)]
    Arrow(#[from] ArrowError),
    #[error(transparent)]
    Parquet(#[from] ParquetError),
    #[error(transparent)]
    Table(#[from] TableError),
    #[error("cell json in column `{column}`: {source}")]
    CellJson {
        column: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("mixed column encoding failed: {0}")]
    CellEncode(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Boolean,
    Int64,
    Float64,
    Utf8,
    /// Cells of more than one type, stored as their JSON form in a Utf8 column.
    Mixed,
}

impl ColumnKind {
    fn data_type(self) -> DataType {
        match self {
            ColumnKind::Boolean => DataType::Boolean,
            ColumnKind::Int64 => DataType::Int64,
            ColumnKind::Float64 => DataType::Float64,
            ColumnKind::Utf8 | ColumnKind::Mixed => DataType::Utf8,
        }
    }
}

/// Field metadata key marking a column whose values are JSON-encoded cells.
pub const CELL_ENCODING_KEY: &str = "pinboard.cell_encoding";
const CELL_ENCODING_JSON: &str = "json";

/// Storage type for a column. A single cell type maps onto its arrow type and
/// all-null columns are Utf8; any mix of types is [`ColumnKind::Mixed`].
pub fn infer_kind<'a>(cells: impl IntoIterator<Item = &'a Cell>) -> ColumnKind {
    let (mut bools, mut ints, mut floats, mut texts) = (false, false, false, false);
    for cell in cells {
        match cell {
            Cell::Null => {}
            Cell::Bool(_) => bools = true,
            Cell::Int(_) => ints = true,
            Cell::Float(_) => floats = true,
            Cell::Text(_) => texts = true,
        }
    }
    match (bools, ints, floats, texts) {
        (true, false, false, false) => ColumnKind::Boolean,
        (false, true, false, false) => ColumnKind::Int64,
        (false, false, true, false) => ColumnKind::Float64,
        (false, false, false, _) => ColumnKind::Utf8,
        _ => ColumnKind::Mixed,
    }
}

fn column_array(table: &Table, idx: usize, kind: ColumnKind) -> Result<ArrayRef, CodecError> {
    let cells = table.rows().iter().map(|row| &row[idx]);
    let array: ArrayRef = match kind {
        ColumnKind::Boolean => Arc::new(BooleanArray::from(
            cells.map(Cell::as_bool).collect::<Vec<_>>(),
        )),
        ColumnKind::Int64 => Arc::new(Int64Array::from(
            cells.map(Cell::as_i64).collect::<Vec<_>>(),
        )),
        ColumnKind::Float64 => Arc::new(Float64Array::from(
            cells
                .map(|c| match c {
                    Cell::Float(v) => Some(*v),
                    _ => None,
                })
                .collect::<Vec<_>>(),
        )),
        ColumnKind::Utf8 => Arc::new(StringArray::from(
            cells.map(|c| c.as_str().map(str::to_string)).collect::<Vec<_>>(),
        )),
        ColumnKind::Mixed => Arc::new(StringArray::from(
            cells
                .map(|c| match c {
                    Cell::Null => Ok(None),
                    other => serde_json::to_string(other).map(Some),
                })
                .collect::<Result<Vec<_>, _>>()?,
        )),
    };
    Ok(array)
}

fn field_for(name: &str, kind: ColumnKind) -> ArrowField {
    let field = ArrowField::new(name, kind.data_type(), true);
    if kind == ColumnKind::Mixed {
        field.with_metadata(HashMap::from([(
            CELL_ENCODING_KEY.to_string(),
            CELL_ENCODING_JSON.to_string(),
        )]))
    } else {
        field
    }
}

pub fn encode_table(table: &Table) -> Result<Vec<u8>, CodecError> {
    if table.columns().is_empty() {
        return Err(CodecError::NoColumns);
    }

    let mut fields = Vec::with_capacity(table.columns().len());
    let mut arrays = Vec::with_capacity(table.columns().len());
    for (idx, name) in table.columns().iter().enumerate() {
        let kind = infer_kind(table.rows().iter().map(|row| &row[idx]));
        fields.push(field_for(name, kind));
        arrays.push(column_array(table, idx, kind)?);
    }

    let schema = Arc::new(Schema::new(fields));
    let batch = RecordBatch::try_new(schema.clone(), arrays)?;

    let mut buf = Vec::new();
    let mut writer = ArrowWriter::try_new(&mut buf, schema, None)?;
    writer.write(&batch)?;
    writer.close()?;
    Ok(buf)
}

fn json_cells(column: &str, array: &ArrayRef) -> Result<Vec<Cell>, CodecError> {
    let Some(a) = array.as_string_opt::<i32>() else {
        return Err(CodecError::UnsupportedType {
            column: column.to_string(),
            data_type: array.data_type().to_string(),
        });
    };
    (0..a.len())
        .map(|i| {
            if a.is_null(i) {
                return Ok(Cell::Null);
            }
            serde_json::from_str(a.value(i)).map_err(|source| CodecError::CellJson {
                column: column.to_string(),
                source,
            })
        })
        .collect()
}

fn array_cells(column: &str, array: &ArrayRef) -> Result<Vec<Cell>, CodecError> {
    let len = array.len();
    let cells = match array.data_type() {
        DataType::Null => vec![Cell::Null; len],
        DataType::Boolean => {
            let a = array.as_boolean();
            (0..len)
                .map(|i| if a.is_null(i) { Cell::Null } else { Cell::Bool(a.value(i)) })
                .collect()
        }
        DataType::Int64 => {
            let a = array.as_primitive::<Int64Type>();
            (0..len)
                .map(|i| if a.is_null(i) { Cell::Null } else { Cell::Int(a.value(i)) })
                .collect()
        }
        DataType::Int32 => {
            let a = array.as_primitive::<Int32Type>();
            (0..len)
                .map(|i| if a.is_null(i) { Cell::Null } else { Cell::Int(i64::from(a.value(i))) })
                .collect()
        }
        DataType::Float64 => {
            let a = array.as_primitive::<Float64Type>();
            (0..len)
                .map(|i| if a.is_null(i) { Cell::Null } else { Cell::Float(a.value(i)) })
                .collect()
        }
        DataType::Utf8 => {
            let a = array.as_string::<i32>();
            (0..len)
                .map(|i| if a.is_null(i) { Cell::Null } else { Cell::text(a.value(i)) })
                .collect()
        }
        DataType::LargeUtf8 => {
            let a = array.as_string::<i64>();
            (0..len)
                .map(|i| if a.is_null(i) { Cell::Null } else { Cell::text(a.value(i)) })
                .collect()
        }
        other => {
            return Err(CodecError::UnsupportedType {
                column: column.to_string(),
                data_type: other.to_string(),
            })
        }
    };
    Ok(cells)
}

pub fn decode_table(bytes: Vec<u8>) -> Result<Table, CodecError> {
    let builder = ParquetRecordBatchReaderBuilder::try_new(Bytes::from(bytes))?;
    let fields: Vec<(String, bool)> = builder
        .schema()
        .fields()
        .iter()
        .map(|f| {
            let json = f.metadata().get(CELL_ENCODING_KEY).map(String::as_str)
                == Some(CELL_ENCODING_JSON);
            (f.name().clone(), json)
        })
        .collect();
    let columns: Vec<String> = fields.iter().map(|(name, _)| name.clone()).collect();
    let reader = builder.build()?;

    let mut table = Table::new(columns);
    for batch in reader {
        let batch = batch?;
        let decoded = batch
            .columns()
            .iter()
            .zip(&fields)
            .map(|(array, (name, json))| {
                if *json {
                    json_cells(name, array)
                } else {
                    array_cells(name, array)
                }
            })
            .collect::<Result<Vec<_>, _>>()?;
        for row in 0..batch.num_rows() {
            table.push_row(decoded.iter().map(|col| col[row].clone()).collect())?;
        }
    }
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Table {
        let mut table = Table::empty(&["rank", "school", "pct", "winner", "note"]);
        table
            .push_row(vec![
                Cell::Int(1),
                "Penn St.".into(),
                Cell::Float(0.95),
                Cell::Bool(true),
                Cell::Null,
            ])
            .unwrap();
        table
            .push_row(vec![
                Cell::Null,
                "Iowa".into(),
                Cell::Null,
                Cell::Bool(false),
                Cell::Null,
            ])
            .unwrap();
        table
    }

    #[test]
    fn typed_columns_survive_parquet() {
        let table = sample();
        let decoded = decode_table(encode_table(&table).unwrap()).unwrap();
        assert_eq!(decoded, table);
    }

    #[test]
    fn zero_row_table_keeps_its_schema() {
        let table = Table::empty(&["game_id", "status"]);
        let decoded = decode_table(encode_table(&table).unwrap()).unwrap();
        assert_eq!(decoded.columns(), table.columns());
        assert!(decoded.is_empty());
    }

    #[test]
    fn column_kinds_follow_cell_types() {
        assert_eq!(infer_kind(&[Cell::Int(2), Cell::Null]), ColumnKind::Int64);
        assert_eq!(infer_kind(&[Cell::Float(2.5)]), ColumnKind::Float64);
        assert_eq!(infer_kind(&[Cell::Null]), ColumnKind::Utf8);
        assert_eq!(infer_kind(&[Cell::Int(2), Cell::Float(2.5)]), ColumnKind::Mixed);
        assert_eq!(infer_kind(&[Cell::Int(1), Cell::text("x")]), ColumnKind::Mixed);
    }

    #[test]
    fn mixed_columns_keep_every_cell_type() {
        let mut table = Table::empty(&["pct", "score", "anything"]);
        table
            .push_row(vec![Cell::Int(1), Cell::Int(2), Cell::text("1")])
            .unwrap();
        table
            .push_row(vec![Cell::text(".778"), Cell::Float(2.5), Cell::Bool(true)])
            .unwrap();
        table
            .push_row(vec![Cell::Null, Cell::Float(2.0), Cell::Int(7)])
            .unwrap();

        let decoded = decode_table(encode_table(&table).unwrap()).unwrap();
        assert_eq!(decoded, table);
        assert_eq!(decoded.get(0, "pct"), Some(&Cell::Int(1)));
        assert_eq!(decoded.get(2, "score"), Some(&Cell::Float(2.0)));
    }

    #[test]
    fn columnless_table_is_rejected() {
        assert!(matches!(
            encode_table(&Table::default()),
            Err(CodecError::NoColumns)
        ));
    }
}
