//! Projection of PostgreSQL rows into untyped column values.
//!
//! Each column is read according to its declared type. Types the row
//! decoder has no rule for, and values that fail to read, are passed through
//! as `Unsupported` so the decoder rejects the row by field name instead of
//! the whole result set failing.

use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{Column, Postgres, Row, TypeInfo, ValueRef};

use crate::error::DecodeError;
use crate::milestone::{ColumnValue, RowValues};

/// Reads every column of `row` in order.
pub fn row_values(row: &PgRow) -> RowValues {
    (0..row.len())
        .map(|idx| {
            column_value(row, idx).unwrap_or_else(|e| ColumnValue::Unsupported(e.to_string()))
        })
        .collect()
}

fn column_value(row: &PgRow, idx: usize) -> Result<ColumnValue, DecodeError> {
    let is_null = row
        .try_get_raw(idx)
        .map_err(|e| column_error(idx, e))?
        .is_null();
    if is_null {
        return Ok(ColumnValue::Null);
    }

    let type_name = row.column(idx).type_info().name().to_string();
    let value = match type_name.as_str() {
        "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" => ColumnValue::Text(get(row, idx)?),
        "INT2" => ColumnValue::Int16(get(row, idx)?),
        "INT4" => ColumnValue::Int32(get(row, idx)?),
        "INT8" => ColumnValue::Int64(get(row, idx)?),
        "BOOL" => ColumnValue::Bool(get(row, idx)?),
        "TIMESTAMPTZ" => ColumnValue::Timestamp(get::<DateTime<Utc>>(row, idx)?),
        "TIMESTAMP" => ColumnValue::Timestamp(get::<NaiveDateTime>(row, idx)?.and_utc()),
        _ => ColumnValue::Unsupported(type_name),
    };
    Ok(value)
}

fn get<'r, T>(row: &'r PgRow, idx: usize) -> Result<T, DecodeError>
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    row.try_get(idx).map_err(|e| column_error(idx, e))
}

fn column_error(index: usize, err: sqlx::Error) -> DecodeError {
    DecodeError::Column {
        index,
        message: err.to_string(),
    }
}
