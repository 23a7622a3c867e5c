//! Tabular query results as Arrow record batches.
//!
//! The schema comes from the statement's column metadata, so a result with
//! no rows still carries its columns. Columns are positional: two result
//! columns with the same name stay two fields. `NUMERIC` travels as decimal
//! text so no digits are lost.

use super::value::{Row, SqlValue};
use crate::error::{PgBridgeError, PgBridgeResult};

use arrow::array::{
    ArrayRef, BinaryArray, BooleanArray, Date32Array, Float32Array, Float64Array, Int16Array,
    Int32Array, Int64Array, StringArray, Time64MicrosecondArray, TimestampMicrosecondArray,
};
use arrow::datatypes::{DataType, Field, Schema, TimeUnit};
use arrow::record_batch::{RecordBatch, RecordBatchOptions};
use arrow::util::pretty::pretty_format_batches;
use chrono::{Datelike, Timelike};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_postgres::types::Type;

/// Fully buffered query result.
pub type DataFrame = RecordBatch;

/// Field metadata key holding the PostgreSQL type name.
pub const PG_TYPE_KEY: &str = "pg_type";

/// `TIMESTAMPTZ` values are stored as UTC instants.
const UTC_OFFSET: &str = "+00:00";

/// `num_days_from_ce` of 1970-01-01.
const UNIX_EPOCH_DAYS_FROM_CE: i32 = 719_163;

/// Arrow type a PostgreSQL column is stored as. Types without a native
/// counterpart are stored as their text form.
pub fn arrow_type(ty: &Type) -> DataType {
    match *ty {
        Type::BOOL => DataType::Boolean,
        Type::INT2 => DataType::Int16,
        Type::INT4 => DataType::Int32,
        Type::INT8 | Type::OID => DataType::Int64,
        Type::FLOAT4 => DataType::Float32,
        Type::FLOAT8 => DataType::Float64,
        Type::BYTEA => DataType::Binary,
        Type::TIMESTAMP => DataType::Timestamp(TimeUnit::Microsecond, None),
        Type::TIMESTAMPTZ => DataType::Timestamp(TimeUnit::Microsecond, Some(UTC_OFFSET.into())),
        Type::DATE => DataType::Date32,
        Type::TIME => DataType::Time64(TimeUnit::Microsecond),
        _ => DataType::Utf8,
    }
}

/// Build a frame from column headers (name and PostgreSQL type) and decoded
/// rows. Every row must hold one value per column.
pub fn build_frame(columns: &[(&str, Type)], rows: &[Row]) -> PgBridgeResult<DataFrame> {
    let fields: Vec<Field> = columns
        .iter()
        .map(|(name, ty)| {
            Field::new(*name, arrow_type(ty), true)
                .with_metadata(HashMap::from([(PG_TYPE_KEY.to_string(), ty.name().to_string())]))
        })
        .collect();

    let arrays = fields
        .iter()
        .enumerate()
        .map(|(index, field)| build_array(field, rows, index))
        .collect::<PgBridgeResult<Vec<ArrayRef>>>()?;

    let options = RecordBatchOptions::new().with_row_count(Some(rows.len()));
    Ok(RecordBatch::try_new_with_options(Arc::new(Schema::new(fields)), arrays, &options)?)
}

/// Render a frame as a text table.
pub fn render(frame: &DataFrame) -> PgBridgeResult<String> {
    Ok(pretty_format_batches(std::slice::from_ref(frame))?.to_string())
}

fn build_array(field: &Field, rows: &[Row], index: usize) -> PgBridgeResult<ArrayRef> {
    let name = field.name();
    let array: ArrayRef = match field.data_type() {
        DataType::Boolean => Arc::new(BooleanArray::from(values(rows, index, name, SqlValue::as_bool)?)),
        DataType::Int16 => Arc::new(Int16Array::from(values(rows, index, name, |v| {
            v.as_i64().and_then(|n| i16::try_from(n).ok())
        })?)),
        DataType::Int32 => Arc::new(Int32Array::from(values(rows, index, name, |v| {
            v.as_i64().and_then(|n| i32::try_from(n).ok())
        })?)),
        DataType::Int64 => Arc::new(Int64Array::from(values(rows, index, name, SqlValue::as_i64)?)),
        DataType::Float32 => Arc::new(Float32Array::from(values(rows, index, name, |v| {
            v.as_f64().map(|f| f as f32)
        })?)),
        DataType::Float64 => Arc::new(Float64Array::from(values(rows, index, name, SqlValue::as_f64)?)),
        DataType::Binary => Arc::new(BinaryArray::from(values(rows, index, name, |v| match v {
            SqlValue::Bytes(b) => Some(b.as_slice()),
            _ => None,
        })?)),
        DataType::Timestamp(_, None) => {
            Arc::new(TimestampMicrosecondArray::from(values(rows, index, name, |v| match v {
                SqlValue::Timestamp(ts) => Some(ts.and_utc().timestamp_micros()),
                _ => None,
            })?))
        }
        DataType::Timestamp(_, Some(tz)) => Arc::new(
            TimestampMicrosecondArray::from(values(rows, index, name, |v| match v {
                SqlValue::TimestampTz(ts) => Some(ts.timestamp_micros()),
                _ => None,
            })?)
            .with_timezone(Arc::clone(tz)),
        ),
        DataType::Date32 => Arc::new(Date32Array::from(values(rows, index, name, |v| match v {
            SqlValue::Date(d) => Some(d.num_days_from_ce() - UNIX_EPOCH_DAYS_FROM_CE),
            _ => None,
        })?)),
        DataType::Time64(_) => Arc::new(Time64MicrosecondArray::from(values(rows, index, name, |v| {
            match v {
                SqlValue::Time(t) => Some(
                    i64::from(t.num_seconds_from_midnight()) * 1_000_000
                        + i64::from(t.nanosecond() / 1_000),
                ),
                _ => None,
            }
        })?)),
        _ => Arc::new(StringArray::from(values(rows, index, name, |v| Some(v.to_string()))?)),
    };
    Ok(array)
}

/// Pull column `index` out of every row. NULL maps to a missing value; a
/// value the column type cannot hold is an error.
fn values<'a, T>(
    rows: &'a [Row],
    index: usize,
    name: &str,
    extract: impl Fn(&'a SqlValue) -> Option<T>,
) -> PgBridgeResult<Vec<Option<T>>> {
    rows.iter()
        .enumerate()
        .map(|(row, cells)| match cells.get(index) {
            Some(SqlValue::Null) => Ok(None),
            Some(value) => extract(value).map(Some).ok_or_else(|| {
                PgBridgeError::query(
                    format!("Row {row}: {} value does not fit column \"{name}\"", value.kind_name()),
                    None,
                    None,
                    None,
                    None,
                )
            }),
            None => Err(PgBridgeError::query(
                format!("Row {row} has {} values, column \"{name}\" is #{index}", cells.len()),
                None,
                None,
                None,
                None,
            )),
        })
        .collect()
}
