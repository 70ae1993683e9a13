// Copyright 2025 Snowflake Computing Inc.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The Arrow record-batch decoder.
//!
//! Arrow chunks arrive as IPC streams. Cells map by the server column type
//! first and the physical Arrow type second: NUMBER columns ride as
//! integers or `Decimal128`, timestamps as a `{epoch, fraction,
//! timezone?}` struct or as scaled integers, and structured columns as
//! Arrow structs and lists.

use crate::decode::DecodeOptions;
use crate::decode::structured::StructuredValue;
use crate::decode::value::{Decimal, Value};
use crate::protocol::RowType;
use arrow::array::{
    Array, ArrayRef, BinaryArray, BooleanArray, Date32Array, Decimal128Array, Float64Array,
    Int8Array, Int16Array, Int32Array, Int64Array, LargeBinaryArray, LargeStringArray, ListArray,
    RecordBatch, StringArray, StructArray, Time32MillisecondArray, Time64NanosecondArray,
};
use arrow::datatypes::DataType;
use arrow::ipc::reader::StreamReader;
use chrono::{Duration, FixedOffset, NaiveDate, NaiveTime, TimeZone as _};
use num_bigint::BigInt;
use snowflake_core::Result;
use snowflake_core::error::Error;
use std::io::Cursor;

/// Parses an IPC stream into record batches.
pub fn read_batches(body: &[u8]) -> Result<Vec<RecordBatch>> {
    let reader =
        StreamReader::try_new(Cursor::new(body.to_vec()), None).map_err(Error::decode)?;
    let mut batches = Vec::new();
    for batch in reader {
        batches.push(batch.map_err(Error::decode)?);
    }
    Ok(batches)
}

/// Decodes a record batch into rows of [Value] cells.
pub fn decode_batch(
    batch: &RecordBatch,
    row_type: &[RowType],
    options: &DecodeOptions,
) -> Result<Vec<Vec<Value>>> {
    if batch.num_columns() != row_type.len() {
        return Err(Error::decode(format!(
            "batch has {} columns but the row type declares {}",
            batch.num_columns(),
            row_type.len()
        )));
    }
    let mut columns = Vec::with_capacity(batch.num_columns());
    for (array, column) in batch.columns().iter().zip(row_type) {
        columns.push(decode_column(array, column, options)?);
    }
    let mut rows = Vec::with_capacity(batch.num_rows());
    for row in 0..batch.num_rows() {
        rows.push(columns.iter().map(|c| c[row].clone()).collect());
    }
    Ok(rows)
}

fn decode_column(
    array: &ArrayRef,
    column: &RowType,
    options: &DecodeOptions,
) -> Result<Vec<Value>> {
    let mut cells = Vec::with_capacity(array.len());
    for row in 0..array.len() {
        cells.push(if array.is_null(row) {
            Value::Null
        } else {
            decode_cell(array, row, column, options)?
        });
    }
    Ok(cells)
}

fn decode_cell(
    array: &ArrayRef,
    row: usize,
    column: &RowType,
    options: &DecodeOptions,
) -> Result<Value> {
    match column.type_name.as_str() {
        "fixed" => decode_fixed(array, row, column, options),
        "real" | "double" | "float" => Ok(Value::Float(
            downcast::<Float64Array>(array, column)?.value(row),
        )),
        "text" | "char" | "character" | "varchar" => decode_text(array, row, column, options),
        "binary" => decode_binary(array, row, column).map(Value::Bytes),
        "boolean" => Ok(Value::Bool(
            downcast::<BooleanArray>(array, column)?.value(row),
        )),
        "date" => {
            let days = downcast::<Date32Array>(array, column)?.value(row) as i64;
            NaiveDate::from_ymd_opt(1970, 1, 1)
                .and_then(|epoch| epoch.checked_add_signed(Duration::days(days)))
                .map(Value::Date)
                .ok_or_else(|| bad_cell(column, "date out of range"))
        }
        "time" => decode_time(array, row, column),
        "timestamp_ntz" | "timestamp_ltz" | "timestamp_tz" => {
            decode_timestamp(array, row, column, options)
        }
        "object" if matches!(array.data_type(), DataType::Struct(_)) => {
            decode_struct(array, row, column, options)
        }
        "array" if matches!(array.data_type(), DataType::List(_)) => {
            decode_list(array, row, column, options)
        }
        "object" | "array" | "variant" => {
            decode_text(array, row, column, options).map(|v| match v {
                Value::Str(s) => Value::Json(s),
                other => other,
            })
        }
        "vector" => decode_vector(array, row, column),
        "map" => decode_map(array, row, column, options),
        other => Err(Error::decode(format!(
            "unknown column type {other} for {}",
            column.name
        ))),
    }
}

fn downcast<'a, T: 'static>(array: &'a ArrayRef, column: &RowType) -> Result<&'a T> {
    array.as_any().downcast_ref::<T>().ok_or_else(|| {
        Error::decode(format!(
            "column {} arrived as {:?}, which does not match its declared type {}",
            column.name,
            array.data_type(),
            column.type_name
        ))
    })
}

fn integer_at(array: &ArrayRef, row: usize, column: &RowType) -> Result<i128> {
    Ok(match array.data_type() {
        DataType::Int8 => downcast::<Int8Array>(array, column)?.value(row) as i128,
        DataType::Int16 => downcast::<Int16Array>(array, column)?.value(row) as i128,
        DataType::Int32 => downcast::<Int32Array>(array, column)?.value(row) as i128,
        DataType::Int64 => downcast::<Int64Array>(array, column)?.value(row) as i128,
        DataType::Decimal128(_, _) => downcast::<Decimal128Array>(array, column)?.value(row),
        other => {
            return Err(Error::decode(format!(
                "column {} arrived as {other:?}, expected an integer",
                column.name
            )));
        }
    })
}

fn decode_fixed(
    array: &ArrayRef,
    row: usize,
    column: &RowType,
    options: &DecodeOptions,
) -> Result<Value> {
    let scale = match array.data_type() {
        // Decimal128 carries its own scale; trust it over the metadata.
        DataType::Decimal128(_, s) => *s as i64,
        _ => column.scale.unwrap_or(0),
    };
    let raw = integer_at(array, row, column)?;
    if scale == 0 {
        if let Ok(v) = i64::try_from(raw) {
            return Ok(Value::Int(v));
        }
        return if options.higher_precision {
            Ok(Value::BigInt(BigInt::from(raw)))
        } else {
            Ok(Value::Str(raw.to_string()))
        };
    }
    if options.higher_precision {
        return Ok(Value::Decimal(Decimal {
            mantissa: BigInt::from(raw),
            scale: scale as u32,
        }));
    }
    Ok(Value::Float(raw as f64 / 10_f64.powi(scale as i32)))
}

fn decode_text(
    array: &ArrayRef,
    row: usize,
    column: &RowType,
    options: &DecodeOptions,
) -> Result<Value> {
    match array.data_type() {
        DataType::Utf8 => Ok(Value::Str(
            downcast::<StringArray>(array, column)?.value(row).to_string(),
        )),
        DataType::LargeUtf8 => Ok(Value::Str(
            downcast::<LargeStringArray>(array, column)?
                .value(row)
                .to_string(),
        )),
        // Text that rides in a binary buffer is validated on request.
        DataType::Binary | DataType::LargeBinary => {
            let bytes = decode_binary(array, row, column)?;
            if options.utf8_validation {
                String::from_utf8(bytes)
                    .map(Value::Str)
                    .map_err(|_| bad_cell(column, "invalid UTF-8"))
            } else {
                Ok(Value::Str(String::from_utf8_lossy(&bytes).into_owned()))
            }
        }
        other => Err(Error::decode(format!(
            "column {} arrived as {other:?}, expected text",
            column.name
        ))),
    }
}

fn decode_binary(array: &ArrayRef, row: usize, column: &RowType) -> Result<Vec<u8>> {
    match array.data_type() {
        DataType::Binary => Ok(downcast::<BinaryArray>(array, column)?.value(row).to_vec()),
        DataType::LargeBinary => Ok(downcast::<LargeBinaryArray>(array, column)?
            .value(row)
            .to_vec()),
        other => Err(Error::decode(format!(
            "column {} arrived as {other:?}, expected binary",
            column.name
        ))),
    }
}

fn decode_time(array: &ArrayRef, row: usize, column: &RowType) -> Result<Value> {
    let nanos: i64 = match array.data_type() {
        DataType::Time64(_) => downcast::<Time64NanosecondArray>(array, column)?.value(row),
        DataType::Time32(_) => {
            downcast::<Time32MillisecondArray>(array, column)?.value(row) as i64 * 1_000_000
        }
        // Older servers send scaled integers at the column's precision.
        _ => {
            let scale = column.scale.unwrap_or(9) as u32;
            let raw = integer_at(array, row, column)? as i64;
            raw * 10_i64.pow(9 - scale.min(9))
        }
    };
    let seconds = u32::try_from(nanos / 1_000_000_000)
        .map_err(|_| bad_cell(column, "time out of range"))?;
    NaiveTime::from_num_seconds_from_midnight_opt(seconds, (nanos % 1_000_000_000) as u32)
        .map(Value::Time)
        .ok_or_else(|| bad_cell(column, "time out of range"))
}

/// The `{epoch, fraction, timezone?}` struct layout of Arrow timestamps.
struct TimestampParts {
    epoch: i64,
    fraction: i32,
    timezone: Option<i32>,
}

fn timestamp_parts(
    array: &ArrayRef,
    row: usize,
    column: &RowType,
) -> Result<TimestampParts> {
    if let Some(parts) = array.as_any().downcast_ref::<StructArray>() {
        let epoch = parts
            .column_by_name("epoch")
            .ok_or_else(|| bad_cell(column, "timestamp struct has no epoch field"))?;
        let epoch = epoch
            .as_any()
            .downcast_ref::<Int64Array>()
            .ok_or_else(|| bad_cell(column, "epoch field is not int64"))?
            .value(row);
        let fraction = match parts.column_by_name("fraction") {
            Some(fraction) => fraction
                .as_any()
                .downcast_ref::<Int32Array>()
                .ok_or_else(|| bad_cell(column, "fraction field is not int32"))?
                .value(row),
            None => 0,
        };
        let timezone = match parts.column_by_name("timezone") {
            Some(tz) => Some(
                tz.as_any()
                    .downcast_ref::<Int32Array>()
                    .ok_or_else(|| bad_cell(column, "timezone field is not int32"))?
                    .value(row),
            ),
            None => None,
        };
        return Ok(TimestampParts {
            epoch,
            fraction,
            timezone,
        });
    }
    // A single scaled integer of ticks at the column's precision.
    let scale = column.scale.unwrap_or(0) as u32;
    let raw = integer_at(array, row, column)?;
    let divisor = 10_i128.pow(scale.min(9));
    let epoch = (raw.div_euclid(divisor)) as i64;
    let fraction = (raw.rem_euclid(divisor)) as i64 * 10_i64.pow(9 - scale.min(9));
    Ok(TimestampParts {
        epoch,
        fraction: fraction as i32,
        timezone: None,
    })
}

fn decode_timestamp(
    array: &ArrayRef,
    row: usize,
    column: &RowType,
    options: &DecodeOptions,
) -> Result<Value> {
    let parts = timestamp_parts(array, row, column)?;
    if options.raw_timestamps {
        return Ok(Value::RawTimestamp {
            epoch: parts.epoch,
            fraction: parts.fraction,
            timezone: parts.timezone,
        });
    }
    let instant = chrono::Utc
        .timestamp_opt(parts.epoch, parts.fraction as u32)
        .single()
        .ok_or_else(|| bad_cell(column, "timestamp out of range"))?;
    Ok(match column.type_name.as_str() {
        "timestamp_ntz" => Value::TimestampNtz(instant.naive_utc()),
        "timestamp_ltz" => Value::TimestampLtz(instant.with_timezone(&options.timezone)),
        _ => {
            let minutes = parts.timezone.unwrap_or(1440) - 1440;
            let offset = FixedOffset::east_opt(minutes * 60)
                .ok_or_else(|| bad_cell(column, "timezone offset out of range"))?;
            Value::TimestampTz(instant.with_timezone(&offset))
        }
    })
}

fn field_row_type(name: &str) -> RowType {
    RowType {
        name: name.to_string(),
        type_name: "text".to_string(),
        ..RowType::default()
    }
}

/// Structured OBJECT: the struct's fields become named [Value]s with the
/// physical Arrow type deciding each field's decoding.
fn decode_struct(
    array: &ArrayRef,
    row: usize,
    column: &RowType,
    options: &DecodeOptions,
) -> Result<Value> {
    let parts = downcast::<StructArray>(array, column)?;
    let mut fields = Vec::with_capacity(parts.num_columns());
    for (field, child) in parts.fields().iter().zip(parts.columns()) {
        let value = if child.is_null(row) {
            Value::Null
        } else {
            decode_any(child, row, options)?
        };
        fields.push((field.name().clone(), value));
    }
    Ok(Value::Struct(StructuredValue::new(fields)))
}

fn decode_list(
    array: &ArrayRef,
    row: usize,
    column: &RowType,
    options: &DecodeOptions,
) -> Result<Value> {
    let list = downcast::<ListArray>(array, column)?;
    let items = list.value(row);
    let mut values = Vec::with_capacity(items.len());
    for i in 0..items.len() {
        values.push(if items.is_null(i) {
            Value::Null
        } else {
            decode_any(&items, i, options)?
        });
    }
    Ok(Value::Array(values))
}

fn decode_map(
    array: &ArrayRef,
    row: usize,
    column: &RowType,
    options: &DecodeOptions,
) -> Result<Value> {
    let map = downcast::<arrow::array::MapArray>(array, column)?;
    let keys = map.keys();
    let values = map.values();
    let offsets = map.value_offsets();
    let (start, end) = (offsets[row] as usize, offsets[row + 1] as usize);
    let mut entries = Vec::with_capacity(end - start);
    for i in start..end {
        let key = decode_any(keys, i, options)?;
        let value = if values.is_null(i) {
            Value::Null
        } else {
            decode_any(values, i, options)?
        };
        entries.push((key, value));
    }
    Ok(Value::Map(entries))
}

fn decode_vector(array: &ArrayRef, row: usize, column: &RowType) -> Result<Value> {
    let list = match array.data_type() {
        DataType::FixedSizeList(_, _) => {
            let list = downcast::<arrow::array::FixedSizeListArray>(array, column)?;
            list.value(row)
        }
        DataType::List(_) => downcast::<ListArray>(array, column)?.value(row),
        other => {
            return Err(Error::decode(format!(
                "column {} arrived as {other:?}, expected a vector",
                column.name
            )));
        }
    };
    let mut values = Vec::with_capacity(list.len());
    for i in 0..list.len() {
        values.push(match list.data_type() {
            DataType::Float32 => downcast::<arrow::array::Float32Array>(&list, column)?
                .value(i) as f64,
            DataType::Float64 => downcast::<Float64Array>(&list, column)?.value(i),
            DataType::Int32 => downcast::<Int32Array>(&list, column)?.value(i) as f64,
            DataType::Int64 => downcast::<Int64Array>(&list, column)?.value(i) as f64,
            other => {
                return Err(Error::decode(format!(
                    "vector element type {other:?} is not numeric"
                )));
            }
        });
    }
    Ok(Value::Vector(values))
}

/// Decodes a nested value by its physical Arrow type alone; used inside
/// structured columns where no server type metadata exists per field.
fn decode_any(array: &ArrayRef, row: usize, options: &DecodeOptions) -> Result<Value> {
    let synthetic = field_row_type("nested");
    Ok(match array.data_type() {
        DataType::Boolean => Value::Bool(downcast::<BooleanArray>(array, &synthetic)?.value(row)),
        DataType::Int8 | DataType::Int16 | DataType::Int32 | DataType::Int64 => {
            let raw = integer_at(array, row, &synthetic)?;
            i64::try_from(raw)
                .map(Value::Int)
                .unwrap_or_else(|_| Value::BigInt(BigInt::from(raw)))
        }
        DataType::Decimal128(_, s) if *s == 0 => {
            let raw = integer_at(array, row, &synthetic)?;
            i64::try_from(raw)
                .map(Value::Int)
                .unwrap_or_else(|_| Value::BigInt(BigInt::from(raw)))
        }
        DataType::Decimal128(_, s) => Value::Decimal(Decimal {
            mantissa: BigInt::from(integer_at(array, row, &synthetic)?),
            scale: *s as u32,
        }),
        DataType::Float64 => Value::Float(downcast::<Float64Array>(array, &synthetic)?.value(row)),
        DataType::Float32 => Value::Float(
            downcast::<arrow::array::Float32Array>(array, &synthetic)?.value(row) as f64,
        ),
        DataType::Utf8 | DataType::LargeUtf8 | DataType::Binary | DataType::LargeBinary => {
            decode_text(array, row, &synthetic, options)?
        }
        DataType::Date32 => decode_cell(array, row, &date_row_type(), options)?,
        DataType::Struct(_) => decode_struct(array, row, &synthetic, options)?,
        DataType::List(_) => decode_list(array, row, &synthetic, options)?,
        other => {
            return Err(Error::decode(format!(
                "unsupported nested Arrow type {other:?}"
            )));
        }
    })
}

fn date_row_type() -> RowType {
    RowType {
        name: "nested".to_string(),
        type_name: "date".to_string(),
        ..RowType::default()
    }
}

fn bad_cell(column: &RowType, detail: &str) -> Error {
    Error::decode(format!("column {}: {detail}", column.name))
}
