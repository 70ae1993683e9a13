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

//! The JSON cell decoder.
//!
//! JSON results deliver every cell as a string (or `null`). Numeric cells
//! are decimal text; dates are days since the epoch; times and timestamps
//! are `seconds.fraction`, with TIMESTAMP_TZ carrying a trailing offset
//! encoded as minutes + 1440; binary is hex.

use crate::decode::structured;
use crate::decode::value::{Decimal, Value};
use crate::decode::DecodeOptions;
use crate::protocol::RowType;
use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveTime, TimeZone as _};
use num_bigint::BigInt;
use snowflake_core::Result;
use snowflake_core::error::Error;

/// Decodes one JSON cell.
pub fn decode_cell(
    raw: &serde_json::Value,
    column: &RowType,
    options: &DecodeOptions,
) -> Result<Value> {
    let text = match raw {
        serde_json::Value::Null => return Ok(Value::Null),
        serde_json::Value::String(s) => s.as_str(),
        // Inline row sets occasionally carry bare numbers and booleans.
        other => return Ok(structured::from_json(other)),
    };
    decode_text(text, column, options)
}

fn decode_text(text: &str, column: &RowType, options: &DecodeOptions) -> Result<Value> {
    match column.type_name.as_str() {
        "fixed" => decode_fixed(text, column, options),
        "real" | "double" | "float" => text
            .parse::<f64>()
            .map(Value::Float)
            .map_err(|_| bad_cell(column, text)),
        "text" | "char" | "character" | "varchar" => Ok(Value::Str(text.to_string())),
        "binary" => hex::decode(text)
            .map(Value::Bytes)
            .map_err(|_| bad_cell(column, text)),
        "boolean" => match text {
            "1" | "true" | "TRUE" => Ok(Value::Bool(true)),
            "0" | "false" | "FALSE" => Ok(Value::Bool(false)),
            _ => Err(bad_cell(column, text)),
        },
        "date" => {
            let days = text.parse::<i64>().map_err(|_| bad_cell(column, text))?;
            NaiveDate::from_ymd_opt(1970, 1, 1)
                .and_then(|epoch| epoch.checked_add_signed(Duration::days(days)))
                .map(Value::Date)
                .ok_or_else(|| bad_cell(column, text))
        }
        "time" => {
            let (seconds, nanos) = epoch_parts(text).ok_or_else(|| bad_cell(column, text))?;
            let since_midnight = u32::try_from(seconds).map_err(|_| bad_cell(column, text))?;
            NaiveTime::from_num_seconds_from_midnight_opt(since_midnight, nanos)
                .map(Value::Time)
                .ok_or_else(|| bad_cell(column, text))
        }
        "timestamp_ntz" => {
            let instant = instant_from(text).ok_or_else(|| bad_cell(column, text))?;
            Ok(Value::TimestampNtz(instant.naive_utc()))
        }
        "timestamp_ltz" => {
            let instant = instant_from(text).ok_or_else(|| bad_cell(column, text))?;
            Ok(Value::TimestampLtz(
                instant.with_timezone(&options.timezone),
            ))
        }
        "timestamp_tz" => {
            // "seconds.fraction offset" with the offset in minutes + 1440.
            let (value, offset) = text
                .split_once(' ')
                .ok_or_else(|| bad_cell(column, text))?;
            let minutes = offset
                .parse::<i32>()
                .map_err(|_| bad_cell(column, text))?
                - 1440;
            let instant = instant_from(value).ok_or_else(|| bad_cell(column, text))?;
            let offset =
                FixedOffset::east_opt(minutes * 60).ok_or_else(|| bad_cell(column, text))?;
            Ok(Value::TimestampTz(instant.with_timezone(&offset)))
        }
        "object" if column.fields.is_some() => {
            let parsed: serde_json::Value =
                serde_json::from_str(text).map_err(|_| bad_cell(column, text))?;
            Ok(structured::from_json(&parsed))
        }
        "array" if column.fields.is_some() => {
            let parsed: serde_json::Value =
                serde_json::from_str(text).map_err(|_| bad_cell(column, text))?;
            Ok(structured::from_json(&parsed))
        }
        "map" => {
            let parsed: serde_json::Value =
                serde_json::from_str(text).map_err(|_| bad_cell(column, text))?;
            structured::map_from_json(&parsed)
        }
        "object" | "array" | "variant" => Ok(Value::Json(text.to_string())),
        "vector" => {
            let parsed: Vec<f64> =
                serde_json::from_str(text).map_err(|_| bad_cell(column, text))?;
            Ok(Value::Vector(parsed))
        }
        other => Err(Error::decode(format!(
            "unknown column type {other} for {}",
            column.name
        ))),
    }
}

fn decode_fixed(text: &str, column: &RowType, options: &DecodeOptions) -> Result<Value> {
    let scale = column.scale.unwrap_or(0);
    if scale == 0 {
        if let Ok(v) = text.parse::<i64>() {
            return Ok(Value::Int(v));
        }
        return if options.higher_precision {
            text.parse::<BigInt>()
                .map(Value::BigInt)
                .map_err(|_| bad_cell(column, text))
        } else {
            Ok(Value::Str(text.to_string()))
        };
    }
    if options.higher_precision {
        let (mantissa_text, cell_scale) = match text.split_once('.') {
            Some((integral, fraction)) => {
                (format!("{integral}{fraction}"), fraction.len() as u32)
            }
            None => (text.to_string(), 0),
        };
        let mantissa = mantissa_text
            .parse::<BigInt>()
            .map_err(|_| bad_cell(column, text))?;
        return Ok(Value::Decimal(Decimal {
            mantissa,
            scale: cell_scale,
        }));
    }
    text.parse::<f64>()
        .map(Value::Float)
        .map_err(|_| bad_cell(column, text))
}

/// Splits `seconds.fraction` text into whole seconds and nanoseconds.
///
/// The magnitude parses digit-wise so precision beyond `f64` is kept.
fn epoch_parts(text: &str) -> Option<(i64, u32)> {
    let (negative, text) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text),
    };
    let (seconds, fraction) = match text.split_once('.') {
        Some((s, f)) => (s, f),
        None => (text, ""),
    };
    let seconds = seconds.parse::<i64>().ok()?;
    let nanos = if fraction.is_empty() {
        0
    } else {
        format!("{fraction:0<9}").get(..9)?.parse::<u32>().ok()?
    };
    if negative {
        // Total = -(seconds + nanos/1e9); renormalize so nanos >= 0.
        if nanos == 0 {
            Some((-seconds, 0))
        } else {
            Some((-seconds - 1, 1_000_000_000 - nanos))
        }
    } else {
        Some((seconds, nanos))
    }
}

fn instant_from(text: &str) -> Option<DateTime<chrono::Utc>> {
    let (seconds, nanos) = epoch_parts(text)?;
    match chrono::Utc.timestamp_opt(seconds, nanos) {
        chrono::LocalResult::Single(dt) => Some(dt),
        _ => None,
    }
}

fn bad_cell(column: &RowType, text: &str) -> Error {
    Error::decode(format!(
        "cannot decode {:?} as {} for column {}",
        text, column.type_name, column.name
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn column(type_name: &str, scale: Option<i64>) -> RowType {
        RowType {
            name: "C".to_string(),
            type_name: type_name.to_string(),
            scale,
            ..RowType::default()
        }
    }

    fn decode(text: &str, column: &RowType, options: &DecodeOptions) -> Value {
        decode_cell(&json!(text), column, options).unwrap()
    }

    #[test]
    fn null_cells() {
        let got = decode_cell(&json!(null), &column("fixed", None), &DecodeOptions::default());
        assert_eq!(got.unwrap(), Value::Null);
    }

    #[test]
    fn fixed_scale_zero() {
        let options = DecodeOptions::default();
        assert_eq!(decode("42", &column("fixed", Some(0)), &options), Value::Int(42));
        assert_eq!(decode("-7", &column("fixed", Some(0)), &options), Value::Int(-7));
        // Out of i64 range falls back to text without higher precision.
        let big = "99999999999999999999999999999";
        assert_eq!(
            decode(big, &column("fixed", Some(0)), &options),
            Value::Str(big.to_string())
        );
        let options = DecodeOptions {
            higher_precision: true,
            ..DecodeOptions::default()
        };
        assert_eq!(
            decode(big, &column("fixed", Some(0)), &options),
            Value::BigInt(big.parse().unwrap())
        );
    }

    #[test]
    fn fixed_scaled() {
        let options = DecodeOptions::default();
        assert_eq!(
            decode("123.45", &column("fixed", Some(2)), &options),
            Value::Float(123.45)
        );
        let options = DecodeOptions {
            higher_precision: true,
            ..DecodeOptions::default()
        };
        let Value::Decimal(decimal) = decode("123.45", &column("fixed", Some(2)), &options) else {
            panic!("expected decimal");
        };
        assert_eq!(decimal.to_string(), "123.45");
    }

    #[test]
    fn text_binary_boolean() {
        let options = DecodeOptions::default();
        assert_eq!(
            decode("hello", &column("text", None), &options),
            Value::Str("hello".to_string())
        );
        assert_eq!(
            decode("deadbeef", &column("binary", None), &options),
            Value::Bytes(vec![0xde, 0xad, 0xbe, 0xef])
        );
        assert_eq!(decode("1", &column("boolean", None), &options), Value::Bool(true));
        assert_eq!(
            decode("false", &column("boolean", None), &options),
            Value::Bool(false)
        );
    }

    #[test]
    fn dates_and_times() {
        let options = DecodeOptions::default();
        assert_eq!(
            decode("19738", &column("date", None), &options),
            Value::Date(chrono::NaiveDate::from_ymd_opt(2024, 1, 16).unwrap())
        );
        assert_eq!(
            decode("47045.123456789", &column("time", Some(9)), &options),
            Value::Time(
                chrono::NaiveTime::from_num_seconds_from_midnight_opt(47045, 123_456_789).unwrap()
            )
        );
    }

    #[test]
    fn timestamps() {
        let options = DecodeOptions::default();
        let got = decode("1704067200.123456789", &column("timestamp_ntz", Some(9)), &options);
        let Value::TimestampNtz(ntz) = got else {
            panic!("expected ntz");
        };
        assert_eq!(ntz.and_utc().timestamp(), 1_704_067_200);
        assert_eq!(ntz.and_utc().timestamp_subsec_nanos(), 123_456_789);

        // LTZ renders in the session timezone.
        let options = DecodeOptions {
            timezone: chrono_tz::America::Los_Angeles,
            ..DecodeOptions::default()
        };
        let got = decode("1704067200.5", &column("timestamp_ltz", Some(9)), &options);
        let Value::TimestampLtz(ltz) = got else {
            panic!("expected ltz");
        };
        assert_eq!(ltz.timestamp(), 1_704_067_200);
        assert_eq!(ltz.offset().to_string(), "PST");

        // TZ carries its own offset, minutes + 1440.
        let options = DecodeOptions::default();
        let got = decode("1704067200.25 1560", &column("timestamp_tz", Some(9)), &options);
        let Value::TimestampTz(tz) = got else {
            panic!("expected tz");
        };
        assert_eq!(tz.timestamp(), 1_704_067_200);
        assert_eq!(tz.offset().local_minus_utc(), 2 * 3600);
    }

    #[test]
    fn negative_epochs() {
        assert_eq!(epoch_parts("-1.5"), Some((-2, 500_000_000)));
        assert_eq!(epoch_parts("-10"), Some((-10, 0)));
        assert_eq!(epoch_parts("1.000000001"), Some((1, 1)));
    }

    #[test]
    fn unstructured_and_vector() {
        let options = DecodeOptions::default();
        assert_eq!(
            decode(r#"{"a":1}"#, &column("variant", None), &options),
            Value::Json(r#"{"a":1}"#.to_string())
        );
        assert_eq!(
            decode("[1.5,2.5]", &column("vector", None), &options),
            Value::Vector(vec![1.5, 2.5])
        );
    }

    #[test]
    fn structured_object() {
        let options = DecodeOptions::default();
        let mut object_column = column("object", None);
        object_column.fields = Some(json!([{"fieldName": "a"}]));
        let got = decode(r#"{"a": 7}"#, &object_column, &options);
        let Value::Struct(value) = got else {
            panic!("expected struct");
        };
        assert_eq!(value.get_i64("a").unwrap(), 7);
    }

    #[test]
    fn unknown_type_is_decode_error() {
        let got = decode_cell(
            &json!("x"),
            &column("geography", None),
            &DecodeOptions::default(),
        );
        assert!(got.is_err());
    }
}
