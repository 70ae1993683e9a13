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

//! Parameter binding.
//!
//! Scalar parameters become entries in the request's `bindings` map keyed
//! by 1-based index, each a `{type, value}` pair with the value in its
//! canonical string form: decimal strings for numbers, ISO-8601 for dates
//! and times, base64 for binary. Array parameters bind columnar; above the
//! server's stage threshold the binder switches to a temporary-stage CSV
//! upload (see [crate::bind_uploader]).

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::Serialize;
use snowflake_core::Result;
use snowflake_core::error::Error;
use std::collections::HashMap;

/// A parameter value supplied by the caller.
#[derive(Clone, Debug, PartialEq)]
pub enum BindValue {
    Null,
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
    Bytes(Vec<u8>),
    Date(NaiveDate),
    Time(NaiveTime),
    TimestampNtz(NaiveDateTime),
    TimestampLtz(DateTime<Utc>),
    TimestampTz(DateTime<FixedOffset>),
    /// A column of values for array binding; elements share one type.
    Array(Vec<BindValue>),
}

impl BindValue {
    fn server_type(&self) -> Result<&'static str> {
        Ok(match self {
            BindValue::Null => "TEXT",
            BindValue::Int(_) => "FIXED",
            BindValue::Float(_) => "REAL",
            BindValue::Str(_) => "TEXT",
            BindValue::Bool(_) => "BOOLEAN",
            BindValue::Bytes(_) => "BINARY",
            BindValue::Date(_) => "DATE",
            BindValue::Time(_) => "TIME",
            BindValue::TimestampNtz(_) => "TIMESTAMP_NTZ",
            BindValue::TimestampLtz(_) => "TIMESTAMP_LTZ",
            BindValue::TimestampTz(_) => "TIMESTAMP_TZ",
            BindValue::Array(_) => {
                return Err(Error::other("nested arrays cannot be bound"));
            }
        })
    }

    /// The canonical string form sent on the wire; `None` is SQL NULL.
    pub(crate) fn encode(&self) -> Result<Option<String>> {
        use base64::Engine as _;
        Ok(match self {
            BindValue::Null => None,
            BindValue::Int(v) => Some(v.to_string()),
            BindValue::Float(v) => Some(format!("{v:?}")),
            BindValue::Str(v) => Some(v.clone()),
            BindValue::Bool(v) => Some(v.to_string()),
            BindValue::Bytes(v) => {
                Some(base64::engine::general_purpose::STANDARD.encode(v))
            }
            BindValue::Date(v) => Some(v.format("%Y-%m-%d").to_string()),
            BindValue::Time(v) => Some(v.format("%H:%M:%S%.9f").to_string()),
            BindValue::TimestampNtz(v) => Some(v.format("%Y-%m-%dT%H:%M:%S%.9f").to_string()),
            BindValue::TimestampLtz(v) => Some(v.to_rfc3339()),
            BindValue::TimestampTz(v) => Some(v.to_rfc3339()),
            BindValue::Array(_) => {
                return Err(Error::other("arrays encode element by element"));
            }
        })
    }
}

/// One entry of the request's `bindings` map.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Binding {
    #[serde(rename = "type")]
    pub type_name: String,
    pub value: BindingValue,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum BindingValue {
    Single(Option<String>),
    Column(Vec<Option<String>>),
}

/// The type and encoded column of one array parameter.
fn encode_column(values: &[BindValue]) -> Result<(String, Vec<Option<String>>)> {
    // The column type comes from the first non-null element; an all-null
    // column binds as typed TEXT nulls.
    let type_name = values
        .iter()
        .find(|v| !matches!(v, BindValue::Null))
        .map(BindValue::server_type)
        .transpose()?
        .unwrap_or("TEXT");
    let mut column = Vec::with_capacity(values.len());
    for value in values {
        if !matches!(value, BindValue::Null) && value.server_type()? != type_name {
            return Err(Error::other(format!(
                "array binding mixes {} and {}",
                type_name,
                value.server_type()?
            )));
        }
        column.push(value.encode()?);
    }
    Ok((type_name.to_string(), column))
}

/// Builds the `bindings` map for a parameter list.
pub fn bindings_for(params: &[BindValue]) -> Result<HashMap<String, Binding>> {
    let mut bindings = HashMap::with_capacity(params.len());
    for (index, param) in params.iter().enumerate() {
        let key = (index + 1).to_string();
        let binding = match param {
            BindValue::Array(values) => {
                let (type_name, column) = encode_column(values)?;
                Binding {
                    type_name,
                    value: BindingValue::Column(column),
                }
            }
            value => Binding {
                type_name: value.server_type()?.to_string(),
                value: BindingValue::Single(value.encode()?),
            },
        };
        bindings.insert(key, binding);
    }
    Ok(bindings)
}

/// The total number of array elements across all parameters, used against
/// the stage-binding threshold.
pub fn array_element_count(params: &[BindValue]) -> usize {
    params
        .iter()
        .map(|p| match p {
            BindValue::Array(values) => values.len(),
            _ => 0,
        })
        .sum()
}

/// True when every parameter is an array of equal length (a bulk insert).
pub fn is_bulk(params: &[BindValue]) -> bool {
    let mut lengths = params.iter().map(|p| match p {
        BindValue::Array(values) => Some(values.len()),
        _ => None,
    });
    match lengths.next() {
        Some(Some(first)) => lengths.all(|l| l == Some(first)),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn scalar_bindings_are_keyed_by_index() {
        let bindings = bindings_for(&[
            BindValue::Int(42),
            BindValue::Str("x".to_string()),
            BindValue::Null,
        ])
        .unwrap();
        assert_eq!(
            serde_json::to_value(&bindings["1"]).unwrap(),
            json!({"type": "FIXED", "value": "42"})
        );
        assert_eq!(
            serde_json::to_value(&bindings["2"]).unwrap(),
            json!({"type": "TEXT", "value": "x"})
        );
        assert_eq!(
            serde_json::to_value(&bindings["3"]).unwrap(),
            json!({"type": "TEXT", "value": null})
        );
    }

    #[test]
    fn canonical_encodings() {
        let date = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();
        assert_eq!(
            BindValue::Date(date).encode().unwrap().as_deref(),
            Some("2024-01-15")
        );
        let time = NaiveTime::from_hms_nano_opt(13, 4, 5, 123_000_000).unwrap();
        assert_eq!(
            BindValue::Time(time).encode().unwrap().as_deref(),
            Some("13:04:05.123000000")
        );
        let ntz = date.and_time(time);
        assert_eq!(
            BindValue::TimestampNtz(ntz).encode().unwrap().as_deref(),
            Some("2024-01-15T13:04:05.123000000")
        );
        assert_eq!(
            BindValue::Bytes(vec![0xde, 0xad]).encode().unwrap().as_deref(),
            Some("3q0=")
        );
        assert_eq!(
            BindValue::Bool(true).encode().unwrap().as_deref(),
            Some("true")
        );
    }

    #[test]
    fn array_binding_is_columnar() {
        let bindings = bindings_for(&[BindValue::Array(vec![
            BindValue::Str("a".to_string()),
            BindValue::Null,
            BindValue::Str("c".to_string()),
        ])])
        .unwrap();
        assert_eq!(
            serde_json::to_value(&bindings["1"]).unwrap(),
            json!({"type": "TEXT", "value": ["a", null, "c"]})
        );
    }

    #[test]
    fn mixed_type_arrays_are_rejected() {
        let err = bindings_for(&[BindValue::Array(vec![
            BindValue::Int(1),
            BindValue::Str("two".to_string()),
        ])])
        .unwrap_err();
        assert!(format!("{err}").contains("mixes"), "{err}");
    }

    #[test]
    fn bulk_detection() {
        assert!(is_bulk(&[
            BindValue::Array(vec![BindValue::Int(1); 3]),
            BindValue::Array(vec![BindValue::Str("x".to_string()); 3]),
        ]));
        assert!(!is_bulk(&[
            BindValue::Array(vec![BindValue::Int(1); 3]),
            BindValue::Array(vec![BindValue::Int(1); 2]),
        ]));
        assert!(!is_bulk(&[BindValue::Int(1)]));
        assert!(!is_bulk(&[]));

        assert_eq!(
            array_element_count(&[
                BindValue::Array(vec![BindValue::Int(1); 3]),
                BindValue::Int(9),
            ]),
            3
        );
    }

    #[test]
    fn all_null_array_binds_as_text() {
        let bindings =
            bindings_for(&[BindValue::Array(vec![BindValue::Null, BindValue::Null])]).unwrap();
        assert_eq!(
            serde_json::to_value(&bindings["1"]).unwrap(),
            json!({"type": "TEXT", "value": [null, null]})
        );
    }
}
