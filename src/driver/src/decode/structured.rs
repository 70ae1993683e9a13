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

//! Structured OBJECT/ARRAY/MAP values.
//!
//! A structured column has a declared schema, unlike VARIANT. Cells decode
//! into [StructuredValue], which exposes typed accessors; caller structs
//! implement [ScanStructured] to pull fields by name.

use crate::decode::value::Value;
use snowflake_core::Result;
use snowflake_core::error::Error;

/// A structured OBJECT cell: named fields in declaration order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StructuredValue {
    fields: Vec<(String, Value)>,
}

impl StructuredValue {
    pub fn new(fields: Vec<(String, Value)>) -> Self {
        Self { fields }
    }

    pub fn fields(&self) -> &[(String, Value)] {
        &self.fields
    }

    /// Field lookup is case-insensitive, matching server identifier rules.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields
            .iter()
            .find(|(field, _)| field.eq_ignore_ascii_case(name))
            .map(|(_, value)| value)
    }

    fn require(&self, name: &str) -> Result<&Value> {
        self.get(name)
            .ok_or_else(|| Error::decode(format!("no field named {name}")))
    }

    pub fn get_string(&self, name: &str) -> Result<String> {
        match self.require(name)? {
            Value::Str(v) | Value::Json(v) => Ok(v.clone()),
            other => Err(type_mismatch(name, "string", other)),
        }
    }

    pub fn get_i64(&self, name: &str) -> Result<i64> {
        match self.require(name)? {
            Value::Int(v) => Ok(*v),
            other => Err(type_mismatch(name, "integer", other)),
        }
    }

    pub fn get_f64(&self, name: &str) -> Result<f64> {
        match self.require(name)? {
            Value::Float(v) => Ok(*v),
            Value::Int(v) => Ok(*v as f64),
            other => Err(type_mismatch(name, "double", other)),
        }
    }

    pub fn get_bool(&self, name: &str) -> Result<bool> {
        match self.require(name)? {
            Value::Bool(v) => Ok(*v),
            other => Err(type_mismatch(name, "boolean", other)),
        }
    }

    pub fn get_time(&self, name: &str) -> Result<chrono::NaiveDateTime> {
        match self.require(name)? {
            Value::TimestampNtz(v) => Ok(*v),
            Value::TimestampLtz(v) => Ok(v.naive_utc()),
            Value::TimestampTz(v) => Ok(v.naive_utc()),
            other => Err(type_mismatch(name, "timestamp", other)),
        }
    }

    pub fn get_struct(&self, name: &str) -> Result<&StructuredValue> {
        match self.require(name)? {
            Value::Struct(v) => Ok(v),
            other => Err(type_mismatch(name, "object", other)),
        }
    }

    pub fn get_array(&self, name: &str) -> Result<&[Value]> {
        match self.require(name)? {
            Value::Array(v) => Ok(v),
            other => Err(type_mismatch(name, "array", other)),
        }
    }

    pub fn is_null(&self, name: &str) -> Result<bool> {
        Ok(self.require(name)?.is_null())
    }
}

fn type_mismatch(name: &str, want: &str, got: &Value) -> Error {
    Error::decode(format!("field {name} is not a {want}: {got:?}"))
}

/// Implemented by caller types that populate themselves from a structured
/// OBJECT cell.
pub trait ScanStructured: Sized {
    fn scan(value: &StructuredValue) -> Result<Self>;
}

/// Converts a JSON value into the structured cell model.
pub(crate) fn from_json(value: &serde_json::Value) -> Value {
    match value {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(*b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Int(i)
            } else {
                Value::Float(n.as_f64().unwrap_or(f64::NAN))
            }
        }
        serde_json::Value::String(s) => Value::Str(s.clone()),
        serde_json::Value::Array(items) => Value::Array(items.iter().map(from_json).collect()),
        serde_json::Value::Object(fields) => Value::Struct(StructuredValue::new(
            fields
                .iter()
                .map(|(name, value)| (name.clone(), from_json(value)))
                .collect(),
        )),
    }
}

/// Converts a JSON object into a MAP cell, preserving order.
pub(crate) fn map_from_json(value: &serde_json::Value) -> Result<Value> {
    let object = value
        .as_object()
        .ok_or_else(|| Error::decode("MAP cell is not a JSON object"))?;
    Ok(Value::Map(
        object
            .iter()
            .map(|(key, value)| (Value::Str(key.clone()), from_json(value)))
            .collect(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Address {
        city: String,
        zip: i64,
    }

    impl ScanStructured for Address {
        fn scan(value: &StructuredValue) -> Result<Self> {
            Ok(Address {
                city: value.get_string("city")?,
                zip: value.get_i64("zip")?,
            })
        }
    }

    fn sample() -> StructuredValue {
        match from_json(&json!({"city": "Bozeman", "zip": 59715, "active": true})) {
            Value::Struct(v) => v,
            other => panic!("expected a struct, got {other:?}"),
        }
    }

    #[test]
    fn typed_getters() {
        let value = sample();
        assert_eq!(value.get_string("city").unwrap(), "Bozeman");
        assert_eq!(value.get_i64("zip").unwrap(), 59715);
        assert!(value.get_bool("active").unwrap());
        // Case-insensitive lookup.
        assert_eq!(value.get_i64("ZIP").unwrap(), 59715);
        // Type mismatches and missing fields are decode errors.
        assert!(value.get_i64("city").is_err());
        assert!(value.get_string("country").is_err());
    }

    #[test]
    fn scan_populates_caller_struct() {
        let address = Address::scan(&sample()).unwrap();
        assert_eq!(address.city, "Bozeman");
        assert_eq!(address.zip, 59715);
    }

    #[test]
    fn nested_structures() {
        let value = from_json(&json!({"inner": {"a": [1, 2]}}));
        let Value::Struct(outer) = value else {
            panic!("expected struct");
        };
        let inner = outer.get_struct("inner").unwrap();
        assert_eq!(
            inner.get_array("a").unwrap(),
            &[Value::Int(1), Value::Int(2)]
        );
    }

    #[test]
    fn map_preserves_order() {
        let Value::Map(entries) = map_from_json(&json!({"k1": 1, "k2": 2})).unwrap() else {
            panic!("expected map");
        };
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].0, Value::Str("k1".to_string()));
        assert_eq!(entries[1].1, Value::Int(2));
    }
}
