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

//! The typed cell model.

use crate::decode::structured::StructuredValue;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use num_bigint::BigInt;

/// An exact fixed-point number: `mantissa * 10^-scale`.
///
/// Produced by the higher-precision mode for NUMBER columns whose
/// precision exceeds what `i64`/`f64` hold exactly.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Decimal {
    pub mantissa: BigInt,
    pub scale: u32,
}

impl std::fmt::Display for Decimal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.scale == 0 {
            return write!(f, "{}", self.mantissa);
        }
        let negative = self.mantissa.sign() == num_bigint::Sign::Minus;
        let digits = self.mantissa.magnitude().to_string();
        let scale = self.scale as usize;
        let (integral, fraction) = if digits.len() > scale {
            let (i, fr) = digits.split_at(digits.len() - scale);
            (i.to_string(), fr.to_string())
        } else {
            ("0".to_string(), format!("{digits:0>scale$}"))
        };
        write!(f, "{}{integral}.{fraction}", if negative { "-" } else { "" })
    }
}

/// One decoded cell.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Null,
    Int(i64),
    /// NUMBER(scale=0) beyond `i64`, under higher precision.
    BigInt(BigInt),
    /// NUMBER(scale>0) at exact precision, under higher precision.
    Decimal(Decimal),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    Bool(bool),
    Date(NaiveDate),
    /// Duration since midnight at the column's precision.
    Time(NaiveTime),
    TimestampNtz(NaiveDateTime),
    /// An instant rendered in the session timezone.
    TimestampLtz(DateTime<chrono_tz::Tz>),
    /// An instant with the offset stored alongside it.
    TimestampTz(DateTime<FixedOffset>),
    /// The undecoded Arrow timestamp struct, kept on request.
    RawTimestamp {
        epoch: i64,
        fraction: i32,
        timezone: Option<i32>,
    },
    /// Unstructured OBJECT/ARRAY/VARIANT: the raw JSON text.
    Json(String),
    /// VECTOR: a fixed-length numeric array.
    Vector(Vec<f64>),
    /// Structured OBJECT.
    Struct(StructuredValue),
    /// Structured ARRAY.
    Array(Vec<Value>),
    /// Structured MAP, in server order.
    Map(Vec<(Value, Value)>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            Value::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(v) | Value::Json(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }
}
