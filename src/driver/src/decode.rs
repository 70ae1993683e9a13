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

//! Row decoding.
//!
//! Cells arrive either as JSON strings or as Arrow record batches; both
//! paths produce the same [Value] model. The decoder for a query is picked
//! once from the response's `queryResultFormat` and never changes
//! mid-stream.

/// The typed cell model.
pub mod value;

/// The JSON cell decoder.
pub mod json;

/// The Arrow record-batch decoder.
pub mod arrow;

/// Structured OBJECT/ARRAY/MAP values and the scan trait.
pub mod structured;

pub use value::{Decimal, Value};

/// Options that shape decoding, fixed per query.
#[derive(Clone, Debug)]
pub struct DecodeOptions {
    /// Decode out-of-range numerics into big-number types instead of
    /// falling back to strings.
    pub higher_precision: bool,
    /// Preserve raw Arrow timestamp structs instead of converting.
    pub raw_timestamps: bool,
    /// Validate UTF-8 on Arrow text columns backed by binary buffers.
    pub utf8_validation: bool,
    /// The session timezone, applied to TIMESTAMP_LTZ.
    pub timezone: chrono_tz::Tz,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            higher_precision: false,
            raw_timestamps: false,
            utf8_validation: false,
            timezone: chrono_tz::UTC,
        }
    }
}
