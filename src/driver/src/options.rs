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

//! Per-call query options.
//!
//! The original driver hid these behind ambient context values; here they
//! are an explicit builder passed into each call. Library-wide defaults
//! live on the session configuration.

use std::time::Duration;

/// Options for a single query call.
#[derive(Clone, Debug, Default)]
pub struct QueryOptions {
    /// Submit asynchronously and return a handle; rows fetch on first pull.
    pub async_mode: bool,
    /// Asynchronous submit that never fetches rows; `next()` fails.
    pub async_no_fetch: bool,
    /// Overrides the generated request id.
    pub request_id: Option<uuid::Uuid>,
    /// Receives the query id as soon as it is known.
    pub query_id_tx: Option<tokio::sync::mpsc::UnboundedSender<String>>,
    /// Skip submission; fetch the result of a prior query instead.
    pub fetch_result_by_id: Option<String>,
    /// Only return column metadata; no rows.
    pub describe_only: bool,
    /// Allow a multi-statement batch of `n` statements (0 = any).
    pub multi_statement_count: Option<i64>,
    /// Decode numerics into big-number types instead of i64/f64.
    pub higher_precision: bool,
    /// An in-memory source for PUT.
    pub file_stream: Option<(String, bytes::Bytes)>,
    /// Yield raw Arrow record batches instead of rows.
    pub arrow_batches: bool,
    /// Preserve the raw Arrow timestamp struct instead of converting.
    pub raw_timestamps: bool,
    /// Validate UTF-8 of Arrow string columns; invalid data fails the scan.
    pub utf8_validation: bool,
    /// Marks driver-internal statements (stage DDL for bulk binds).
    pub is_internal: bool,
    /// Per-call timeout; defaults to the session's request timeout.
    pub timeout: Option<Duration>,
    /// The caller's cancellation handle; defaults to a child of the
    /// session's scope.
    pub cancel: Option<tokio_util::sync::CancellationToken>,
}

impl QueryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_async(mut self) -> Self {
        self.async_mode = true;
        self
    }

    pub fn with_async_no_fetch(mut self) -> Self {
        self.async_mode = true;
        self.async_no_fetch = true;
        self
    }

    pub fn with_request_id(mut self, request_id: uuid::Uuid) -> Self {
        self.request_id = Some(request_id);
        self
    }

    pub fn with_query_id_tx(
        mut self,
        tx: tokio::sync::mpsc::UnboundedSender<String>,
    ) -> Self {
        self.query_id_tx = Some(tx);
        self
    }

    pub fn with_fetch_result_by_id<S: Into<String>>(mut self, query_id: S) -> Self {
        self.fetch_result_by_id = Some(query_id.into());
        self
    }

    pub fn with_describe_only(mut self) -> Self {
        self.describe_only = true;
        self
    }

    pub fn with_multi_statement_count(mut self, count: i64) -> Self {
        self.multi_statement_count = Some(count);
        self
    }

    pub fn with_higher_precision(mut self) -> Self {
        self.higher_precision = true;
        self
    }

    pub fn with_file_stream<S: Into<String>>(mut self, name: S, data: bytes::Bytes) -> Self {
        self.file_stream = Some((name.into(), data));
        self
    }

    pub fn with_arrow_batches(mut self) -> Self {
        self.arrow_batches = true;
        self
    }

    pub fn with_raw_timestamps(mut self) -> Self {
        self.raw_timestamps = true;
        self
    }

    pub fn with_utf8_validation(mut self) -> Self {
        self.utf8_validation = true;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_cancel(mut self, cancel: tokio_util::sync::CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Emits the query id to the caller's channel, if one is attached.
    pub(crate) fn notify_query_id(&self, query_id: &str) {
        if let Some(tx) = &self.query_id_tx {
            let _ = tx.send(query_id.to_string());
        }
    }
}
