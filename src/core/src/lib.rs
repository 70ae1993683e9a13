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

//! Transport, retry, and error-handling primitives shared by the Snowflake
//! driver crates.
//!
//! This crate contains the pieces of the driver that are independent of the
//! Snowflake wire protocol proper: the typed error hierarchy, the retry and
//! backoff policies, the retry loop, the pooled HTTPS transport, response
//! classification for cloud-storage endpoints, secret masking, and AWS SigV4
//! request signing (used both for workload-identity attestation and for S3
//! stage uploads).

/// The core error returned by all driver operations.
pub mod error;

/// Determines how errors are handled in the retry loop.
pub mod retry_policy;

/// Determines the backoff between retry attempts.
pub mod backoff_policy;

/// Truncated exponential backoff with jitter.
pub mod exponential_backoff;

/// The retry loop shared by the transport and the file-transfer agent.
pub mod retry_loop;

/// Per-request options: timeouts, retry overrides, idempotency.
pub mod options;

/// The pooled HTTPS transport.
pub mod http;

/// Response classification for signed cloud-storage URLs.
pub mod storage_flow;

/// Masks credentials out of text destined for logs or error messages.
pub mod secrets;

/// AWS Signature Version 4 request signing.
pub mod sigv4;

/// A `Result` alias where the `Err` case is `snowflake_core::error::Error`.
pub type Result<T> = std::result::Result<T, error::Error>;
