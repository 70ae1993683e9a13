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

//! The file-transfer engine behind PUT and GET statements.
//!
//! The driver submits PUT/GET SQL like any other statement; the server
//! answers with a transfer plan (source files, stage location and
//! credentials, encryption material) instead of a result set. This crate
//! executes that plan: it globs local files, compresses and encrypts them,
//! and moves the bytes to or from S3, Azure Blob, GCS, or a local
//! filesystem stage with bounded parallelism and per-file status isolation.

/// The server-issued transfer plan and stage descriptors.
pub mod plan;

/// PUT/GET statement detection and local parsing.
pub mod command;

/// Per-file bookkeeping: metadata, status, and the result rows.
pub mod metadata;

/// Compression detection by magic bytes and gzip support for uploads.
pub mod compress;

/// Client-side encryption: AES-CBC/AES-GCM bodies, wrapped file keys.
pub mod encrypt;

/// Stage locations: bucket/prefix splitting and endpoint derivation.
pub mod location;

/// The storage clients: S3, Azure Blob, GCS, and local filesystem.
pub mod client;

/// The agent that runs a transfer plan to completion.
pub mod agent;

pub use snowflake_core::Result;
