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

//! A Snowflake client driver for Rust.
//!
//! Open a [Session] from a DSN or a [Config], submit SQL, and stream typed
//! rows back:
//!
//! ```no_run
//! use snowflake_driver::{Config, Session};
//! # async fn example() -> snowflake_core::Result<()> {
//! let config = Config::from_dsn("jsmith:secret@acme/testdb/public?warehouse=COMPUTE_WH")?;
//! let session = Session::connect(config).await?;
//! let mut rows = session.query("SELECT 1", &Default::default()).await?;
//! while let Some(row) = rows.next().await? {
//!     println!("{row:?}");
//! }
//! session.close().await?;
//! # Ok(())
//! # }
//! ```
//!
//! PUT and GET statements route into the file-transfer engine
//! transparently; asynchronous execution, multi-statement batches, and
//! per-call options hang off [QueryOptions].
//!
//! [Session]: session::Session
//! [Config]: config::Config
//! [QueryOptions]: options::QueryOptions

/// Driver configuration and defaults.
pub mod config;

/// DSN parsing.
pub mod dsn;

/// The TOML connection-configuration file.
pub mod config_file;

/// The REST wire types for query execution.
pub mod protocol;

/// The session-aware REST client: headers, token renewal, service echo.
pub mod rest;

/// Session lifecycle: connect, parameters, close.
pub mod session;

/// The session keepalive task.
pub mod heartbeat;

/// Query execution: submit, poll, cancel, fetch-by-id.
pub mod query;

/// Per-call query options.
pub mod options;

/// Parameter binding: scalar, array, and stage bulk.
pub mod bind;

/// Bulk-bind staging: CSV serialization and temporary-stage upload.
pub mod bind_uploader;

/// Result streaming.
pub mod rows;

/// Bounded-parallel chunk download.
pub mod chunks;

/// Row decoding: JSON, Arrow, and structured types.
pub mod decode;

/// The per-session query context cache.
pub mod query_context;

/// PUT/GET integration with the transfer engine.
pub mod put_get;

pub use config::Config;
pub use options::QueryOptions;
pub use rows::ResultStream;
pub use session::Session;
pub use snowflake_core::Result;
pub use snowflake_core::error::{Error, ErrorKind};
