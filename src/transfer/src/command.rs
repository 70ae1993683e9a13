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

//! PUT/GET statement detection and local parsing.
//!
//! The server is the authority on parsing a PUT/GET statement; the driver
//! only needs to (1) recognize one early enough to route the response into
//! the transfer agent instead of a result stream, and (2) pull out the
//! local file URL to expand globs and to honor in-memory sources.

use regex::Regex;
use snowflake_core::Result;
use snowflake_core::error::Error;
use std::sync::OnceLock;

fn put_or_get() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?is)^\s*(?:/\*.*?\*/\s*)*(put|get)\s").expect("hand-written pattern")
    })
}

fn file_scheme() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)\bfile://(?:'([^']+)'|(\S+))"#).expect("hand-written pattern")
    })
}

/// Returns `true` when `sql` is a PUT or GET statement, ignoring leading
/// whitespace and block comments.
pub fn is_file_transfer(sql: &str) -> bool {
    put_or_get().is_match(sql)
}

/// Extracts the `file://` URL from a PUT/GET statement.
pub fn local_file_url(sql: &str) -> Result<String> {
    let captures = file_scheme()
        .captures(sql)
        .ok_or_else(|| Error::transfer("statement carries no file:// URL"))?;
    let path = captures
        .get(1)
        .or_else(|| captures.get(2))
        .map(|m| m.as_str())
        .unwrap_or_default();
    Ok(path.to_string())
}

/// Expands a local path that may contain glob characters.
pub fn expand_glob(pattern: &str) -> Result<Vec<std::path::PathBuf>> {
    if !pattern.contains(['*', '?', '[']) {
        return Ok(vec![std::path::PathBuf::from(pattern)]);
    }
    let paths = glob::glob(pattern)
        .map_err(Error::transfer)?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(Error::transfer)?;
    if paths.is_empty() {
        return Err(Error::transfer(format!("no file matches {pattern}")));
    }
    Ok(paths)
}
