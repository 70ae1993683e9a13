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

//! Compression detection and gzip support for uploads.
//!
//! Detection prefers magic bytes; formats without a reliable signature
//! (brotli, raw deflate) fall back to the file extension. AUTO_COMPRESS
//! gzips uncompressed sources; already-compressed sources are staged
//! verbatim.

use flate2::Compression;
use flate2::write::GzEncoder;
use snowflake_core::Result;
use snowflake_core::error::Error;
use std::io::Write as _;

/// A compression format the stage understands.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Format {
    pub name: &'static str,
    pub extension: &'static str,
    /// Whether the staged object keeps this compression.
    pub supported: bool,
}

pub const GZIP: Format = Format { name: "GZIP", extension: ".gz", supported: true };
pub const BZIP2: Format = Format { name: "BZ2", extension: ".bz2", supported: true };
pub const ZSTD: Format = Format { name: "ZSTD", extension: ".zst", supported: true };
pub const BROTLI: Format = Format { name: "BROTLI", extension: ".br", supported: true };
pub const DEFLATE: Format = Format { name: "DEFLATE", extension: ".deflate", supported: true };
pub const RAW_DEFLATE: Format = Format {
    name: "RAW_DEFLATE",
    extension: ".raw_deflate",
    supported: true,
};

/// Detects compression from the first bytes of the body, falling back to
/// the file name for formats without a magic number.
pub fn detect(body: &[u8], name: &str) -> Option<Format> {
    match body {
        [0x1f, 0x8b, ..] => return Some(GZIP),
        [b'B', b'Z', b'h', ..] => return Some(BZIP2),
        [0x28, 0xb5, 0x2f, 0xfd, ..] => return Some(ZSTD),
        [0x78, 0x01 | 0x9c | 0xda, ..] => return Some(DEFLATE),
        _ => {}
    }
    let lower = name.to_ascii_lowercase();
    [GZIP, BZIP2, ZSTD, BROTLI, DEFLATE, RAW_DEFLATE]
        .into_iter()
        .find(|f| lower.ends_with(f.extension))
}

/// Looks up the format named by a `SOURCE_COMPRESSION` option.
pub fn from_name(name: &str) -> Result<Option<Format>> {
    match name.to_ascii_uppercase().as_str() {
        "AUTO_DETECT" | "NONE" => Ok(None),
        "GZIP" => Ok(Some(GZIP)),
        "BZ2" | "BZIP2" => Ok(Some(BZIP2)),
        "ZSTD" => Ok(Some(ZSTD)),
        "BROTLI" => Ok(Some(BROTLI)),
        "DEFLATE" => Ok(Some(DEFLATE)),
        "RAW_DEFLATE" => Ok(Some(RAW_DEFLATE)),
        other => Err(Error::transfer(format!(
            "unknown source compression: {other}"
        ))),
    }
}

/// Gzips `body` for staging.
pub fn gzip(body: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(body).map_err(Error::transfer)?;
    encoder.finish().map_err(Error::transfer)
}

/// Gunzips a body, used by tests and the GET path when a caller asks for
/// decompressed output.
pub fn gunzip(body: &[u8]) -> Result<Vec<u8>> {
    use std::io::Read as _;
    let mut decoder = flate2::read::GzDecoder::new(body);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out).map_err(Error::transfer)?;
    Ok(out)
}
