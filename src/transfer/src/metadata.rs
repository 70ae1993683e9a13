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

//! Per-file bookkeeping for a transfer.

use bytes::Bytes;
use std::path::PathBuf;

/// Where the bytes of one PUT file come from.
#[derive(Clone, Debug)]
pub enum Source {
    Path(PathBuf),
    /// An in-memory source supplied through the `fileStream` option.
    Stream { name: String, data: Bytes },
}

impl Source {
    pub fn name(&self) -> String {
        match self {
            Source::Path(path) => path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            Source::Stream { name, .. } => name.clone(),
        }
    }
}

/// The terminal status of one file, reported in the result rows.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResultStatus {
    Pending,
    Uploaded,
    Downloaded,
    Skipped,
    ErrStatus,
    NotFoundFile,
}

impl ResultStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultStatus::Pending => "PENDING",
            ResultStatus::Uploaded => "UPLOADED",
            ResultStatus::Downloaded => "DOWNLOADED",
            ResultStatus::Skipped => "SKIPPED",
            ResultStatus::ErrStatus => "ERROR",
            ResultStatus::NotFoundFile => "NOT_FOUND_FILE",
        }
    }
}

/// The working state the agent tracks for one file.
#[derive(Clone, Debug)]
pub struct FileMetadata {
    pub source: Source,
    /// The name of the object on the stage.
    pub dst_name: String,
    /// Compression of the source as detected or declared.
    pub src_compression: Option<&'static str>,
    /// Compression of the staged object (gzip when auto-compress applied).
    pub dst_compression: Option<&'static str>,
    pub src_size: u64,
    /// Size of the staged body after compression, before encryption.
    pub upload_size: u64,
    /// Base64 SHA-256 of the staged body, before encryption.
    pub sha256_digest: String,
    pub status: ResultStatus,
    pub message: String,
}

impl FileMetadata {
    pub fn new(source: Source) -> Self {
        let dst_name = source.name();
        Self {
            source,
            dst_name,
            src_compression: None,
            dst_compression: None,
            src_size: 0,
            upload_size: 0,
            sha256_digest: String::new(),
            status: ResultStatus::Pending,
            message: String::new(),
        }
    }
}

/// One row of the PUT/GET result set.
#[derive(Clone, Debug, PartialEq)]
pub struct TransferResult {
    pub source: String,
    pub target: String,
    pub source_size: u64,
    pub target_size: u64,
    pub source_compression: String,
    pub target_compression: String,
    pub status: &'static str,
    pub message: String,
}

impl TransferResult {
    pub(crate) fn from_metadata(file: &FileMetadata) -> Self {
        Self {
            source: file.source.name(),
            target: file.dst_name.clone(),
            source_size: file.src_size,
            target_size: file.upload_size,
            source_compression: file
                .src_compression
                .unwrap_or("NONE")
                .to_ascii_lowercase(),
            target_compression: file
                .dst_compression
                .unwrap_or("NONE")
                .to_ascii_lowercase(),
            status: file.status.as_str(),
            message: snowflake_core::secrets::mask(&file.message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_names() {
        let path = Source::Path(PathBuf::from("/tmp/dir/data.csv"));
        assert_eq!(path.name(), "data.csv");
        let stream = Source::Stream {
            name: "inline.csv".to_string(),
            data: Bytes::from_static(b"a,b\n"),
        };
        assert_eq!(stream.name(), "inline.csv");
    }

    #[test]
    fn result_row_reflects_metadata() {
        let mut file = FileMetadata::new(Source::Path(PathBuf::from("x.csv")));
        file.dst_name = "x.csv.gz".to_string();
        file.src_size = 100;
        file.upload_size = 42;
        file.dst_compression = Some("GZIP");
        file.status = ResultStatus::Uploaded;
        let row = TransferResult::from_metadata(&file);
        assert_eq!(row.source, "x.csv");
        assert_eq!(row.target, "x.csv.gz");
        assert_eq!(row.target_compression, "gzip");
        assert_eq!(row.status, "UPLOADED");
    }
}
