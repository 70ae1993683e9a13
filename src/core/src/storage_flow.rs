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

//! Response classification for signed cloud-storage URLs.
//!
//! Stage credentials and presigned URLs expire while long transfers are in
//! flight. Each provider reports expiry differently, so the mapping from an
//! HTTP response to "renew and retry" versus "give up" is a maintained
//! table. The message signatures are regular expressions because providers
//! rephrase these bodies over time.

use regex::Regex;
use std::sync::OnceLock;

/// The storage backend hosting a stage or a result chunk.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StorageProvider {
    S3,
    Azure,
    Gcs,
    LocalFs,
}

/// What the caller should do with a storage response.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StorageFlow {
    /// The request succeeded.
    Success,
    /// The stage credentials expired; re-acquire and retry.
    RenewToken,
    /// The presigned URL expired; re-acquire and retry.
    RenewPresignedUrl,
    /// The remote object does not exist.
    NotFound,
    /// A transient failure; retry under the backoff policy.
    NeedRetry,
    /// A permanent failure.
    Fatal,
}

fn s3_expired() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"Signature not valid in the specified time frame|ExpiredToken|Access Denied")
            .expect("hand-written pattern")
    })
}

fn azure_expired() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"Server failed to authenticate the request|AuthenticationFailed")
            .expect("hand-written pattern")
    })
}

/// Classifies a storage response.
///
/// `presigned` marks requests issued against a presigned URL rather than
/// credentialed ones; only those map `400` to
/// [StorageFlow::RenewPresignedUrl].
pub fn classify(
    provider: StorageProvider,
    status: u16,
    body: &str,
    presigned: bool,
) -> StorageFlow {
    if (200..300).contains(&status) {
        return StorageFlow::Success;
    }
    match status {
        404 => StorageFlow::NotFound,
        400 if presigned => StorageFlow::RenewPresignedUrl,
        401 if provider == StorageProvider::Gcs => StorageFlow::RenewToken,
        401 | 403 => match provider {
            StorageProvider::S3 if s3_expired().is_match(body) => StorageFlow::RenewToken,
            StorageProvider::Azure if azure_expired().is_match(body) => StorageFlow::RenewToken,
            _ => StorageFlow::Fatal,
        },
        408 | 429 => StorageFlow::NeedRetry,
        s if s >= 500 => StorageFlow::NeedRetry,
        _ => StorageFlow::Fatal,
    }
}
