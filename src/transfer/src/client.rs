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

//! The storage clients behind the transfer agent.
//!
//! One client per stage backend, all behind [StorageClient]. Clients do a
//! single attempt per call; the agent owns the retry loop. A non-success
//! response surfaces as a [StageError] carrying the [StorageFlow]
//! classification so the agent can decide between retry, credential
//! renewal, and giving up.

pub mod azure;
pub mod gcs;
pub mod local;
pub mod s3;

use crate::plan::StageInfo;
use bytes::Bytes;
use snowflake_core::Result;
use snowflake_core::error::Error;
use snowflake_core::http::Transport;
use snowflake_core::storage_flow::{StorageFlow, StorageProvider};
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;

/// Objects above this size upload in parts.
pub const MULTIPART_THRESHOLD: usize = 64 * 1024 * 1024;

/// The part size for chunked uploads.
pub const PART_SIZE: usize = 8 * 1024 * 1024;

/// Metadata names recorded with every staged object, combined with the
/// provider's metadata header prefix. Names carry no separators because
/// Azure restricts them to identifier characters.
pub const META_WRAPPED_KEY: &str = "key";
pub const META_MAT_DESC: &str = "matdesc";
pub const META_DIGEST: &str = "sfcdigest";

/// Metadata attached to an uploaded object.
#[derive(Clone, Debug, Default)]
pub struct ObjectMeta {
    pub wrapped_key: Option<String>,
    pub mat_desc: Option<String>,
    pub sha256_digest: String,
}

impl ObjectMeta {
    /// The metadata headers for a provider prefix such as `x-amz-meta-`.
    pub(crate) fn headers(&self, prefix: &str) -> Vec<(String, String)> {
        let mut headers = vec![(format!("{prefix}{META_DIGEST}"), self.sha256_digest.clone())];
        if let Some(key) = &self.wrapped_key {
            headers.push((format!("{prefix}{META_WRAPPED_KEY}"), key.clone()));
        }
        if let Some(desc) = &self.mat_desc {
            headers.push((format!("{prefix}{META_MAT_DESC}"), desc.clone()));
        }
        headers
    }
}

/// What a HEAD of a remote object returned.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteHead {
    pub content_length: u64,
    pub sha256_digest: Option<String>,
}

/// A downloaded object with the metadata needed to decrypt it.
#[derive(Clone, Debug)]
pub struct Downloaded {
    pub body: Bytes,
    pub wrapped_key: Option<String>,
}

/// A classified storage failure. The agent downcasts to this to route
/// between retry, renewal, and per-file failure. The message is masked at
/// construction.
#[derive(Clone, Debug, thiserror::Error)]
#[error("storage request failed ({flow:?}, HTTP {status}): {message}")]
pub struct StageError {
    pub flow: StorageFlow,
    pub status: u16,
    pub message: String,
}

/// Converts a non-success storage response into a classified error.
pub(crate) async fn classify_response(
    provider: StorageProvider,
    response: reqwest::Response,
    presigned: bool,
) -> Error {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    let sample: String = body.chars().take(512).collect();
    let flow = snowflake_core::storage_flow::classify(provider, status, &sample, presigned);
    Error::transfer(StageError {
        flow,
        status,
        message: snowflake_core::secrets::mask(&sample),
    })
}

/// Reads a metadata header back from a response.
pub(crate) fn meta_header(
    response: &reqwest::Response,
    prefix: &str,
    name: &str,
) -> Option<String> {
    response
        .headers()
        .get(format!("{prefix}{name}"))
        .and_then(|v| v.to_str().ok())
        .map(String::from)
}

/// One storage backend. A call makes exactly one attempt; the agent owns
/// retries and credential renewal.
#[async_trait::async_trait]
pub trait StorageClient: Send + Sync {
    /// Uploads `body` under `key`, with the object metadata.
    async fn put(
        &self,
        key: &str,
        body: Bytes,
        meta: &ObjectMeta,
        cancel: &CancellationToken,
    ) -> Result<()>;

    /// Returns the remote head, or `None` when the object does not exist.
    async fn head(&self, key: &str, cancel: &CancellationToken) -> Result<Option<RemoteHead>>;

    /// Downloads the object under `key`.
    async fn get(&self, key: &str, cancel: &CancellationToken) -> Result<Downloaded>;
}

/// Builds the client for a stage.
///
/// `presigned_urls` maps object keys to per-file presigned URLs when the
/// plan carries them (GCS).
pub fn for_stage(
    transport: Transport,
    info: StageInfo,
    presigned_urls: HashMap<String, String>,
) -> Result<Box<dyn StorageClient>> {
    match info.provider() {
        Some(StorageProvider::S3) => Ok(Box::new(s3::S3Client::new(transport, info)?)),
        Some(StorageProvider::Azure) => Ok(Box::new(azure::AzureClient::new(transport, info)?)),
        Some(StorageProvider::Gcs) => {
            Ok(Box::new(gcs::GcsClient::new(transport, info, presigned_urls)))
        }
        Some(StorageProvider::LocalFs) => Ok(Box::new(local::LocalClient::new(info))),
        None => Err(Error::transfer(format!(
            "unknown stage location type: {}",
            info.location_type
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_meta_headers() {
        let meta = ObjectMeta {
            wrapped_key: Some("d3JhcHBlZA==".to_string()),
            mat_desc: Some("{}".to_string()),
            sha256_digest: "digest".to_string(),
        };
        let headers = meta.headers("x-amz-meta-");
        assert!(headers.contains(&("x-amz-meta-sfcdigest".to_string(), "digest".to_string())));
        assert!(headers.contains(&("x-amz-meta-key".to_string(), "d3JhcHBlZA==".to_string())));
        assert!(headers.contains(&("x-amz-meta-matdesc".to_string(), "{}".to_string())));

        let plain = ObjectMeta {
            sha256_digest: "digest".to_string(),
            ..ObjectMeta::default()
        };
        assert_eq!(plain.headers("x-goog-meta-").len(), 1);
    }

    #[test]
    fn unknown_location_type_fails() {
        let info = StageInfo {
            location_type: "FTP".to_string(),
            ..StageInfo::default()
        };
        let transport = Transport::builder().build().unwrap();
        assert!(for_stage(transport, info, HashMap::new()).is_err());
    }
}
