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

//! The local-filesystem stage client, used by developer deployments.
//!
//! No encryption and no credentials: the stage location is a directory.

use super::{Downloaded, ObjectMeta, RemoteHead, StorageClient};
use crate::plan::StageInfo;
use bytes::Bytes;
use snowflake_core::Result;
use snowflake_core::error::Error;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

pub struct LocalClient {
    root: PathBuf,
}

impl LocalClient {
    pub fn new(info: StageInfo) -> Self {
        Self {
            root: PathBuf::from(info.location),
        }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }
}

#[async_trait::async_trait]
impl StorageClient for LocalClient {
    async fn put(
        &self,
        key: &str,
        body: Bytes,
        _meta: &ObjectMeta,
        _cancel: &CancellationToken,
    ) -> Result<()> {
        let path = self.path_for(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(Error::transfer)?;
        }
        tokio::fs::write(&path, &body).await.map_err(Error::transfer)
    }

    async fn head(&self, key: &str, _cancel: &CancellationToken) -> Result<Option<RemoteHead>> {
        match tokio::fs::metadata(self.path_for(key)).await {
            Ok(metadata) => Ok(Some(RemoteHead {
                content_length: metadata.len(),
                sha256_digest: None,
            })),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::transfer(e)),
        }
    }

    async fn get(&self, key: &str, _cancel: &CancellationToken) -> Result<Downloaded> {
        match tokio::fs::read(self.path_for(key)).await {
            Ok(body) => Ok(Downloaded {
                body: Bytes::from(body),
                wrapped_key: None,
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::transfer(super::StageError {
                    flow: snowflake_core::storage_flow::StorageFlow::NotFound,
                    status: 404,
                    message: format!("{key} does not exist on the stage"),
                }))
            }
            Err(e) => Err(Error::transfer(e)),
        }
    }
}
