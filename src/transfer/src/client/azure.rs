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

//! The Azure Blob stage client.
//!
//! The stage hands out a SAS token which rides on every URL. Small objects
//! upload as one block blob PUT; large ones as Put Block calls followed by
//! a Put Block List.

use super::{Downloaded, ObjectMeta, RemoteHead, StorageClient};
use crate::location;
use crate::plan::StageInfo;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use snowflake_core::Result;
use snowflake_core::error::Error;
use snowflake_core::http::Transport;
use snowflake_core::storage_flow::StorageProvider;
use tokio_util::sync::CancellationToken;

const META_PREFIX: &str = "x-ms-meta-";

pub struct AzureClient {
    transport: Transport,
    info: StageInfo,
    sas_token: String,
}

impl AzureClient {
    pub fn new(transport: Transport, info: StageInfo) -> Result<Self> {
        let sas_token = info
            .creds
            .azure_sas_token
            .clone()
            .ok_or_else(|| Error::transfer("Azure stage carries no SAS token"))?;
        Ok(Self {
            transport,
            info,
            sas_token,
        })
    }

    fn signed_url(&self, key: &str, extra_query: Option<&str>) -> Result<url::Url> {
        let mut url = location::azure_url(&self.info, key)?;
        let sas = self.sas_token.trim_start_matches('?');
        let query = match extra_query {
            Some(extra) => format!("{sas}&{extra}"),
            None => sas.to_string(),
        };
        url.set_query(Some(&query));
        Ok(url)
    }

    async fn send(
        &self,
        method: http::Method,
        url: url::Url,
        headers: Vec<(String, String)>,
        body: Bytes,
        cancel: &CancellationToken,
    ) -> Result<reqwest::Response> {
        let mut builder = self
            .transport
            .client()
            .request(method, url.to_string())
            .header("x-ms-version", "2021-12-02")
            .body(body);
        for (name, value) in headers {
            builder = builder.header(name, value);
        }
        self.transport.attempt(builder, None, cancel).await
    }

    async fn require_success(&self, response: reqwest::Response) -> Result<reqwest::Response> {
        if response.status().is_success() {
            return Ok(response);
        }
        Err(super::classify_response(StorageProvider::Azure, response, false).await)
    }

    async fn put_block_blob(
        &self,
        key: &str,
        body: Bytes,
        meta: &ObjectMeta,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let url = self.signed_url(key, None)?;
        let mut headers = meta.headers(META_PREFIX);
        headers.push(("x-ms-blob-type".to_string(), "BlockBlob".to_string()));
        let response = self.send(http::Method::PUT, url, headers, body, cancel).await?;
        self.require_success(response).await?;
        Ok(())
    }

    async fn put_block_list(
        &self,
        key: &str,
        body: Bytes,
        meta: &ObjectMeta,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let mut block_ids = Vec::new();
        for (index, block) in body.chunks(super::PART_SIZE).enumerate() {
            let block_id = STANDARD.encode(format!("{index:08}"));
            let encoded: String =
                url::form_urlencoded::byte_serialize(block_id.as_bytes()).collect();
            let url = self.signed_url(key, Some(&format!("comp=block&blockid={encoded}")))?;
            let response = self
                .send(
                    http::Method::PUT,
                    url,
                    Vec::new(),
                    Bytes::copy_from_slice(block),
                    cancel,
                )
                .await?;
            self.require_success(response).await?;
            block_ids.push(block_id);
        }

        let list = block_ids
            .iter()
            .map(|id| format!("<Latest>{id}</Latest>"))
            .collect::<String>();
        let list_body = format!(
            "<?xml version=\"1.0\" encoding=\"utf-8\"?><BlockList>{list}</BlockList>"
        );
        let url = self.signed_url(key, Some("comp=blocklist"))?;
        let response = self
            .send(
                http::Method::PUT,
                url,
                meta.headers(META_PREFIX),
                Bytes::from(list_body),
                cancel,
            )
            .await?;
        self.require_success(response).await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl StorageClient for AzureClient {
    async fn put(
        &self,
        key: &str,
        body: Bytes,
        meta: &ObjectMeta,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if body.len() > super::MULTIPART_THRESHOLD {
            self.put_block_list(key, body, meta, cancel).await
        } else {
            self.put_block_blob(key, body, meta, cancel).await
        }
    }

    async fn head(&self, key: &str, cancel: &CancellationToken) -> Result<Option<RemoteHead>> {
        let url = self.signed_url(key, None)?;
        let response = self
            .send(http::Method::HEAD, url, Vec::new(), Bytes::new(), cancel)
            .await?;
        if response.status().as_u16() == 404 {
            return Ok(None);
        }
        let sha256_digest = super::meta_header(&response, META_PREFIX, super::META_DIGEST);
        let response = self.require_success(response).await?;
        Ok(Some(RemoteHead {
            content_length: response.content_length().unwrap_or_default(),
            sha256_digest,
        }))
    }

    async fn get(&self, key: &str, cancel: &CancellationToken) -> Result<Downloaded> {
        let url = self.signed_url(key, None)?;
        let response = self
            .send(http::Method::GET, url, Vec::new(), Bytes::new(), cancel)
            .await?;
        let response = self.require_success(response).await?;
        let wrapped_key = super::meta_header(&response, META_PREFIX, super::META_WRAPPED_KEY);
        let body = response.bytes().await.map_err(Error::transfer)?;
        Ok(Downloaded { body, wrapped_key })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::StageCredentials;

    fn client() -> AzureClient {
        let info = StageInfo {
            location_type: "AZURE".to_string(),
            location: "container/path/".to_string(),
            storage_account: Some("sfcaccount".to_string()),
            creds: StageCredentials {
                azure_sas_token: Some("?sv=2021&sig=abcd".to_string()),
                ..StageCredentials::default()
            },
            ..StageInfo::default()
        };
        AzureClient::new(Transport::builder().build().unwrap(), info).unwrap()
    }

    #[test]
    fn sas_token_rides_on_the_url() {
        let url = client().signed_url("x.csv.gz", None).unwrap();
        assert_eq!(url.query(), Some("sv=2021&sig=abcd"));
        let url = client().signed_url("x.csv.gz", Some("comp=blocklist")).unwrap();
        assert_eq!(url.query(), Some("sv=2021&sig=abcd&comp=blocklist"));
    }

    #[test]
    fn missing_sas_token_fails_fast() {
        let info = StageInfo {
            location_type: "AZURE".to_string(),
            storage_account: Some("sfcaccount".to_string()),
            ..StageInfo::default()
        };
        assert!(AzureClient::new(Transport::builder().build().unwrap(), info).is_err());
    }
}
