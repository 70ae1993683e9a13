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

//! The S3 stage client.
//!
//! Requests are signed with SigV4 using the credentials the stage handed
//! out. Objects above [MULTIPART_THRESHOLD] upload through the multipart
//! API in [PART_SIZE] parts.
//!
//! [MULTIPART_THRESHOLD]: super::MULTIPART_THRESHOLD
//! [PART_SIZE]: super::PART_SIZE

use super::{Downloaded, ObjectMeta, RemoteHead, StorageClient};
use crate::location;
use crate::plan::StageInfo;
use bytes::Bytes;
use serde::Deserialize;
use snowflake_core::Result;
use snowflake_core::error::Error;
use snowflake_core::http::Transport;
use snowflake_core::sigv4::{self, AwsCredentials, SignableRequest};
use snowflake_core::storage_flow::StorageProvider;
use tokio_util::sync::CancellationToken;

const META_PREFIX: &str = "x-amz-meta-";

pub struct S3Client {
    transport: Transport,
    info: StageInfo,
    credentials: AwsCredentials,
    region: String,
}

impl S3Client {
    pub fn new(transport: Transport, info: StageInfo) -> Result<Self> {
        let creds = &info.creds;
        let (Some(access_key_id), Some(secret_access_key)) =
            (creds.aws_key_id.clone(), creds.aws_secret_key.clone())
        else {
            return Err(Error::transfer("S3 stage carries no credentials"));
        };
        let credentials = AwsCredentials {
            access_key_id,
            secret_access_key,
            session_token: creds.aws_token.clone(),
        };
        let region = info.region.clone().unwrap_or_else(|| "us-west-2".to_string());
        Ok(Self {
            transport,
            info,
            credentials,
            region,
        })
    }

    /// Signs and sends one request, returning the response regardless of
    /// status.
    async fn send(
        &self,
        method: http::Method,
        url: url::Url,
        headers: Vec<(String, String)>,
        body: Bytes,
        cancel: &CancellationToken,
    ) -> Result<reqwest::Response> {
        let mut signed_headers = headers.clone();
        signed_headers.push((
            "x-amz-content-sha256".to_string(),
            sigv4::payload_hash(&body),
        ));
        let request = SignableRequest {
            method: method.as_str(),
            url: &url,
            headers: signed_headers.clone(),
            payload_hash: sigv4::payload_hash(&body),
        };
        let auth_headers = sigv4::sign(
            &request,
            &self.credentials,
            &self.region,
            "s3",
            chrono::Utc::now(),
        )?;

        let mut builder = self
            .transport
            .client()
            .request(method, url.to_string())
            .body(body);
        for (name, value) in signed_headers.into_iter().chain(auth_headers) {
            builder = builder.header(name, value);
        }
        self.transport.attempt(builder, None, cancel).await
    }

    async fn require_success(
        &self,
        response: reqwest::Response,
    ) -> Result<reqwest::Response> {
        if response.status().is_success() {
            return Ok(response);
        }
        Err(super::classify_response(StorageProvider::S3, response, false).await)
    }

    async fn put_single(
        &self,
        url: url::Url,
        body: Bytes,
        meta: &ObjectMeta,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let response = self
            .send(http::Method::PUT, url, meta.headers(META_PREFIX), body, cancel)
            .await?;
        self.require_success(response).await?;
        Ok(())
    }

    async fn put_multipart(
        &self,
        url: url::Url,
        body: Bytes,
        meta: &ObjectMeta,
        cancel: &CancellationToken,
    ) -> Result<()> {
        #[derive(Debug, Deserialize)]
        #[serde(rename_all = "PascalCase")]
        struct InitiateMultipartUploadResult {
            upload_id: String,
        }

        let mut initiate_url = url.clone();
        initiate_url.set_query(Some("uploads="));
        let response = self
            .send(
                http::Method::POST,
                initiate_url,
                meta.headers(META_PREFIX),
                Bytes::new(),
                cancel,
            )
            .await?;
        let response = self.require_success(response).await?;
        let text = response.text().await.map_err(Error::transfer)?;
        let initiated: InitiateMultipartUploadResult =
            quick_xml::de::from_str(&text).map_err(Error::transfer)?;
        let upload_id = initiated.upload_id;

        let mut etags = Vec::new();
        for (index, part) in body.chunks(super::PART_SIZE).enumerate() {
            let part_number = index + 1;
            let mut part_url = url.clone();
            part_url.set_query(Some(&format!(
                "partNumber={part_number}&uploadId={upload_id}"
            )));
            let response = self
                .send(
                    http::Method::PUT,
                    part_url,
                    Vec::new(),
                    Bytes::copy_from_slice(part),
                    cancel,
                )
                .await?;
            let response = self.require_success(response).await?;
            let etag = response
                .headers()
                .get(http::header::ETAG)
                .and_then(|v| v.to_str().ok())
                .ok_or_else(|| Error::transfer("part upload response carried no ETag"))?
                .to_string();
            etags.push(etag);
        }

        let parts = etags
            .iter()
            .enumerate()
            .map(|(index, etag)| {
                format!(
                    "<Part><PartNumber>{}</PartNumber><ETag>{}</ETag></Part>",
                    index + 1,
                    etag
                )
            })
            .collect::<String>();
        let complete_body = format!("<CompleteMultipartUpload>{parts}</CompleteMultipartUpload>");
        let mut complete_url = url;
        complete_url.set_query(Some(&format!("uploadId={upload_id}")));
        let response = self
            .send(
                http::Method::POST,
                complete_url,
                Vec::new(),
                Bytes::from(complete_body),
                cancel,
            )
            .await?;
        self.require_success(response).await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl StorageClient for S3Client {
    async fn put(
        &self,
        key: &str,
        body: Bytes,
        meta: &ObjectMeta,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let url = location::s3_url(&self.info, key)?;
        if body.len() > super::MULTIPART_THRESHOLD {
            self.put_multipart(url, body, meta, cancel).await
        } else {
            self.put_single(url, body, meta, cancel).await
        }
    }

    async fn head(&self, key: &str, cancel: &CancellationToken) -> Result<Option<RemoteHead>> {
        let url = location::s3_url(&self.info, key)?;
        let response = self
            .send(http::Method::HEAD, url, Vec::new(), Bytes::new(), cancel)
            .await?;
        if response.status().as_u16() == 404 {
            return Ok(None);
        }
        let sha256_digest = super::meta_header(&response, META_PREFIX, super::META_DIGEST);
        let response = self.require_success(response).await?;
        let content_length = response.content_length().unwrap_or_default();
        Ok(Some(RemoteHead {
            content_length,
            sha256_digest,
        }))
    }

    async fn get(&self, key: &str, cancel: &CancellationToken) -> Result<Downloaded> {
        let url = location::s3_url(&self.info, key)?;
        let response = self
            .send(http::Method::GET, url, Vec::new(), Bytes::new(), cancel)
            .await?;
        let response = self.require_success(response).await?;
        let wrapped_key = super::meta_header(&response, META_PREFIX, super::META_WRAPPED_KEY);
        let body = response.bytes().await.map_err(Error::transfer)?;
        Ok(Downloaded { body, wrapped_key })
    }
}
