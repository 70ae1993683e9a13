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

//! The GCS stage client.
//!
//! Two access modes, decided per file: a presigned URL from the transfer
//! plan, or the stage's OAuth access token as a bearer header. Presigned
//! requests classify `400` as a renewal signal; bearer requests classify
//! `401` the same way.

use super::{Downloaded, ObjectMeta, RemoteHead, StorageClient};
use crate::location;
use crate::plan::StageInfo;
use bytes::Bytes;
use snowflake_core::Result;
use snowflake_core::error::Error;
use snowflake_core::http::Transport;
use snowflake_core::storage_flow::StorageProvider;
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;

const META_PREFIX: &str = "x-goog-meta-";

pub struct GcsClient {
    transport: Transport,
    info: StageInfo,
    presigned_urls: HashMap<String, String>,
}

enum Access {
    Presigned(url::Url),
    Bearer(url::Url, String),
}

impl GcsClient {
    pub fn new(
        transport: Transport,
        info: StageInfo,
        presigned_urls: HashMap<String, String>,
    ) -> Self {
        Self {
            transport,
            info,
            presigned_urls,
        }
    }

    fn access(&self, key: &str) -> Result<Access> {
        if let Some(presigned) = self
            .presigned_urls
            .get(key)
            .or(self.info.presigned_url.as_ref())
        {
            return Ok(Access::Presigned(
                url::Url::parse(presigned).map_err(Error::transfer)?,
            ));
        }
        let token = self.info.creds.gcs_access_token.clone().ok_or_else(|| {
            Error::transfer("GCS stage carries neither a presigned URL nor an access token")
        })?;
        Ok(Access::Bearer(location::gcs_url(&self.info, key)?, token))
    }

    async fn send(
        &self,
        method: http::Method,
        access: Access,
        headers: Vec<(String, String)>,
        body: Bytes,
        cancel: &CancellationToken,
    ) -> Result<(reqwest::Response, bool)> {
        let (url, bearer, presigned) = match access {
            Access::Presigned(url) => (url, None, true),
            Access::Bearer(url, token) => (url, Some(token), false),
        };
        let mut builder = self
            .transport
            .client()
            .request(method, url.to_string())
            .body(body);
        if let Some(token) = bearer {
            builder = builder.header(http::header::AUTHORIZATION, format!("Bearer {token}"));
        }
        for (name, value) in headers {
            builder = builder.header(name, value);
        }
        let response = self.transport.attempt(builder, None, cancel).await?;
        Ok((response, presigned))
    }

    async fn require_success(
        &self,
        response: reqwest::Response,
        presigned: bool,
    ) -> Result<reqwest::Response> {
        if response.status().is_success() {
            return Ok(response);
        }
        Err(super::classify_response(StorageProvider::Gcs, response, presigned).await)
    }
}

#[async_trait::async_trait]
impl StorageClient for GcsClient {
    async fn put(
        &self,
        key: &str,
        body: Bytes,
        meta: &ObjectMeta,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let access = self.access(key)?;
        let (response, presigned) = self
            .send(http::Method::PUT, access, meta.headers(META_PREFIX), body, cancel)
            .await?;
        self.require_success(response, presigned).await?;
        Ok(())
    }

    async fn head(&self, key: &str, cancel: &CancellationToken) -> Result<Option<RemoteHead>> {
        let access = self.access(key)?;
        let (response, presigned) = self
            .send(http::Method::HEAD, access, Vec::new(), Bytes::new(), cancel)
            .await?;
        if response.status().as_u16() == 404 {
            return Ok(None);
        }
        let sha256_digest = super::meta_header(&response, META_PREFIX, super::META_DIGEST);
        let response = self.require_success(response, presigned).await?;
        Ok(Some(RemoteHead {
            content_length: response.content_length().unwrap_or_default(),
            sha256_digest,
        }))
    }

    async fn get(&self, key: &str, cancel: &CancellationToken) -> Result<Downloaded> {
        let access = self.access(key)?;
        let (response, presigned) = self
            .send(http::Method::GET, access, Vec::new(), Bytes::new(), cancel)
            .await?;
        let response = self.require_success(response, presigned).await?;
        let wrapped_key = super::meta_header(&response, META_PREFIX, super::META_WRAPPED_KEY);
        let body = response.bytes().await.map_err(Error::transfer)?;
        Ok(Downloaded { body, wrapped_key })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::StageError;
    use crate::plan::StageCredentials;
    use httptest::{Expectation, Server, matchers::*, responders::*};
    use snowflake_core::storage_flow::StorageFlow;

    fn bearer_client(server: &Server) -> GcsClient {
        let info = StageInfo {
            location_type: "GCS".to_string(),
            location: "bucket/prefix/".to_string(),
            end_point: Some(server.url_str("/").trim_end_matches('/').to_string()),
            creds: StageCredentials {
                gcs_access_token: Some("gcs-token".to_string()),
                ..StageCredentials::default()
            },
            ..StageInfo::default()
        };
        GcsClient::new(Transport::builder().build().unwrap(), info, HashMap::new())
    }

    #[test]
    fn presigned_url_wins_over_token() {
        let info = StageInfo {
            location_type: "GCS".to_string(),
            location: "bucket/prefix/".to_string(),
            creds: StageCredentials {
                gcs_access_token: Some("gcs-token".to_string()),
                ..StageCredentials::default()
            },
            ..StageInfo::default()
        };
        let presigned = HashMap::from([(
            "x.csv".to_string(),
            "https://storage.googleapis.com/bucket/x.csv?X-Goog-Signature=sig".to_string(),
        )]);
        let client = GcsClient::new(Transport::builder().build().unwrap(), info, presigned);
        assert!(matches!(client.access("x.csv").unwrap(), Access::Presigned(_)));
        assert!(matches!(client.access("y.csv").unwrap(), Access::Bearer(..)));
    }

    #[test]
    fn no_access_path_fails() {
        let info = StageInfo {
            location_type: "GCS".to_string(),
            location: "bucket/prefix/".to_string(),
            ..StageInfo::default()
        };
        let client = GcsClient::new(Transport::builder().build().unwrap(), info, HashMap::new());
        assert!(client.access("x.csv").is_err());
    }

    #[tokio::test]
    async fn get_reads_metadata_headers() -> anyhow::Result<()> {
        let server = Server::run();
        server.expect(
            Expectation::matching(all_of![
                request::method_path("GET", "/bucket/prefix/x.csv.gz"),
                request::headers(contains(("authorization", "Bearer gcs-token"))),
            ])
            .respond_with(
                status_code(200)
                    .append_header("x-goog-meta-key", "d3JhcHBlZA==")
                    .body("encrypted-bytes"),
            ),
        );
        let client = bearer_client(&server);
        let downloaded = client.get("x.csv.gz", &CancellationToken::new()).await?;
        assert_eq!(downloaded.body.as_ref(), b"encrypted-bytes");
        assert_eq!(downloaded.wrapped_key.as_deref(), Some("d3JhcHBlZA=="));
        Ok(())
    }

    #[tokio::test]
    async fn unauthorized_bearer_classifies_as_renew() -> anyhow::Result<()> {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("GET", "/bucket/prefix/x.csv.gz"))
                .respond_with(status_code(401)),
        );
        let client = bearer_client(&server);
        let err = client
            .get("x.csv.gz", &CancellationToken::new())
            .await
            .expect_err("401 must fail");
        let stage = err.as_inner::<StageError>().expect("StageError");
        assert_eq!(stage.flow, StorageFlow::RenewToken);
        Ok(())
    }

    #[tokio::test]
    async fn head_of_missing_object_is_none() -> anyhow::Result<()> {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("HEAD", "/bucket/prefix/nope.csv"))
                .respond_with(status_code(404)),
        );
        let client = bearer_client(&server);
        assert_eq!(client.head("nope.csv", &CancellationToken::new()).await?, None);
        Ok(())
    }
}
