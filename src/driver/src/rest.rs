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

//! The session-aware REST client.
//!
//! Wraps the transport with everything a live session adds: the standard
//! headers, the `Authorization` token read atomically from the accessor,
//! the `X-Snowflake-Service` echo, and transparent renew-and-retry when
//! the server reports the session token expired. The `requestId` and
//! `request_guid` pair is generated once per logical call, so transport
//! retries reuse it byte for byte.

use crate::protocol::RestResponse;
use snowflake_auth::accessor::{TokenAccessor, renew_session};
use snowflake_auth::config::AuthConfig;
use snowflake_auth::login;
use snowflake_core::Result;
use snowflake_core::error::{Error, code};
use snowflake_core::http::Transport;
use snowflake_core::options::RequestOptions;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio_util::sync::CancellationToken;

/// A REST call target: method, path, and extra query parameters.
pub struct Call<'a> {
    pub method: http::Method,
    pub path: &'a str,
    pub query: Vec<(String, String)>,
    /// Overrides the generated request id (caller-bound ids).
    pub request_id: Option<uuid::Uuid>,
}

impl<'a> Call<'a> {
    pub fn post(path: &'a str) -> Self {
        Self {
            method: http::Method::POST,
            path,
            query: Vec::new(),
            request_id: None,
        }
    }

    pub fn get(path: &'a str) -> Self {
        Self {
            method: http::Method::GET,
            path,
            query: Vec::new(),
            request_id: None,
        }
    }

    pub fn with_query<K: Into<String>, V: Into<String>>(mut self, name: K, value: V) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    pub fn with_request_id(mut self, request_id: uuid::Uuid) -> Self {
        self.request_id = Some(request_id);
        self
    }
}

/// The session-aware REST client.
#[derive(Debug)]
pub struct RestClient {
    transport: Transport,
    auth_config: AuthConfig,
    accessor: Arc<TokenAccessor>,
    service_name: std::sync::RwLock<Option<String>>,
    closed: AtomicBool,
}

impl RestClient {
    pub fn new(transport: Transport, auth_config: AuthConfig, accessor: Arc<TokenAccessor>) -> Self {
        Self {
            transport,
            auth_config,
            accessor,
            service_name: std::sync::RwLock::new(None),
            closed: AtomicBool::new(false),
        }
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    pub fn accessor(&self) -> &Arc<TokenAccessor> {
        &self.accessor
    }

    pub fn auth_config(&self) -> &AuthConfig {
        &self.auth_config
    }

    /// Records the `SERVICE_NAME` the server asked the driver to echo.
    pub fn set_service_name(&self, service: Option<String>) {
        *self
            .service_name
            .write()
            .expect("service name lock is poisoned") = service;
    }

    pub fn service_name(&self) -> Option<String> {
        self.service_name
            .read()
            .expect("service name lock is poisoned")
            .clone()
    }

    /// Marks the session closed; later calls fail with a config error.
    pub fn mark_closed(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn url(&self, call: &Call<'_>, request_id: uuid::Uuid) -> Result<url::Url> {
        let mut url = url::Url::parse(&self.auth_config.base_url())
            .and_then(|u| u.join(call.path))
            .map_err(Error::config)?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("requestId", &request_id.to_string());
            pairs.append_pair("request_guid", &uuid::Uuid::new_v4().to_string());
            for (name, value) in &call.query {
                pairs.append_pair(name, value);
            }
        }
        Ok(url)
    }

    fn builder(
        &self,
        call: &Call<'_>,
        request_id: uuid::Uuid,
        body: Option<&serde_json::Value>,
    ) -> Result<reqwest::RequestBuilder> {
        let url = self.url(call, request_id)?;
        let mut builder = login::standard_headers(
            self.transport.client().request(call.method.clone(), url.to_string()),
        );
        let tokens = self.accessor.get();
        if !tokens.session_token.is_empty() {
            builder = builder.header(
                http::header::AUTHORIZATION,
                login::auth_header(&tokens.session_token),
            );
        }
        if let Some(service) = self.service_name() {
            builder = builder.header("X-Snowflake-Service", service);
        }
        if let Some(body) = body {
            builder = builder.json(body);
        }
        Ok(builder)
    }

    /// Executes a REST call, renewing the session token once when the
    /// server reports it expired.
    pub async fn call<T: serde::de::DeserializeOwned>(
        &self,
        call: Call<'_>,
        body: Option<serde_json::Value>,
        options: &RequestOptions,
        cancel: &CancellationToken,
    ) -> Result<RestResponse<T>> {
        if self.is_closed() {
            return Err(Error::config("the session is closed"));
        }
        let request_id = call.request_id.unwrap_or_else(uuid::Uuid::new_v4);
        let (_, generation) = self.accessor.snapshot();

        let builder = self.builder(&call, request_id, body.as_ref())?;
        let response: RestResponse<T> =
            self.transport.execute_json(builder, options, cancel).await?;
        if response.success || response.code != Some(code::SESSION_EXPIRED) {
            return Ok(response);
        }

        tracing::debug!(path = call.path, "session token expired, renewing");
        renew_session(
            &self.transport,
            &self.auth_config,
            &self.accessor,
            generation,
            cancel,
        )
        .await?;
        let builder = self.builder(&call, request_id, body.as_ref())?;
        self.transport.execute_json(builder, options, cancel).await
    }
}
