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

//! The pooled HTTPS transport.
//!
//! All outbound I/O in the driver goes through [Transport]. It owns one
//! `reqwest::Client` (and therefore one connection pool), the default retry
//! and backoff policies, and the cancellation plumbing.
//!
//! Retried attempts reuse the request URL byte for byte. Snowflake request
//! identity lives in the `requestId` and `request_guid` query parameters,
//! so preserving the URL across attempts is what lets the server treat a
//! retried statement as the same logical call.

use crate::Result;
use crate::backoff_policy::BackoffPolicy;
use crate::error::{Error, HttpError};
use crate::exponential_backoff::ExponentialBackoff;
use crate::options::RequestOptions;
use crate::retry_policy::{RetryPolicy, RetryPolicyExt, TransportRetryPolicy};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// The default bound on retry attempts, overridable via `MaxRetryCount`.
pub const DEFAULT_MAX_RETRY_COUNT: u32 = 7;

/// Builds [Transport] instances.
#[derive(Default)]
pub struct TransportBuilder {
    client: Option<reqwest::Client>,
    connect_timeout: Option<Duration>,
    accept_invalid_certs: bool,
    retry_policy: Option<Arc<dyn RetryPolicy>>,
    backoff_policy: Option<Arc<dyn BackoffPolicy>>,
}

impl TransportBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a caller-supplied `reqwest::Client` instead of the pooled default.
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = Some(client);
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Disables certificate verification. Maps the driver's `insecureMode`
    /// configuration; only for test endpoints.
    pub fn with_accept_invalid_certs(mut self, enabled: bool) -> Self {
        self.accept_invalid_certs = enabled;
        self
    }

    pub fn with_retry_policy<V: Into<crate::retry_policy::RetryPolicyArg>>(mut self, v: V) -> Self {
        self.retry_policy = Some(v.into().into_inner());
        self
    }

    pub fn with_backoff_policy<V: Into<crate::backoff_policy::BackoffPolicyArg>>(
        mut self,
        v: V,
    ) -> Self {
        self.backoff_policy = Some(v.into().into_inner());
        self
    }

    pub fn build(self) -> Result<Transport> {
        let inner = match self.client {
            Some(client) => client,
            None => {
                let mut builder = reqwest::Client::builder()
                    .danger_accept_invalid_certs(self.accept_invalid_certs);
                if let Some(timeout) = self.connect_timeout {
                    builder = builder.connect_timeout(timeout);
                }
                builder.build().map_err(Error::transport)?
            }
        };
        Ok(Transport {
            inner,
            retry_policy: self.retry_policy.unwrap_or_else(|| {
                Arc::new(
                    TransportRetryPolicy
                        .with_attempt_limit(DEFAULT_MAX_RETRY_COUNT)
                        .with_time_limit(Duration::from_secs(300)),
                )
            }),
            backoff_policy: self
                .backoff_policy
                .unwrap_or_else(|| Arc::new(ExponentialBackoff::default())),
        })
    }
}

/// A pooled HTTPS client with classified retries.
#[derive(Clone)]
pub struct Transport {
    inner: reqwest::Client,
    retry_policy: Arc<dyn RetryPolicy>,
    backoff_policy: Arc<dyn BackoffPolicy>,
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport").finish()
    }
}

impl Transport {
    pub fn builder() -> TransportBuilder {
        TransportBuilder::new()
    }

    /// The underlying client, for callers that assemble their own requests.
    pub fn client(&self) -> &reqwest::Client {
        &self.inner
    }

    /// Executes `builder` under the retry policy and decodes the body as
    /// JSON.
    pub async fn execute_json<O: serde::de::DeserializeOwned>(
        &self,
        builder: reqwest::RequestBuilder,
        options: &RequestOptions,
        cancel: &CancellationToken,
    ) -> Result<O> {
        let response = self.execute_bytes(builder, options, cancel).await?;
        serde_json::from_slice::<O>(&response.body).map_err(Error::ser)
    }

    /// Executes `builder` under the retry policy and returns the raw body.
    pub async fn execute_bytes(
        &self,
        builder: reqwest::RequestBuilder,
        options: &RequestOptions,
        cancel: &CancellationToken,
    ) -> Result<RawResponse> {
        let retry = options
            .retry_policy()
            .cloned()
            .unwrap_or_else(|| self.retry_policy.clone());
        let backoff = options
            .backoff_policy()
            .cloned()
            .unwrap_or_else(|| self.backoff_policy.clone());
        let attempt_timeout = options.attempt_timeout().copied();

        let inner = async move |remaining: Option<Duration>| {
            let builder = builder
                .try_clone()
                .expect("driver requests always have cloneable bodies");
            let timeout = crate::retry_loop::effective_timeout(attempt_timeout, remaining);
            let response = self.attempt(builder, timeout, cancel).await?;
            Self::require_success(response).await
        };
        let sleep = async |d| tokio::time::sleep(d).await;
        let on_retry = |attempt: u32, error: &Error, delay: Duration| {
            tracing::debug!(attempt, %error, ?delay, "retrying request");
        };
        crate::retry_loop::retry_loop_with_callback(inner, sleep, retry, backoff, on_retry).await
    }

    /// Sends one attempt and returns the response regardless of status.
    ///
    /// Network-level failures map to [ErrorKind::Transport]. Callers that
    /// classify storage responses themselves (the file-transfer agent, the
    /// chunk downloader) use this directly and keep their own retry loops.
    ///
    /// [ErrorKind::Transport]: crate::error::ErrorKind::Transport
    pub async fn attempt(
        &self,
        mut builder: reqwest::RequestBuilder,
        timeout: Option<Duration>,
        cancel: &CancellationToken,
    ) -> Result<reqwest::Response> {
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let request = builder.build().map_err(Error::transport)?;
        tokio::select! {
            _ = cancel.cancelled() => Err(Error::cancelled()),
            result = self.inner.execute(request) => result.map_err(map_send_error),
        }
    }

    async fn require_success(response: reqwest::Response) -> Result<RawResponse> {
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await.map_err(map_send_error)?;
        if !status.is_success() {
            return Err(Error::transport(HttpError::new(status.as_u16(), Some(body))));
        }
        Ok(RawResponse { headers, body })
    }
}

/// A successful transport response: headers plus the full body.
#[derive(Debug)]
pub struct RawResponse {
    pub headers: http::HeaderMap,
    pub body: bytes::Bytes,
}

pub(crate) fn map_send_error(e: reqwest::Error) -> Error {
    if e.is_timeout() || e.is_connect() || e.is_request() || e.is_body() || e.is_decode() {
        return Error::transport(e);
    }
    Error::other(e)
}

#[cfg(test)]
mod tests {
    use super::*;
    use httptest::{Expectation, Server, matchers::*, responders::*};
    use serde_json::json;

    fn test_transport() -> Transport {
        Transport::builder()
            .with_retry_policy(TransportRetryPolicy.with_attempt_limit(3))
            .with_backoff_policy(
                crate::exponential_backoff::ExponentialBackoffBuilder::new()
                    .with_initial_delay(Duration::from_millis(1))
                    .with_maximum_delay(Duration::from_millis(2))
                    .clamp(),
            )
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn execute_json_decodes_body() -> anyhow::Result<()> {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("GET", "/ping"))
                .respond_with(json_encoded(json!({"success": true}))),
        );
        let transport = test_transport();
        let builder = transport.client().get(server.url("/ping").to_string());
        let got: serde_json::Value = transport
            .execute_json(builder, &RequestOptions::default(), &CancellationToken::new())
            .await?;
        assert_eq!(got, json!({"success": true}));
        Ok(())
    }

    #[tokio::test]
    async fn execute_retries_server_errors() -> anyhow::Result<()> {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("GET", "/flaky"))
                .times(2)
                .respond_with(cycle![
                    status_code(503),
                    json_encoded(json!({"ok": true})),
                ]),
        );
        let transport = test_transport();
        let builder = transport.client().get(server.url("/flaky").to_string());
        let got: serde_json::Value = transport
            .execute_json(builder, &RequestOptions::default(), &CancellationToken::new())
            .await?;
        assert_eq!(got, json!({"ok": true}));
        Ok(())
    }

    #[tokio::test]
    async fn execute_does_not_retry_client_errors() -> anyhow::Result<()> {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("GET", "/nope"))
                .times(1)
                .respond_with(status_code(404)),
        );
        let transport = test_transport();
        let builder = transport.client().get(server.url("/nope").to_string());
        let got = transport
            .execute_bytes(builder, &RequestOptions::default(), &CancellationToken::new())
            .await;
        let err = got.expect_err("404 must not be retried");
        let http = err.as_inner::<HttpError>().expect("inner HttpError");
        assert_eq!(http.status_code(), 404);
        Ok(())
    }

    #[tokio::test]
    async fn cancelled_before_send() -> anyhow::Result<()> {
        let server = Server::run();
        let transport = test_transport();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let builder = transport.client().get(server.url("/never").to_string());
        let got = transport
            .execute_bytes(builder, &RequestOptions::default(), &cancel)
            .await;
        assert!(got.err().is_some_and(|e| e.is_cancelled()));
        Ok(())
    }
}
