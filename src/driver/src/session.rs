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

//! Session lifecycle.
//!
//! [Session::connect] builds the transport, runs the configured
//! authenticator, stores the issued tokens, applies the server's session
//! parameters, and (when asked) spawns the keepalive task. Closing is
//! best-effort: the heartbeat stops first, the server-side session is
//! deleted on a fresh cancellation scope, and a session the server already
//! dropped counts as closed.

use crate::bind::BindValue;
use crate::config::Config;
use crate::decode::DecodeOptions;
use crate::heartbeat::{self, Heartbeat};
use crate::options::QueryOptions;
use crate::protocol::{QueryStatus, RestResponse, SESSION_PATH};
use crate::query::{self, ExecOutcome};
use crate::query_context::QueryContextCache;
use crate::rest::{Call, RestClient};
use crate::rows::{ExecSummary, ResultStream};
use snowflake_auth::accessor::{TokenAccessor, Tokens};
use snowflake_auth::authenticator;
use snowflake_auth::login::NameValue;
use snowflake_core::Result;
use snowflake_core::error::{Error, ServerError, code};
use snowflake_core::http::Transport;
use snowflake_core::options::RequestOptions;
use snowflake_core::retry_policy::{RetryPolicyExt as _, TransportRetryPolicy};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64};
use tokio_util::sync::CancellationToken;

pub(crate) struct SessionInner {
    pub(crate) config: Config,
    pub(crate) rest: Arc<RestClient>,
    pub(crate) params: std::sync::RwLock<HashMap<String, serde_json::Value>>,
    pub(crate) sequence: AtomicU64,
    pub(crate) qcc: QueryContextCache,
    pub(crate) cancel_root: CancellationToken,
    pub(crate) bind_stage_created: AtomicBool,
    server_version: String,
}

impl SessionInner {
    pub(crate) fn param_str(&self, name: &str) -> Option<String> {
        self.params
            .read()
            .expect("session parameter lock is poisoned")
            .get(name)
            .and_then(|v| v.as_str().map(String::from))
    }

    pub(crate) fn param_i64(&self, name: &str) -> Option<i64> {
        let params = self
            .params
            .read()
            .expect("session parameter lock is poisoned");
        let value = params.get(name)?;
        value
            .as_i64()
            .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
    }

    /// Merges server parameters into the session map; `SERVICE_NAME` also
    /// updates the header echo.
    pub(crate) fn apply_parameters(&self, parameters: &[NameValue]) {
        if parameters.is_empty() {
            return;
        }
        let mut params = self
            .params
            .write()
            .expect("session parameter lock is poisoned");
        for parameter in parameters {
            params.insert(parameter.name.clone(), parameter.value.clone());
        }
        drop(params);
        if let Some(service) = parameters
            .iter()
            .find(|p| p.name == "SERVICE_NAME")
            .and_then(|p| p.value.as_str())
        {
            self.rest.set_service_name(Some(service.to_string()));
        }
    }

    /// The session timezone: the server's TIMEZONE parameter, then the
    /// configured one, then UTC.
    pub(crate) fn timezone(&self) -> chrono_tz::Tz {
        self.param_str("TIMEZONE")
            .or_else(|| self.config.timezone.clone())
            .and_then(|name| name.parse().ok())
            .unwrap_or(chrono_tz::UTC)
    }

    pub(crate) fn decode_options(&self, options: &QueryOptions) -> DecodeOptions {
        DecodeOptions {
            higher_precision: options.higher_precision,
            raw_timestamps: options.raw_timestamps,
            utf8_validation: options.utf8_validation,
            timezone: self.timezone(),
        }
    }

    fn scope(&self, options: &QueryOptions) -> CancellationToken {
        options
            .cancel
            .clone()
            .unwrap_or_else(|| self.cancel_root.child_token())
    }
}

/// An open session.
pub struct Session {
    inner: Arc<SessionInner>,
    heartbeat: tokio::sync::Mutex<Option<Heartbeat>>,
}

impl Session {
    /// Opens a session: transport, login, parameters, keepalive.
    pub async fn connect(config: Config) -> Result<Self> {
        let config = config.finalize()?;
        let transport = Transport::builder()
            .with_accept_invalid_certs(config.insecure_mode)
            .with_retry_policy(
                TransportRetryPolicy
                    .with_attempt_limit(config.max_retry_count)
                    .with_time_limit(config.client_timeout),
            )
            .build()?;
        Self::connect_with_transport(config, transport).await
    }

    /// Opens a session over a caller-supplied transport.
    ///
    /// Sessions sharing one transport share its connection pool.
    pub async fn connect_with_transport(config: Config, transport: Transport) -> Result<Self> {
        let config = config.finalize()?;
        let auth_config = config.auth_config();
        let cancel_root = CancellationToken::new();
        let login = authenticator::authenticate(&transport, &auth_config, &cancel_root).await?;

        let accessor = Arc::new(TokenAccessor::new());
        accessor.set(Tokens {
            session_token: login.session_token,
            master_token: login.master_token,
            session_id: login.session_id,
        });
        let rest = Arc::new(RestClient::new(transport, auth_config, accessor));

        let disable_qcc = config.disable_query_context_cache;
        let inner = Arc::new(SessionInner {
            config,
            rest,
            params: std::sync::RwLock::new(HashMap::new()),
            sequence: AtomicU64::new(0),
            qcc: QueryContextCache::new(disable_qcc),
            cancel_root,
            bind_stage_created: AtomicBool::new(false),
            server_version: login.server_version,
        });
        inner.apply_parameters(&login.parameters);

        let session = Self {
            heartbeat: tokio::sync::Mutex::new(None),
            inner,
        };
        if session.inner.config.client_session_keep_alive {
            session.start_heartbeat().await;
        }
        tracing::debug!(
            session_id = session.inner.rest.accessor().get().session_id,
            server_version = %session.inner.server_version,
            "session open"
        );
        Ok(session)
    }

    async fn start_heartbeat(&self) {
        let frequency = self
            .inner
            .param_i64("CLIENT_SESSION_KEEP_ALIVE_HEARTBEAT_FREQUENCY")
            .map(|secs| std::time::Duration::from_secs(secs.max(0) as u64));
        let interval = heartbeat::clamp_interval(frequency);
        let mut slot = self.heartbeat.lock().await;
        if slot.is_none() {
            *slot = Some(Heartbeat::start(self.inner.rest.clone(), interval));
        }
    }

    /// The server version reported at login.
    pub fn server_version(&self) -> &str {
        &self.inner.server_version
    }

    pub fn session_id(&self) -> i64 {
        self.inner.rest.accessor().get().session_id
    }

    /// A session parameter as the server last reported it.
    pub fn parameter(&self, name: &str) -> Option<serde_json::Value> {
        self.inner
            .params
            .read()
            .expect("session parameter lock is poisoned")
            .get(name)
            .cloned()
    }

    /// Submits a statement and streams its rows.
    pub async fn query(&self, sql: &str, options: &QueryOptions) -> Result<ResultStream> {
        self.query_with(sql, &[], options).await
    }

    /// Submits a statement with bound parameters and streams its rows.
    pub async fn query_with(
        &self,
        sql: &str,
        params: &[BindValue],
        options: &QueryOptions,
    ) -> Result<ResultStream> {
        let cancel = self.inner.scope(options);
        match query::execute(&self.inner, sql, params, options, &cancel).await? {
            ExecOutcome::Data(data) => {
                ResultStream::from_data(self.inner.clone(), data, options.clone(), cancel)
            }
            ExecOutcome::AsyncPending { query_id } => Ok(ResultStream::from_async(
                self.inner.clone(),
                query_id,
                options.clone(),
                cancel,
            )),
            ExecOutcome::Transfer(results) => Ok(ResultStream::from_transfer(
                self.inner.clone(),
                results,
                options.clone(),
                cancel,
            )),
        }
    }

    /// Executes a statement and reports affected rows.
    pub async fn exec(
        &self,
        sql: &str,
        params: &[BindValue],
        options: &QueryOptions,
    ) -> Result<ExecSummary> {
        let cancel = self.inner.scope(options);
        match query::execute(&self.inner, sql, params, options, &cancel).await? {
            ExecOutcome::Data(data) => {
                let mut stream = ResultStream::from_data(
                    self.inner.clone(),
                    data.clone(),
                    options.clone(),
                    cancel,
                )?;
                let rows_affected = stream.drain_affected(&data).await?;
                Ok(ExecSummary {
                    query_id: data.query_id,
                    rows_affected,
                })
            }
            ExecOutcome::AsyncPending { query_id } => {
                if options.async_no_fetch {
                    return Ok(ExecSummary {
                        query_id: Some(query_id),
                        rows_affected: 0,
                    });
                }
                let data =
                    query::fetch_result(&self.inner, &query_id, options, &cancel).await?;
                let mut stream = ResultStream::from_data(
                    self.inner.clone(),
                    data.clone(),
                    options.clone(),
                    cancel,
                )?;
                let rows_affected = stream.drain_affected(&data).await?;
                Ok(ExecSummary {
                    query_id: Some(query_id),
                    rows_affected,
                })
            }
            ExecOutcome::Transfer(results) => Ok(ExecSummary {
                query_id: None,
                rows_affected: results.len() as i64,
            }),
        }
    }

    /// Fetches the result of a prior query by its id.
    pub async fn fetch_result_by_id(
        &self,
        query_id: &str,
        options: &QueryOptions,
    ) -> Result<ResultStream> {
        let options = options.clone().with_fetch_result_by_id(query_id);
        self.query("", &options).await
    }

    /// Best-effort abort of a running statement.
    pub async fn cancel_query(&self, query_id: &str) -> Result<()> {
        // Cancelling a query must work even when the query's own scope
        // already fired, so the abort uses a fresh one.
        query::cancel_query(&self.inner, query_id, &CancellationToken::new()).await
    }

    /// The status of a statement, from the monitoring endpoint.
    pub async fn query_status(&self, query_id: &str) -> Result<QueryStatus> {
        query::query_status(&self.inner, query_id, &self.inner.cancel_root.child_token()).await
    }

    /// Closes the session.
    ///
    /// The keepalive task stops first; the server-side delete runs on a
    /// fresh cancellation scope so a cancelled query scope cannot leak
    /// into teardown. `ErrSessionGone` counts as success.
    pub async fn close(self) -> Result<()> {
        if let Some(heartbeat) = self.heartbeat.lock().await.take() {
            heartbeat.stop().await;
        }

        let close_scope = CancellationToken::new();
        let result: Result<RestResponse<serde_json::Value>> = self
            .inner
            .rest
            .call(
                Call {
                    method: http::Method::DELETE,
                    path: SESSION_PATH,
                    query: vec![("delete".to_string(), "true".to_string())],
                    request_id: None,
                },
                None,
                &RequestOptions::default(),
                &close_scope,
            )
            .await;
        self.inner.rest.mark_closed();
        self.inner.rest.accessor().clear();
        self.inner.cancel_root.cancel();

        match result {
            Ok(response) if response.success => Ok(()),
            Ok(response) if response.code == Some(code::SESSION_GONE) => Ok(()),
            Ok(response) => Err(Error::server(ServerError::new(
                response.code.unwrap_or_default(),
                "".to_string(),
                response
                    .message
                    .unwrap_or_else(|| "session close failed".to_string()),
            ))),
            Err(e) => Err(e),
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("session_id", &self.session_id())
            .field("closed", &self.inner.rest.is_closed())
            .finish()
    }
}
