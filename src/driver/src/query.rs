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

//! Query execution.
//!
//! A statement posts to `/queries/v1/query-request` with a per-session
//! monotonic `sequenceId` and a stable `requestId`. Long statements answer
//! with an in-progress code and a polling URL the driver follows until the
//! result is ready; async statements return immediately and are polled on
//! first row pull. PUT/GET statements answer with a transfer plan and
//! branch into the file-transfer agent.

use crate::bind::{self, BindValue};
use crate::options::QueryOptions;
use crate::protocol::{
    self, ExecRequest, ExecResponseData, MonitoringData, QueryStatus, RestResponse,
};
use crate::rest::Call;
use crate::session::SessionInner;
use snowflake_core::Result;
use snowflake_core::error::{Error, ServerError, code};
use snowflake_core::options::RequestOptions;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// How async result polling backs off: bounded growth, never more than
/// [POLL_MAX].
const POLL_INITIAL: Duration = Duration::from_millis(200);
const POLL_MAX: Duration = Duration::from_secs(5);

/// The outcome of submitting a statement.
pub(crate) enum ExecOutcome {
    /// A complete (or describe-only) result.
    Data(ExecResponseData),
    /// An async submission; the result is fetched on first pull.
    AsyncPending { query_id: String },
    /// A PUT/GET that ran through the transfer agent.
    Transfer(Vec<snowflake_transfer::metadata::TransferResult>),
}

pub(crate) fn request_options(inner: &SessionInner, options: &QueryOptions) -> RequestOptions {
    let timeout = options
        .timeout
        .or_else(|| inner.config.effective_request_timeout());
    let mut request_options = RequestOptions::new();
    if let Some(timeout) = timeout {
        request_options.set_attempt_timeout(timeout);
    }
    request_options
}

/// Maps a failed query envelope to a server error, keeping the query id
/// the server assigned.
fn query_error(envelope: &RestResponse<serde_json::Value>) -> Error {
    let data = envelope.data.as_ref();
    let query_id = data
        .and_then(|d| d.get("queryId"))
        .and_then(|v| v.as_str())
        .map(String::from);
    let sql_state = data
        .and_then(|d| d.get("sqlState"))
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();
    let server = ServerError::new(
        envelope.code.unwrap_or_default(),
        sql_state,
        envelope
            .message
            .clone()
            .unwrap_or_else(|| "the statement failed".to_string()),
    )
    .with_query_id(query_id);
    Error::server(server)
}

fn in_progress(envelope: &RestResponse<serde_json::Value>) -> bool {
    matches!(
        envelope.code,
        Some(code::QUERY_IN_PROGRESS) | Some(code::QUERY_IN_PROGRESS_ASYNC)
    )
}

async fn prepare_bindings(
    inner: &Arc<SessionInner>,
    params: &[BindValue],
    options: &QueryOptions,
    cancel: &CancellationToken,
) -> Result<(Option<HashMap<String, bind::Binding>>, Option<String>)> {
    if params.is_empty() {
        return Ok((None, None));
    }
    let threshold = inner
        .param_i64("CLIENT_STAGE_ARRAY_BINDING_THRESHOLD")
        .unwrap_or(65280) as usize;
    if bind::is_bulk(params) && bind::array_element_count(params) > threshold {
        let stage = crate::bind_uploader::upload_binds(inner, params, options, cancel).await?;
        return Ok((None, Some(stage)));
    }
    Ok((Some(bind::bindings_for(params)?), None))
}

/// Submits a statement and drives it to an outcome.
pub(crate) async fn execute(
    inner: &Arc<SessionInner>,
    sql: &str,
    params: &[BindValue],
    options: &QueryOptions,
    cancel: &CancellationToken,
) -> Result<ExecOutcome> {
    // Fetch-by-id wins over submission when both are present; the caller's
    // request id still applies to the fetch call.
    if let Some(query_id) = options.fetch_result_by_id.clone() {
        let data = fetch_result(inner, &query_id, options, cancel).await?;
        return Ok(ExecOutcome::Data(data));
    }

    let sequence_id = inner.sequence.fetch_add(1, Ordering::SeqCst) + 1;
    let (bindings, bind_stage) = prepare_bindings(inner, params, options, cancel).await?;

    let mut parameters = HashMap::new();
    if let Some(count) = options.multi_statement_count {
        parameters.insert(
            "MULTI_STATEMENT_COUNT".to_string(),
            serde_json::Value::from(count),
        );
    }

    let request = ExecRequest {
        sql_text: sql.to_string(),
        async_exec: options.async_mode,
        sequence_id,
        is_internal: options.is_internal,
        describe_only: options.describe_only,
        parameters,
        bindings,
        bind_stage,
        query_context: inner.qcc.dto(),
    };
    let request_id = options.request_id.unwrap_or_else(uuid::Uuid::new_v4);
    let req_options = request_options(inner, options);

    tracing::debug!(sequence_id, request_id = %request_id, "submitting statement");
    let mut envelope: RestResponse<serde_json::Value> = inner
        .rest
        .call(
            Call::post(protocol::QUERY_REQUEST_PATH).with_request_id(request_id),
            Some(serde_json::to_value(&request).map_err(Error::ser)?),
            &req_options,
            cancel,
        )
        .await?;

    // Ping-pong: a statement that outlives the HTTP exchange answers with
    // an in-progress code and a URL to poll.
    while envelope.success && in_progress(&envelope) {
        let partial: ExecResponseData =
            serde_json::from_value(envelope.data.clone().unwrap_or_else(|| serde_json::json!({})))
                .map_err(Error::ser)?;
        if options.async_mode {
            let query_id = partial
                .query_id
                .ok_or_else(|| Error::decode("async response carried no query id"))?;
            options.notify_query_id(&query_id);
            return Ok(ExecOutcome::AsyncPending { query_id });
        }
        let url = partial
            .get_result_url
            .ok_or_else(|| Error::decode("in-progress response carried no result URL"))?;
        envelope = inner
            .rest
            .call(Call::get(&url), None, &req_options, cancel)
            .await?;
    }
    if !envelope.success {
        return Err(query_error(&envelope));
    }

    let value = envelope.data.take().unwrap_or_else(|| serde_json::json!({}));
    if value.get("command").is_some() {
        let plan: snowflake_transfer::plan::TransferPlan =
            serde_json::from_value(value).map_err(Error::ser)?;
        let rows = crate::put_get::run_plan(inner, sql, plan, options, cancel).await?;
        return Ok(ExecOutcome::Transfer(rows));
    }

    let data: ExecResponseData = serde_json::from_value(value).map_err(Error::ser)?;
    inner.apply_parameters(&data.parameters);
    inner.qcc.update(data.query_context.as_ref());
    if let Some(query_id) = &data.query_id {
        options.notify_query_id(query_id);
    }
    Ok(ExecOutcome::Data(data))
}

/// Fetches the result of a known query id, polling while it still runs.
pub(crate) async fn fetch_result(
    inner: &Arc<SessionInner>,
    query_id: &str,
    options: &QueryOptions,
    cancel: &CancellationToken,
) -> Result<ExecResponseData> {
    let req_options = request_options(inner, options);
    let path = protocol::result_path(query_id);
    let mut delay = POLL_INITIAL;
    loop {
        let mut call = Call::get(&path);
        if let Some(request_id) = options.request_id {
            call = call.with_request_id(request_id);
        }
        let mut envelope: RestResponse<serde_json::Value> =
            inner.rest.call(call, None, &req_options, cancel).await?;
        if envelope.success && in_progress(&envelope) {
            tokio::select! {
                _ = cancel.cancelled() => return Err(Error::cancelled()),
                _ = tokio::time::sleep(delay) => {}
            }
            delay = std::cmp::min(delay * 2, POLL_MAX);
            continue;
        }
        if !envelope.success {
            return Err(query_error(&envelope));
        }
        let data: ExecResponseData =
            serde_json::from_value(envelope.data.take().unwrap_or_else(|| serde_json::json!({})))
                .map_err(Error::ser)?;
        inner.apply_parameters(&data.parameters);
        inner.qcc.update(data.query_context.as_ref());
        return Ok(data);
    }
}

/// Best-effort abort of a running statement, on a fresh request id.
pub(crate) async fn cancel_query(
    inner: &Arc<SessionInner>,
    query_id: &str,
    cancel: &CancellationToken,
) -> Result<()> {
    let path = protocol::abort_path(query_id);
    let envelope: RestResponse<serde_json::Value> = inner
        .rest
        .call(
            Call::post(&path),
            Some(serde_json::json!({})),
            &RequestOptions::default(),
            cancel,
        )
        .await?;
    if !envelope.success {
        return Err(query_error(&envelope));
    }
    Ok(())
}

/// Reads the status of a statement from the monitoring endpoint.
pub(crate) async fn query_status(
    inner: &Arc<SessionInner>,
    query_id: &str,
    cancel: &CancellationToken,
) -> Result<QueryStatus> {
    let path = protocol::monitoring_path(query_id);
    let envelope: RestResponse<MonitoringData> = inner
        .rest
        .call(Call::get(&path), None, &RequestOptions::default(), cancel)
        .await?;
    if !envelope.success {
        return Err(Error::server(ServerError::new(
            envelope.code.unwrap_or_default(),
            "".to_string(),
            envelope
                .message
                .unwrap_or_else(|| "monitoring request failed".to_string()),
        )));
    }
    let status = envelope
        .data
        .and_then(|d| d.queries.into_iter().next())
        .map(|entry| QueryStatus::from_wire(&entry.status))
        .unwrap_or(QueryStatus::Unknown);
    Ok(status)
}

/// Sums affected-row counts out of a DML result.
///
/// Non-DML statements (BEGIN, COMMIT, DDL) have no affected-row columns
/// and contribute zero, which keeps multi-statement sums honest.
pub(crate) fn sum_affected(data: &ExecResponseData) -> i64 {
    let mut total = 0;
    for (index, column) in data.row_type.iter().enumerate() {
        let name = column.name.to_ascii_lowercase();
        if !(name.starts_with("number of rows") || name.starts_with("number of multi-joined rows"))
        {
            continue;
        }
        for row in &data.row_set {
            if let Some(cell) = row.get(index).and_then(|c| c.as_str()) {
                total += cell.parse::<i64>().unwrap_or(0);
            }
        }
    }
    total
}
