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

//! PUT/GET integration.
//!
//! The server answers a PUT/GET statement with a transfer plan instead of
//! a result set; this module hands the plan to the transfer agent and
//! implements the agent's refresh seam by re-issuing the statement when
//! stage credentials expire mid-transfer.

use crate::options::QueryOptions;
use crate::protocol::{self, ExecRequest, RestResponse};
use crate::rest::Call;
use crate::session::SessionInner;
use snowflake_core::Result;
use snowflake_core::error::Error;
use snowflake_transfer::agent::{PlanRefresher, TransferAgent};
use snowflake_transfer::metadata::TransferResult;
use snowflake_transfer::plan::TransferPlan;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use tokio_util::sync::CancellationToken;

pub use snowflake_transfer::command::is_file_transfer;

/// Submits a PUT/GET statement and parses the plan out of the response.
async fn submit_plan(
    inner: &Arc<SessionInner>,
    sql: &str,
    options: &QueryOptions,
    cancel: &CancellationToken,
) -> Result<TransferPlan> {
    let sequence_id = inner.sequence.fetch_add(1, Ordering::SeqCst) + 1;
    let request = ExecRequest {
        sql_text: sql.to_string(),
        async_exec: false,
        sequence_id,
        is_internal: options.is_internal,
        describe_only: false,
        parameters: Default::default(),
        bindings: None,
        bind_stage: None,
        query_context: inner.qcc.dto(),
    };
    let req_options = crate::query::request_options(inner, options);
    let mut envelope: RestResponse<serde_json::Value> = inner
        .rest
        .call(
            Call::post(protocol::QUERY_REQUEST_PATH),
            Some(serde_json::to_value(&request).map_err(Error::ser)?),
            &req_options,
            cancel,
        )
        .await?;
    if !envelope.success {
        return Err(Error::server(snowflake_core::error::ServerError::new(
            envelope.code.unwrap_or_default(),
            "".to_string(),
            envelope
                .message
                .take()
                .unwrap_or_else(|| "the transfer statement failed".to_string()),
        )));
    }
    let value = envelope
        .data
        .take()
        .ok_or_else(|| Error::decode("transfer response carried no data"))?;
    serde_json::from_value(value).map_err(Error::ser)
}

/// Re-acquires stage credentials by re-issuing the PUT/GET statement.
struct StatementRefresher {
    inner: Arc<SessionInner>,
    sql: String,
    options: QueryOptions,
}

impl std::fmt::Debug for StatementRefresher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatementRefresher").finish()
    }
}

#[async_trait::async_trait]
impl PlanRefresher for StatementRefresher {
    async fn refresh(&self, cancel: &CancellationToken) -> Result<TransferPlan> {
        submit_plan(&self.inner, &self.sql, &self.options, cancel).await
    }
}

/// Runs a server-issued transfer plan to completion.
pub(crate) async fn run_plan(
    inner: &Arc<SessionInner>,
    sql: &str,
    plan: TransferPlan,
    options: &QueryOptions,
    cancel: &CancellationToken,
) -> Result<Vec<TransferResult>> {
    let refresher = Arc::new(StatementRefresher {
        inner: inner.clone(),
        sql: sql.to_string(),
        options: QueryOptions {
            // The refresh only needs the plan; never re-run the upload
            // source through it.
            file_stream: None,
            ..options.clone()
        },
    });
    let agent = TransferAgent::new(inner.rest.transport().clone())
        .with_refresher(refresher)
        .with_staging_dir(inner.config.tmp_dir_path.as_ref().map(PathBuf::from));
    agent
        .execute(plan, options.file_stream.clone(), cancel)
        .await
}
