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

//! The REST wire types for query execution.
//!
//! Field names follow the wire protocol; note the historical lowercase
//! `rowtype`/`rowset` spellings in the response.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const QUERY_REQUEST_PATH: &str = "/queries/v1/query-request";
pub const SESSION_PATH: &str = "/session";
pub const HEARTBEAT_PATH: &str = "/session/heartbeat";

pub fn abort_path(query_id: &str) -> String {
    format!("/queries/{query_id}/abort-request")
}

pub fn result_path(query_id: &str) -> String {
    format!("/queries/{query_id}/result")
}

pub fn monitoring_path(query_id: &str) -> String {
    format!("/monitoring/queries/{query_id}")
}

/// The response envelope shared with the session endpoints.
pub type RestResponse<T> = snowflake_auth::login::AuthResponse<T>;

/// A statement submission.
#[derive(Clone, Debug, Serialize)]
pub struct ExecRequest {
    #[serde(rename = "sqlText")]
    pub sql_text: String,
    #[serde(rename = "asyncExec")]
    pub async_exec: bool,
    #[serde(rename = "sequenceId")]
    pub sequence_id: u64,
    #[serde(rename = "isInternal")]
    pub is_internal: bool,
    #[serde(rename = "describeOnly", skip_serializing_if = "std::ops::Not::not")]
    pub describe_only: bool,
    #[serde(rename = "parameters", skip_serializing_if = "HashMap::is_empty")]
    pub parameters: HashMap<String, serde_json::Value>,
    #[serde(rename = "bindings", skip_serializing_if = "Option::is_none")]
    pub bindings: Option<HashMap<String, crate::bind::Binding>>,
    #[serde(rename = "bindStage", skip_serializing_if = "Option::is_none")]
    pub bind_stage: Option<String>,
    #[serde(rename = "queryContextDTO", skip_serializing_if = "Option::is_none")]
    pub query_context: Option<serde_json::Value>,
}

/// One column descriptor.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RowType {
    pub name: String,
    #[serde(default)]
    pub database: String,
    #[serde(default)]
    pub schema: String,
    #[serde(default)]
    pub table: String,
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default)]
    pub scale: Option<i64>,
    #[serde(default)]
    pub precision: Option<i64>,
    #[serde(default)]
    pub length: Option<i64>,
    #[serde(default)]
    pub nullable: bool,
    /// Subfield descriptors for structured OBJECT/ARRAY/MAP columns.
    #[serde(default)]
    pub fields: Option<serde_json::Value>,
}

/// One result chunk hosted at a signed storage URL.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChunkDescriptor {
    pub url: String,
    pub row_count: usize,
    #[serde(default)]
    pub uncompressed_size: u64,
    #[serde(default)]
    pub compressed_size: u64,
}

/// The `data` object of a query response.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecResponseData {
    #[serde(default)]
    pub query_id: Option<String>,
    #[serde(default)]
    pub sql_state: Option<String>,
    #[serde(default, rename = "rowtype")]
    pub row_type: Vec<RowType>,
    #[serde(default, rename = "rowset")]
    pub row_set: Vec<Vec<serde_json::Value>>,
    #[serde(default, rename = "rowsetBase64")]
    pub row_set_base64: Option<String>,
    #[serde(default)]
    pub total: i64,
    #[serde(default)]
    pub returned: i64,
    #[serde(default)]
    pub query_result_format: Option<String>,
    #[serde(default)]
    pub chunks: Vec<ChunkDescriptor>,
    #[serde(default)]
    pub chunk_headers: HashMap<String, String>,
    #[serde(default)]
    pub qrmk: Option<String>,
    /// Polling target while the statement is still running.
    #[serde(default)]
    pub get_result_url: Option<String>,
    #[serde(default)]
    pub final_database_name: Option<String>,
    #[serde(default)]
    pub final_schema_name: Option<String>,
    #[serde(default)]
    pub final_warehouse_name: Option<String>,
    #[serde(default)]
    pub final_role_name: Option<String>,
    #[serde(default)]
    pub parameters: Vec<snowflake_auth::login::NameValue>,
    /// Child statement ids for a multi-statement batch, comma separated.
    #[serde(default)]
    pub result_ids: Option<String>,
    #[serde(default)]
    pub query_context: Option<serde_json::Value>,
}

impl ExecResponseData {
    /// Child query ids of a multi-statement batch, in execution order.
    pub fn child_ids(&self) -> Vec<String> {
        self.result_ids
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .filter(|id| !id.is_empty())
            .map(String::from)
            .collect()
    }
}

/// The terminal and transient states reported by the monitoring endpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueryStatus {
    Running,
    Queued,
    Blocked,
    Success,
    FailedWithError,
    Aborted,
    Unknown,
}

impl QueryStatus {
    pub fn from_wire(status: &str) -> Self {
        match status.to_ascii_uppercase().as_str() {
            "RUNNING" | "RESUMING_WAREHOUSE" => QueryStatus::Running,
            "QUEUED" | "QUEUED_REPAIRING_WAREHOUSE" => QueryStatus::Queued,
            "BLOCKED" => QueryStatus::Blocked,
            "SUCCESS" => QueryStatus::Success,
            "FAILED_WITH_ERROR" | "FAILED_WITH_INCIDENT" => QueryStatus::FailedWithError,
            "ABORTED" | "ABORTING" => QueryStatus::Aborted,
            _ => QueryStatus::Unknown,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            QueryStatus::Success | QueryStatus::FailedWithError | QueryStatus::Aborted
        )
    }
}

/// The monitoring endpoint's payload.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct MonitoringData {
    #[serde(default)]
    pub queries: Vec<MonitoringEntry>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitoringEntry {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub error_code: Option<serde_json::Value>,
    #[serde(default)]
    pub error_message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn exec_request_omits_empty_fields() {
        let request = ExecRequest {
            sql_text: "SELECT 1".to_string(),
            async_exec: false,
            sequence_id: 1,
            is_internal: false,
            describe_only: false,
            parameters: HashMap::new(),
            bindings: None,
            bind_stage: None,
            query_context: None,
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(
            value,
            json!({
                "sqlText": "SELECT 1",
                "asyncExec": false,
                "sequenceId": 1,
                "isInternal": false,
            })
        );
    }

    #[test]
    fn exec_response_parses_wire_shape() {
        let data: ExecResponseData = serde_json::from_value(json!({
            "queryId": "01b2-0001",
            "rowtype": [
                {"name": "C1", "type": "fixed", "scale": 0, "precision": 38, "nullable": false},
            ],
            "rowset": [["1"]],
            "queryResultFormat": "json",
            "chunks": [
                {"url": "https://stage/chunk0", "rowCount": 100, "uncompressedSize": 1024},
            ],
            "chunkHeaders": {"x-amz-server-side-encryption-customer-key": "qrmk"},
            "total": 101,
            "returned": 101,
        }))
        .unwrap();
        assert_eq!(data.query_id.as_deref(), Some("01b2-0001"));
        assert_eq!(data.row_type.len(), 1);
        assert_eq!(data.row_type[0].type_name, "fixed");
        assert_eq!(data.chunks[0].row_count, 100);
        assert_eq!(data.row_set, vec![vec![json!("1")]]);
    }

    #[test]
    fn child_ids_split() {
        let data = ExecResponseData {
            result_ids: Some("01a,01b,01c".to_string()),
            ..ExecResponseData::default()
        };
        assert_eq!(data.child_ids(), vec!["01a", "01b", "01c"]);
        assert!(ExecResponseData::default().child_ids().is_empty());
    }

    #[test]
    fn query_status_mapping() {
        assert_eq!(QueryStatus::from_wire("RUNNING"), QueryStatus::Running);
        assert_eq!(QueryStatus::from_wire("success"), QueryStatus::Success);
        assert!(QueryStatus::from_wire("ABORTED").is_terminal());
        assert!(!QueryStatus::from_wire("QUEUED").is_terminal());
        assert_eq!(QueryStatus::from_wire("???"), QueryStatus::Unknown);
    }
}
