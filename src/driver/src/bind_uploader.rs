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

//! Bulk-bind staging.
//!
//! Above the server's array-binding threshold, bound arrays serialize to
//! CSV and upload to a session-scoped temporary stage; the execute request
//! then references the stage path in `bindStage` instead of carrying the
//! data inline. Large arrays split across multiple files so uploads
//! parallelize. The stage lives at most as long as the session.

use crate::bind::BindValue;
use crate::options::QueryOptions;
use crate::session::SessionInner;
use snowflake_core::Result;
use snowflake_core::error::Error;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use tokio_util::sync::CancellationToken;

/// The session stage all bulk binds upload into.
pub const BIND_STAGE_NAME: &str = "SYSTEM$BIND";

/// Rows per staged file; splitting keeps single uploads bounded.
const ROWS_PER_FILE: usize = 100_000;

const CREATE_STAGE_SQL: &str = "CREATE TEMPORARY STAGE IF NOT EXISTS SYSTEM$BIND \
     file_format=(type=csv field_optionally_enclosed_by='\"')";

/// Serializes one row of column values as a CSV line.
fn csv_line(row: &[Option<String>]) -> String {
    let mut line = String::new();
    for (index, cell) in row.iter().enumerate() {
        if index > 0 {
            line.push(',');
        }
        match cell {
            // NULL is an unquoted empty field.
            None => {}
            Some(text) => {
                if text.contains(['"', ',', '\n', '\r']) {
                    line.push('"');
                    line.push_str(&text.replace('"', "\"\""));
                    line.push('"');
                } else {
                    line.push_str(text);
                }
            }
        }
    }
    line.push('\n');
    line
}

/// Transposes bound columns into encoded CSV rows.
fn encode_rows(params: &[BindValue]) -> Result<Vec<String>> {
    let columns: Vec<&Vec<BindValue>> = params
        .iter()
        .map(|p| match p {
            BindValue::Array(values) => Ok(values),
            other => Err(Error::other(format!(
                "stage binding requires array parameters, got {other:?}"
            ))),
        })
        .collect::<Result<_>>()?;
    let row_count = columns.first().map(|c| c.len()).unwrap_or(0);
    let mut rows = Vec::with_capacity(row_count);
    for row_index in 0..row_count {
        let mut row = Vec::with_capacity(columns.len());
        for column in &columns {
            row.push(column[row_index].encode()?);
        }
        rows.push(csv_line(&row));
    }
    Ok(rows)
}

/// Uploads the bound arrays and returns the `bindStage` path.
pub(crate) async fn upload_binds(
    inner: &Arc<SessionInner>,
    params: &[BindValue],
    options: &QueryOptions,
    cancel: &CancellationToken,
) -> Result<String> {
    let rows = encode_rows(params)?;

    if !inner.bind_stage_created.swap(true, Ordering::SeqCst) {
        let stage_options = QueryOptions {
            is_internal: true,
            cancel: Some(cancel.clone()),
            ..QueryOptions::default()
        };
        // Boxed: this re-enters the executor from inside a submission.
        let create = Box::pin(crate::query::execute(
            inner,
            CREATE_STAGE_SQL,
            &[],
            &stage_options,
            cancel,
        ));
        if let Err(e) = create.await {
            inner.bind_stage_created.store(false, Ordering::SeqCst);
            return Err(e);
        }
    }

    let path = uuid::Uuid::new_v4().to_string();
    for (file_number, batch) in rows.chunks(ROWS_PER_FILE).enumerate() {
        let body: String = batch.concat();
        let file_name = file_number.to_string();
        let put_sql = format!("PUT 'file:///tmp/placeholder/{file_name}' '@{BIND_STAGE_NAME}/{path}'");
        let put_options = QueryOptions {
            is_internal: true,
            file_stream: Some((file_name, bytes::Bytes::from(body))),
            cancel: Some(cancel.clone()),
            timeout: options.timeout,
            ..QueryOptions::default()
        };
        Box::pin(crate::query::execute(inner, &put_sql, &[], &put_options, cancel)).await?;
    }
    tracing::debug!(rows = rows.len(), stage = %path, "bulk binds staged");
    Ok(format!("{BIND_STAGE_NAME}/{path}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csv_escaping() {
        assert_eq!(csv_line(&[Some("a".to_string()), Some("b".to_string())]), "a,b\n");
        assert_eq!(csv_line(&[None, Some("b".to_string())]), ",b\n");
        assert_eq!(
            csv_line(&[Some("with \"quotes\"".to_string())]),
            "\"with \"\"quotes\"\"\"\n"
        );
        assert_eq!(
            csv_line(&[Some("comma,separated".to_string())]),
            "\"comma,separated\"\n"
        );
        assert_eq!(csv_line(&[Some("new\nline".to_string())]), "\"new\nline\"\n");
    }

    #[test]
    fn rows_transpose_columns() {
        let params = vec![
            BindValue::Array(vec![BindValue::Int(1), BindValue::Int(2)]),
            BindValue::Array(vec![
                BindValue::Str("a".to_string()),
                BindValue::Null,
            ]),
        ];
        let rows = encode_rows(&params).unwrap();
        assert_eq!(rows, vec!["1,a\n", "2,\n"]);
    }

    #[test]
    fn scalar_parameters_are_rejected() {
        let err = encode_rows(&[BindValue::Int(1)]).unwrap_err();
        assert!(format!("{err}").contains("array parameters"), "{err}");
    }
}
