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

//! Result streaming.
//!
//! A [ResultStream] is a lazy, finite, non-restartable sequence of rows.
//! Rows come from the inline row set first, then from chunks the
//! downloader prefetches; order always follows the server's. Multi-statement
//! batches expose their children through [ResultStream::next_result_set].

use crate::chunks::{ChunkDownloader, ChunkSource, DecodedChunk};
use crate::decode::{self, DecodeOptions, Value};
use crate::options::QueryOptions;
use crate::protocol::{ExecResponseData, RowType};
use crate::session::SessionInner;
use base64::Engine as _;
use snowflake_core::Result;
use snowflake_core::error::Error;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// The summary of a DML execution.
#[derive(Clone, Debug, PartialEq)]
pub struct ExecSummary {
    pub query_id: Option<String>,
    pub rows_affected: i64,
}

enum Body {
    Rows {
        current: std::vec::IntoIter<Vec<Value>>,
        downloader: Option<ChunkDownloader>,
    },
    Batches {
        current: std::vec::IntoIter<arrow::array::RecordBatch>,
        downloader: Option<ChunkDownloader>,
    },
    /// Async submission not yet fetched.
    Pending,
    /// Async no-fetch: rows are never available.
    NoFetch,
}

/// A streaming result set.
pub struct ResultStream {
    inner: Arc<SessionInner>,
    options: QueryOptions,
    cancel: CancellationToken,
    row_type: Arc<Vec<RowType>>,
    decode_options: Arc<DecodeOptions>,
    query_id: Option<String>,
    total: i64,
    body: Body,
    children: VecDeque<String>,
}

impl ResultStream {
    pub(crate) fn from_data(
        inner: Arc<SessionInner>,
        data: ExecResponseData,
        options: QueryOptions,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let mut stream = Self {
            decode_options: Arc::new(inner.decode_options(&options)),
            inner,
            options,
            cancel,
            row_type: Arc::new(Vec::new()),
            query_id: None,
            total: 0,
            body: Body::Rows {
                current: Vec::new().into_iter(),
                downloader: None,
            },
            children: VecDeque::new(),
        };
        stream.populate(data)?;
        Ok(stream)
    }

    pub(crate) fn from_async(
        inner: Arc<SessionInner>,
        query_id: String,
        options: QueryOptions,
        cancel: CancellationToken,
    ) -> Self {
        let no_fetch = options.async_no_fetch;
        Self {
            decode_options: Arc::new(inner.decode_options(&options)),
            inner,
            options,
            cancel,
            row_type: Arc::new(Vec::new()),
            query_id: Some(query_id),
            total: 0,
            body: if no_fetch { Body::NoFetch } else { Body::Pending },
            children: VecDeque::new(),
        }
    }

    /// Builds the PUT/GET result rows, mirroring the server's output shape.
    pub(crate) fn from_transfer(
        inner: Arc<SessionInner>,
        results: Vec<snowflake_transfer::metadata::TransferResult>,
        options: QueryOptions,
        cancel: CancellationToken,
    ) -> Self {
        let text = |name: &str| RowType {
            name: name.to_string(),
            type_name: "text".to_string(),
            ..RowType::default()
        };
        let fixed = |name: &str| RowType {
            name: name.to_string(),
            type_name: "fixed".to_string(),
            ..RowType::default()
        };
        let row_type = vec![
            text("source"),
            text("target"),
            fixed("source_size"),
            fixed("target_size"),
            text("source_compression"),
            text("target_compression"),
            text("status"),
            text("message"),
        ];
        let total = results.len() as i64;
        let rows: Vec<Vec<Value>> = results
            .into_iter()
            .map(|r| {
                vec![
                    Value::Str(r.source),
                    Value::Str(r.target),
                    Value::Int(r.source_size as i64),
                    Value::Int(r.target_size as i64),
                    Value::Str(r.source_compression),
                    Value::Str(r.target_compression),
                    Value::Str(r.status.to_string()),
                    Value::Str(r.message),
                ]
            })
            .collect();
        Self {
            decode_options: Arc::new(inner.decode_options(&options)),
            inner,
            options,
            cancel,
            row_type: Arc::new(row_type),
            query_id: None,
            total,
            body: Body::Rows {
                current: rows.into_iter(),
                downloader: None,
            },
            children: VecDeque::new(),
        }
    }

    /// The column descriptors; present even for describe-only results.
    pub fn row_types(&self) -> &[RowType] {
        &self.row_type
    }

    pub fn query_id(&self) -> Option<&str> {
        self.query_id.as_deref()
    }

    /// The total row count the server reported.
    pub fn total_rows(&self) -> i64 {
        self.total
    }

    fn chunk_source(&self, format: &str) -> ChunkSource {
        ChunkSource {
            transport: self.inner.rest.transport().clone(),
            chunk_headers: Default::default(),
            qrmk: None,
            row_type: self.row_type.clone(),
            options: self.decode_options.clone(),
            format: format.to_string(),
            arrow_batches: self.options.arrow_batches,
        }
    }

    fn populate(&mut self, data: ExecResponseData) -> Result<()> {
        self.row_type = Arc::new(data.row_type);
        self.query_id = data.query_id;
        self.total = data.total;
        self.children = data.child_ids().into();
        if !self.children.is_empty() {
            // The parent of a multi-statement batch carries no rows itself;
            // advance into the first child.
            self.body = Body::Rows {
                current: Vec::new().into_iter(),
                downloader: None,
            };
            return Ok(());
        }

        let format = data.query_result_format.as_deref().unwrap_or("json");
        let mut source = self.chunk_source(format);
        source.chunk_headers = data.chunk_headers;
        source.qrmk = data.qrmk;
        let downloader = if data.chunks.is_empty() {
            None
        } else {
            Some(ChunkDownloader::start(data.chunks, source, &self.cancel))
        };

        if format == "arrow" {
            let batches = match data.row_set_base64.as_deref() {
                Some(encoded) if !encoded.is_empty() => {
                    let body = base64::engine::general_purpose::STANDARD
                        .decode(encoded)
                        .map_err(Error::decode)?;
                    decode::arrow::read_batches(&body)?
                }
                _ => Vec::new(),
            };
            if self.options.arrow_batches {
                self.body = Body::Batches {
                    current: batches.into_iter(),
                    downloader,
                };
            } else {
                let mut rows = Vec::new();
                for batch in &batches {
                    rows.extend(decode::arrow::decode_batch(
                        batch,
                        &self.row_type,
                        &self.decode_options,
                    )?);
                }
                self.body = Body::Rows {
                    current: rows.into_iter(),
                    downloader,
                };
            }
            return Ok(());
        }

        let mut rows = Vec::with_capacity(data.row_set.len());
        for row in &data.row_set {
            rows.push(
                row.iter()
                    .zip(self.row_type.iter())
                    .map(|(cell, column)| {
                        decode::json::decode_cell(cell, column, &self.decode_options)
                    })
                    .collect::<Result<Vec<_>>>()?,
            );
        }
        self.body = Body::Rows {
            current: rows.into_iter(),
            downloader,
        };
        Ok(())
    }

    async fn resolve_pending(&mut self) -> Result<()> {
        let Some(query_id) = self.query_id.clone() else {
            return Err(Error::decode("pending result carries no query id"));
        };
        let data =
            crate::query::fetch_result(&self.inner, &query_id, &self.options, &self.cancel)
                .await?;
        self.populate(data)
    }

    /// The next row, or `None` at the end of the result.
    pub async fn next(&mut self) -> Result<Option<Vec<Value>>> {
        loop {
            match &mut self.body {
                Body::NoFetch => {
                    return Err(Error::other(
                        "this result was submitted in async no-fetch mode and has no rows",
                    ));
                }
                Body::Pending => {
                    self.resolve_pending().await?;
                }
                Body::Batches { .. } => {
                    return Err(Error::other(
                        "this result yields Arrow batches; use next_batch()",
                    ));
                }
                Body::Rows {
                    current,
                    downloader,
                } => {
                    if let Some(row) = current.next() {
                        return Ok(Some(row));
                    }
                    let Some(active) = downloader else {
                        return Ok(None);
                    };
                    match active.next_chunk().await {
                        None => {
                            *downloader = None;
                            return Ok(None);
                        }
                        Some(Err(e)) => return Err(e),
                        Some(Ok(DecodedChunk::Rows(rows))) => {
                            *current = rows.into_iter();
                        }
                        Some(Ok(DecodedChunk::Batches(_))) => {
                            return Err(Error::decode(
                                "row stream received an Arrow batch chunk",
                            ));
                        }
                    }
                }
            }
        }
    }

    /// The next raw Arrow record batch, in `arrowBatches` mode.
    pub async fn next_batch(&mut self) -> Result<Option<arrow::array::RecordBatch>> {
        loop {
            match &mut self.body {
                Body::NoFetch => {
                    return Err(Error::other(
                        "this result was submitted in async no-fetch mode and has no rows",
                    ));
                }
                Body::Pending => {
                    self.resolve_pending().await?;
                }
                Body::Rows { .. } => {
                    return Err(Error::other(
                        "this result yields rows; use next()",
                    ));
                }
                Body::Batches {
                    current,
                    downloader,
                } => {
                    if let Some(batch) = current.next() {
                        return Ok(Some(batch));
                    }
                    let Some(active) = downloader else {
                        return Ok(None);
                    };
                    match active.next_chunk().await {
                        None => {
                            *downloader = None;
                            return Ok(None);
                        }
                        Some(Err(e)) => return Err(e),
                        Some(Ok(DecodedChunk::Batches(batches))) => {
                            *current = batches.into_iter();
                        }
                        Some(Ok(DecodedChunk::Rows(_))) => {
                            return Err(Error::decode(
                                "batch stream received a decoded row chunk",
                            ));
                        }
                    }
                }
            }
        }
    }

    /// Advances to the next child of a multi-statement batch.
    ///
    /// Returns `false` when no further result set exists.
    pub async fn next_result_set(&mut self) -> Result<bool> {
        let Some(child) = self.children.pop_front() else {
            return Ok(false);
        };
        let remaining = std::mem::take(&mut self.children);
        let data =
            crate::query::fetch_result(&self.inner, &child, &self.options, &self.cancel).await?;
        self.populate(data)?;
        // populate() resets the child list from the fetched result; a child
        // has no children of its own, so restore the siblings.
        self.children = remaining;
        Ok(true)
    }

    /// Sums affected rows across this result and all remaining children.
    pub(crate) async fn drain_affected(&mut self, first: &ExecResponseData) -> Result<i64> {
        // A multi-statement parent carries a status row, not counts; only
        // its children contribute.
        let mut total = if self.children.is_empty() {
            crate::query::sum_affected(first)
        } else {
            0
        };
        while let Some(child) = self.children.pop_front() {
            let data =
                crate::query::fetch_result(&self.inner, &child, &self.options, &self.cancel)
                    .await?;
            total += crate::query::sum_affected(&data);
        }
        Ok(total)
    }
}

impl std::fmt::Debug for ResultStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultStream")
            .field("query_id", &self.query_id)
            .field("columns", &self.row_type.len())
            .field("total", &self.total)
            .finish()
    }
}
