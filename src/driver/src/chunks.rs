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

//! Bounded-parallel chunk download.
//!
//! Chunks download ahead of the consumer on a worker pool, at most
//! [MAX_CHUNK_DOWNLOAD_WORKERS] in flight. Completion order is arbitrary;
//! delivery order is not: the consumer pulls chunks strictly by index, and
//! a worker's permit is only released when its chunk is consumed, so a
//! slow reader pauses the prefetch instead of buffering without bound.

use crate::decode::{self, DecodeOptions, Value};
use crate::protocol::{ChunkDescriptor, RowType};
use snowflake_core::Result;
use snowflake_core::error::Error;
use snowflake_core::http::Transport;
use snowflake_core::options::RequestOptions;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::{Semaphore, mpsc};
use tokio_util::sync::CancellationToken;

/// The default bound on concurrent chunk downloads.
pub const MAX_CHUNK_DOWNLOAD_WORKERS: usize = 8;

/// One downloaded chunk, decoded per the query's result format.
#[derive(Debug)]
pub enum DecodedChunk {
    Rows(Vec<Vec<Value>>),
    Batches(Vec<arrow::array::RecordBatch>),
}

/// What the downloader needs to fetch and decode chunks.
#[derive(Clone)]
pub struct ChunkSource {
    pub transport: Transport,
    pub chunk_headers: HashMap<String, String>,
    pub qrmk: Option<String>,
    pub row_type: Arc<Vec<RowType>>,
    pub options: Arc<DecodeOptions>,
    /// `json` or `arrow`.
    pub format: String,
    /// Deliver raw record batches instead of decoded rows.
    pub arrow_batches: bool,
}

type ChunkMessage = (
    usize,
    Result<DecodedChunk>,
    tokio::sync::OwnedSemaphorePermit,
);

/// Downloads chunks ahead of the consumer, delivering them in order.
pub struct ChunkDownloader {
    rx: mpsc::UnboundedReceiver<ChunkMessage>,
    buffer: BTreeMap<usize, (Result<DecodedChunk>, tokio::sync::OwnedSemaphorePermit)>,
    next_index: usize,
    total: usize,
}

impl ChunkDownloader {
    /// Starts the prefetch pool over `chunks`.
    pub fn start(
        chunks: Vec<ChunkDescriptor>,
        source: ChunkSource,
        cancel: &CancellationToken,
    ) -> Self {
        let total = chunks.len();
        let (tx, rx) = mpsc::unbounded_channel();
        let semaphore = Arc::new(Semaphore::new(MAX_CHUNK_DOWNLOAD_WORKERS));
        for (index, chunk) in chunks.into_iter().enumerate() {
            let tx = tx.clone();
            let semaphore = semaphore.clone();
            let source = source.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                let Ok(permit) = semaphore.acquire_owned().await else {
                    return;
                };
                if cancel.is_cancelled() {
                    return;
                }
                let result = fetch_chunk(&source, &chunk, &cancel).await;
                let _ = tx.send((index, result, permit));
            });
        }
        Self {
            rx,
            buffer: BTreeMap::new(),
            next_index: 0,
            total,
        }
    }

    /// The next chunk in index order, or `None` after the last one.
    pub async fn next_chunk(&mut self) -> Option<Result<DecodedChunk>> {
        if self.next_index >= self.total {
            return None;
        }
        while !self.buffer.contains_key(&self.next_index) {
            match self.rx.recv().await {
                Some((index, result, permit)) => {
                    self.buffer.insert(index, (result, permit));
                }
                None => {
                    return Some(Err(Error::cancelled()));
                }
            }
        }
        let (result, permit) = self
            .buffer
            .remove(&self.next_index)
            .expect("checked by the loop above");
        self.next_index += 1;
        // Dropping the permit is what lets the next download start.
        drop(permit);
        Some(result)
    }
}

async fn fetch_chunk(
    source: &ChunkSource,
    chunk: &ChunkDescriptor,
    cancel: &CancellationToken,
) -> Result<DecodedChunk> {
    let mut builder = source.transport.client().get(&chunk.url);
    if source.chunk_headers.is_empty() {
        // Result chunks encrypted at rest want the master key as an SSE-C
        // header when the response carries no prepared header set.
        if let Some(qrmk) = &source.qrmk {
            builder = builder
                .header("x-amz-server-side-encryption-customer-algorithm", "AES256")
                .header("x-amz-server-side-encryption-customer-key", qrmk);
        }
    } else {
        for (name, value) in &source.chunk_headers {
            builder = builder.header(name, value);
        }
    }
    let response = source
        .transport
        .execute_bytes(builder, &RequestOptions::default(), cancel)
        .await?;

    let body = if response.body.starts_with(&[0x1f, 0x8b]) {
        gunzip(&response.body)?
    } else {
        response.body.to_vec()
    };

    tracing::debug!(
        url = %snowflake_core::secrets::mask(&chunk.url),
        rows = chunk.row_count,
        bytes = body.len(),
        "downloaded result chunk"
    );

    match source.format.as_str() {
        "arrow" => {
            let batches = decode::arrow::read_batches(&body)?;
            if source.arrow_batches {
                return Ok(DecodedChunk::Batches(batches));
            }
            let mut rows = Vec::with_capacity(chunk.row_count);
            for batch in &batches {
                rows.extend(decode::arrow::decode_batch(
                    batch,
                    &source.row_type,
                    &source.options,
                )?);
            }
            Ok(DecodedChunk::Rows(rows))
        }
        _ => {
            // JSON chunks are row arrays without the enclosing brackets.
            let mut wrapped = Vec::with_capacity(body.len() + 2);
            wrapped.push(b'[');
            wrapped.extend_from_slice(&body);
            wrapped.push(b']');
            let cells: Vec<Vec<serde_json::Value>> =
                serde_json::from_slice(&wrapped).map_err(Error::decode)?;
            let mut rows = Vec::with_capacity(cells.len());
            for row in &cells {
                if row.len() != source.row_type.len() {
                    return Err(Error::decode(format!(
                        "chunk row has {} cells but the row type declares {}",
                        row.len(),
                        source.row_type.len()
                    )));
                }
                rows.push(
                    row.iter()
                        .zip(source.row_type.iter())
                        .map(|(cell, column)| decode::json::decode_cell(cell, column, &source.options))
                        .collect::<Result<Vec<_>>>()?,
                );
            }
            Ok(DecodedChunk::Rows(rows))
        }
    }
}

fn gunzip(body: &[u8]) -> Result<Vec<u8>> {
    use std::io::Read as _;
    let mut decoder = flate2::read::GzDecoder::new(body);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out).map_err(Error::decode)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use httptest::{Expectation, Server, matchers::*, responders::*};

    fn row_type() -> Arc<Vec<RowType>> {
        Arc::new(vec![RowType {
            name: "C1".to_string(),
            type_name: "fixed".to_string(),
            scale: Some(0),
            ..RowType::default()
        }])
    }

    fn source_for(server: &Server) -> ChunkSource {
        let _ = server;
        ChunkSource {
            transport: Transport::builder().build().unwrap(),
            chunk_headers: HashMap::new(),
            qrmk: None,
            row_type: row_type(),
            options: Arc::new(DecodeOptions::default()),
            format: "json".to_string(),
            arrow_batches: false,
        }
    }

    fn chunk_for(server: &Server, path: &str, rows: usize) -> ChunkDescriptor {
        ChunkDescriptor {
            url: server.url_str(path),
            row_count: rows,
            uncompressed_size: 0,
            compressed_size: 0,
        }
    }

    fn gzip(body: &[u8]) -> Vec<u8> {
        use std::io::Write as _;
        let mut encoder =
            flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(body).unwrap();
        encoder.finish().unwrap()
    }

    fn rows_of(chunk: DecodedChunk) -> Vec<Vec<Value>> {
        match chunk {
            DecodedChunk::Rows(rows) => rows,
            DecodedChunk::Batches(_) => panic!("expected rows"),
        }
    }

    #[tokio::test]
    async fn chunks_deliver_in_index_order() -> anyhow::Result<()> {
        let server = Server::run();
        // The slow chunk 0 responds after chunk 1 is long since done; rows
        // must still come back in chunk order.
        server.expect(
            Expectation::matching(request::method_path("GET", "/chunk0"))
                .respond_with(delay_and_then(
                    std::time::Duration::from_millis(200),
                    status_code(200).body(r#"["0"],["1"]"#),
                )),
        );
        server.expect(
            Expectation::matching(request::method_path("GET", "/chunk1"))
                .respond_with(status_code(200).body(r#"["2"],["3"]"#)),
        );

        let chunks = vec![
            chunk_for(&server, "/chunk0", 2),
            chunk_for(&server, "/chunk1", 2),
        ];
        let mut downloader =
            ChunkDownloader::start(chunks, source_for(&server), &CancellationToken::new());

        let mut all = Vec::new();
        while let Some(chunk) = downloader.next_chunk().await {
            all.extend(rows_of(chunk?));
        }
        let got: Vec<i64> = all.iter().map(|row| row[0].as_i64().unwrap()).collect();
        assert_eq!(got, vec![0, 1, 2, 3]);
        Ok(())
    }

    #[tokio::test]
    async fn gzipped_chunks_are_inflated() -> anyhow::Result<()> {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("GET", "/chunk0"))
                .respond_with(status_code(200).body(gzip(br#"["7"]"#))),
        );
        let chunks = vec![chunk_for(&server, "/chunk0", 1)];
        let mut downloader =
            ChunkDownloader::start(chunks, source_for(&server), &CancellationToken::new());
        let rows = rows_of(downloader.next_chunk().await.unwrap()?);
        assert_eq!(rows[0][0], Value::Int(7));
        assert!(downloader.next_chunk().await.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn qrmk_rides_as_ssec_header() -> anyhow::Result<()> {
        let server = Server::run();
        server.expect(
            Expectation::matching(all_of![
                request::method_path("GET", "/chunk0"),
                request::headers(contains((
                    "x-amz-server-side-encryption-customer-key",
                    "master-key"
                ))),
            ])
            .respond_with(status_code(200).body(r#"["1"]"#)),
        );
        let mut source = source_for(&server);
        source.qrmk = Some("master-key".to_string());
        let chunks = vec![chunk_for(&server, "/chunk0", 1)];
        let mut downloader = ChunkDownloader::start(chunks, source, &CancellationToken::new());
        assert!(downloader.next_chunk().await.unwrap().is_ok());
        Ok(())
    }

    #[tokio::test]
    async fn malformed_chunk_is_a_decode_error() -> anyhow::Result<()> {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("GET", "/chunk0"))
                .respond_with(status_code(200).body("not json")),
        );
        let chunks = vec![chunk_for(&server, "/chunk0", 1)];
        let mut downloader =
            ChunkDownloader::start(chunks, source_for(&server), &CancellationToken::new());
        let err = downloader.next_chunk().await.unwrap().unwrap_err();
        assert_eq!(err.kind(), snowflake_core::error::ErrorKind::Decode);
        Ok(())
    }

    #[tokio::test]
    async fn empty_chunk_list_finishes_immediately() {
        let server = Server::run();
        let mut downloader =
            ChunkDownloader::start(Vec::new(), source_for(&server), &CancellationToken::new());
        assert!(downloader.next_chunk().await.is_none());
    }
}
