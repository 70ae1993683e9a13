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

//! The agent that runs a transfer plan to completion.
//!
//! Files transfer in parallel up to the plan's `parallel` bound. One file's
//! failure never aborts its siblings: each worker records a terminal status
//! and the agent reports one result row per file. Stage credentials can
//! expire mid-transfer; workers that hit a renewal signal coalesce on a
//! single plan refresh and retry with the new credentials.

use crate::client::{self, ObjectMeta, StageError, StorageClient};
use crate::compress;
use crate::encrypt;
use crate::metadata::{FileMetadata, ResultStatus, Source, TransferResult};
use crate::plan::{CommandType, EncryptionMaterial, TransferPlan};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use sha2::{Digest, Sha256};
use snowflake_core::Result;
use snowflake_core::backoff_policy::BackoffPolicy;
use snowflake_core::error::{Error, ErrorKind};
use snowflake_core::exponential_backoff::ExponentialBackoff;
use snowflake_core::http::Transport;
use snowflake_core::storage_flow::{StorageFlow, StorageProvider};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{RwLock, Semaphore};
use tokio_util::sync::CancellationToken;

const MAX_FILE_ATTEMPTS: u32 = 5;

/// Re-acquires stage credentials by re-issuing the PUT/GET statement.
///
/// Implemented by the driver; the agent calls it when a worker reports
/// expired credentials or an expired presigned URL.
#[async_trait::async_trait]
pub trait PlanRefresher: Send + Sync + std::fmt::Debug {
    async fn refresh(&self, cancel: &CancellationToken) -> Result<TransferPlan>;
}

/// Shared stage access; swapped wholesale when credentials renew.
struct StageAccess {
    transport: Transport,
    client: Arc<dyn StorageClient>,
    encrypt_mode: encrypt::Mode,
    provider: Option<StorageProvider>,
    generation: u64,
}

/// The file-transfer agent.
pub struct TransferAgent {
    transport: Transport,
    refresher: Option<Arc<dyn PlanRefresher>>,
    staging_dir: Option<PathBuf>,
}

impl TransferAgent {
    pub fn new(transport: Transport) -> Self {
        Self {
            transport,
            refresher: None,
            staging_dir: None,
        }
    }

    pub fn with_refresher(mut self, refresher: Arc<dyn PlanRefresher>) -> Self {
        self.refresher = Some(refresher);
        self
    }

    /// Overrides the staging directory for downloads (`tmpDirPath`);
    /// defaults to the OS temp directory.
    pub fn with_staging_dir(mut self, staging_dir: Option<PathBuf>) -> Self {
        self.staging_dir = staging_dir;
        self
    }

    /// Runs the plan and returns one result row per file.
    pub async fn execute(
        &self,
        plan: TransferPlan,
        file_stream: Option<(String, Bytes)>,
        cancel: &CancellationToken,
    ) -> Result<Vec<TransferResult>> {
        let access = Arc::new(RwLock::new(StageAccess {
            transport: self.transport.clone(),
            client: Arc::from(client::for_stage(
                self.transport.clone(),
                plan.stage_info.clone(),
                presigned_map(&plan),
            )?),
            encrypt_mode: mode_for(&plan),
            provider: plan.stage_info.provider(),
            generation: 0,
        }));
        match plan.command {
            CommandType::Upload => self.upload(plan, file_stream, access, cancel).await,
            CommandType::Download => self.download(plan, access, cancel).await,
        }
    }

    async fn upload(
        &self,
        plan: TransferPlan,
        file_stream: Option<(String, Bytes)>,
        access: Arc<RwLock<StageAccess>>,
        cancel: &CancellationToken,
    ) -> Result<Vec<TransferResult>> {
        let sources = match file_stream {
            Some((name, data)) => vec![Source::Stream { name, data }],
            None => {
                let mut sources = Vec::new();
                for pattern in &plan.src_locations {
                    sources.extend(
                        crate::command::expand_glob(pattern)?
                            .into_iter()
                            .map(Source::Path),
                    );
                }
                sources
            }
        };
        let material = plan.encryption_material.first().cloned().flatten();

        let semaphore = Arc::new(Semaphore::new(plan.parallel.max(1)));
        let mut tasks = tokio::task::JoinSet::new();
        for (index, source) in sources.into_iter().enumerate() {
            let semaphore = semaphore.clone();
            let access = access.clone();
            let refresher = self.refresher.clone();
            let material = material.clone();
            let cancel = cancel.clone();
            let auto_compress = plan.auto_compress;
            let overwrite = plan.overwrite;
            let source_compression = plan.source_compression.clone();
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await.expect("semaphore is never closed");
                let mut file = FileMetadata::new(source);
                let outcome = upload_one(
                    &mut file,
                    auto_compress,
                    overwrite,
                    source_compression.as_deref(),
                    material.as_ref(),
                    &access,
                    refresher.as_deref(),
                    &cancel,
                )
                .await;
                record_outcome(&mut file, outcome);
                (index, file)
            });
        }
        collect(tasks, cancel).await
    }

    async fn download(
        &self,
        plan: TransferPlan,
        access: Arc<RwLock<StageAccess>>,
        cancel: &CancellationToken,
    ) -> Result<Vec<TransferResult>> {
        let target = plan
            .local_location
            .clone()
            .ok_or_else(|| Error::transfer("GET carries no local target directory"))?;
        let target = PathBuf::from(target);
        tokio::fs::create_dir_all(&target)
            .await
            .map_err(Error::transfer)?;
        // Files download into the staging directory first and move into
        // the target only once complete, so readers of the target never
        // observe partial files.
        let staging = self
            .staging_dir
            .clone()
            .unwrap_or_else(std::env::temp_dir);
        tokio::fs::create_dir_all(&staging)
            .await
            .map_err(Error::transfer)?;

        let semaphore = Arc::new(Semaphore::new(plan.parallel.max(1)));
        let mut tasks = tokio::task::JoinSet::new();
        for (index, key) in plan.src_locations.iter().enumerate() {
            let semaphore = semaphore.clone();
            let access = access.clone();
            let refresher = self.refresher.clone();
            let material = plan.encryption_material.get(index).cloned().flatten();
            let cancel = cancel.clone();
            let key = key.clone();
            let target = target.clone();
            let staging = staging.clone();
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await.expect("semaphore is never closed");
                let name = key.rsplit('/').next().unwrap_or(&key).to_string();
                let mut file = FileMetadata::new(Source::Path(target.join(&name)));
                file.dst_name = name;
                let outcome = download_one(
                    &mut file,
                    &key,
                    &target,
                    &staging,
                    material.as_ref(),
                    &access,
                    refresher.as_deref(),
                    &cancel,
                )
                .await;
                record_outcome(&mut file, outcome);
                (index, file)
            });
        }
        collect(tasks, cancel).await
    }
}

async fn collect(
    mut tasks: tokio::task::JoinSet<(usize, FileMetadata)>,
    cancel: &CancellationToken,
) -> Result<Vec<TransferResult>> {
    let mut files = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        let (index, file) = joined.map_err(Error::other)?;
        files.push((index, file));
    }
    if cancel.is_cancelled() {
        return Err(Error::cancelled());
    }
    files.sort_by_key(|(index, _)| *index);
    Ok(files
        .into_iter()
        .map(|(_, file)| TransferResult::from_metadata(&file))
        .collect())
}

fn presigned_map(plan: &TransferPlan) -> HashMap<String, String> {
    plan.src_locations
        .iter()
        .zip(plan.presigned_urls.iter())
        .map(|(key, url)| (key.clone(), url.clone()))
        .collect()
}

fn mode_for(plan: &TransferPlan) -> encrypt::Mode {
    if plan.stage_info.uses_gcm() {
        encrypt::Mode::Gcm
    } else {
        encrypt::Mode::Cbc
    }
}

fn record_outcome(file: &mut FileMetadata, outcome: Result<ResultStatus>) {
    match outcome {
        Ok(status) => file.status = status,
        Err(e) => {
            file.status = if classify_error(&e) == StorageFlow::NotFound {
                ResultStatus::NotFoundFile
            } else {
                ResultStatus::ErrStatus
            };
            file.message = format!("{e}");
        }
    }
}

fn classify_error(error: &Error) -> StorageFlow {
    if let Some(stage) = error.as_inner::<StageError>() {
        return stage.flow;
    }
    if error.kind() == ErrorKind::Transport {
        StorageFlow::NeedRetry
    } else {
        StorageFlow::Fatal
    }
}

/// Runs one storage operation under the per-file retry loop, renewing
/// credentials when the stage signals expiry.
async fn with_retries<T, F, Fut>(
    mut op: F,
    access: &RwLock<StageAccess>,
    refresher: Option<&dyn PlanRefresher>,
    cancel: &CancellationToken,
) -> Result<T>
where
    F: FnMut(Arc<dyn StorageClient>) -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let backoff = ExponentialBackoff::default();
    let loop_start = std::time::Instant::now();
    let mut attempts = 0_u32;
    loop {
        let (client, generation) = {
            let access = access.read().await;
            (access.client.clone(), access.generation)
        };
        let error = match op(client).await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };
        if error.is_cancelled() {
            return Err(error);
        }
        attempts += 1;
        if attempts >= MAX_FILE_ATTEMPTS {
            return Err(error);
        }
        match classify_error(&error) {
            StorageFlow::NeedRetry => {
                let delay = backoff.on_failure(loop_start, attempts);
                tracing::debug!(attempts, %error, ?delay, "retrying storage request");
                tokio::time::sleep(delay).await;
            }
            StorageFlow::RenewToken | StorageFlow::RenewPresignedUrl => {
                let Some(refresher) = refresher else {
                    return Err(error);
                };
                renew(access, refresher, generation, cancel).await?;
            }
            StorageFlow::NotFound | StorageFlow::Fatal | StorageFlow::Success => {
                return Err(error);
            }
        }
    }
}

/// Refreshes the plan and swaps the shared stage access. Single-flight per
/// generation: callers that lost the race reuse the fresh client.
async fn renew(
    access: &RwLock<StageAccess>,
    refresher: &dyn PlanRefresher,
    observed_generation: u64,
    cancel: &CancellationToken,
) -> Result<()> {
    let mut guard = access.write().await;
    if guard.generation != observed_generation {
        return Ok(());
    }
    tracing::debug!("stage credentials expired, refreshing the transfer plan");
    let plan = refresher.refresh(cancel).await?;
    guard.client = Arc::from(client::for_stage(
        guard.transport.clone(),
        plan.stage_info.clone(),
        presigned_map(&plan),
    )?);
    guard.encrypt_mode = mode_for(&plan);
    guard.provider = plan.stage_info.provider();
    guard.generation += 1;
    Ok(())
}

async fn read_source(source: &Source) -> Result<Bytes> {
    match source {
        Source::Path(path) => tokio::fs::read(path)
            .await
            .map(Bytes::from)
            .map_err(|e| Error::transfer(format!("cannot read {}: {e}", path.display()))),
        Source::Stream { data, .. } => Ok(data.clone()),
    }
}

#[allow(clippy::too_many_arguments)]
async fn upload_one(
    file: &mut FileMetadata,
    auto_compress: bool,
    overwrite: bool,
    source_compression: Option<&str>,
    material: Option<&EncryptionMaterial>,
    access: &RwLock<StageAccess>,
    refresher: Option<&dyn PlanRefresher>,
    cancel: &CancellationToken,
) -> Result<ResultStatus> {
    let raw = read_source(&file.source).await?;
    file.src_size = raw.len() as u64;

    // A declared SOURCE_COMPRESSION wins over detection.
    let declared = source_compression
        .map(compress::from_name)
        .transpose()?
        .flatten();
    let detected = declared.or_else(|| compress::detect(&raw, &file.dst_name));
    let staged = match (detected, auto_compress) {
        (Some(format), _) => {
            file.src_compression = Some(format.name);
            file.dst_compression = Some(format.name);
            raw
        }
        (None, true) => {
            file.dst_compression = Some(compress::GZIP.name);
            file.dst_name = format!("{}{}", file.dst_name, compress::GZIP.extension);
            Bytes::from(compress::gzip(&raw)?)
        }
        (None, false) => raw,
    };
    file.upload_size = staged.len() as u64;
    file.sha256_digest = STANDARD.encode(Sha256::digest(&staged));

    let (provider, encrypt_mode) = {
        let access = access.read().await;
        (access.provider, access.encrypt_mode)
    };

    if !overwrite {
        let key = file.dst_name.clone();
        let head = with_retries(
            move |client: Arc<dyn StorageClient>| {
                let key = &key;
                async move { client.head(key, cancel).await }
            },
            access,
            refresher,
            cancel,
        )
        .await?;
        if let Some(remote) = head {
            file.message = if remote.sha256_digest.as_deref() == Some(file.sha256_digest.as_str())
            {
                "remote file matches the local digest".to_string()
            } else {
                "remote file already exists and OVERWRITE is off".to_string()
            };
            return Ok(ResultStatus::Skipped);
        }
    }

    let (body, meta) = match material {
        Some(material) if provider != Some(StorageProvider::LocalFs) => {
            let encrypted = encrypt::encrypt(material, &staged, encrypt_mode)?;
            (
                Bytes::from(encrypted.body),
                ObjectMeta {
                    wrapped_key: Some(encrypted.wrapped_key),
                    mat_desc: Some(encrypted.mat_desc),
                    sha256_digest: file.sha256_digest.clone(),
                },
            )
        }
        _ => (
            staged,
            ObjectMeta {
                sha256_digest: file.sha256_digest.clone(),
                ..ObjectMeta::default()
            },
        ),
    };

    let key = file.dst_name.clone();
    with_retries(
        move |client: Arc<dyn StorageClient>| {
            let key = &key;
            let body = &body;
            let meta = &meta;
            async move { client.put(key, body.clone(), meta, cancel).await }
        },
        access,
        refresher,
        cancel,
    )
    .await?;
    Ok(ResultStatus::Uploaded)
}

#[allow(clippy::too_many_arguments)]
async fn download_one(
    file: &mut FileMetadata,
    key: &str,
    target: &Path,
    staging: &Path,
    material: Option<&EncryptionMaterial>,
    access: &RwLock<StageAccess>,
    refresher: Option<&dyn PlanRefresher>,
    cancel: &CancellationToken,
) -> Result<ResultStatus> {
    let downloaded = with_retries(
        |client: Arc<dyn StorageClient>| async move { client.get(key, cancel).await },
        access,
        refresher,
        cancel,
    )
    .await?;
    file.src_size = downloaded.body.len() as u64;

    let body = match (material, &downloaded.wrapped_key) {
        (Some(material), Some(wrapped_key)) => {
            let mode = access.read().await.encrypt_mode;
            encrypt::decrypt(material, &downloaded.body, wrapped_key, mode)?
        }
        _ => downloaded.body.to_vec(),
    };
    file.upload_size = body.len() as u64;
    file.src_compression = compress::detect(&body, &file.dst_name).map(|f| f.name);
    file.dst_compression = file.src_compression;

    let part = staging.join(format!("{}.{:016x}.part", file.dst_name, rand::random::<u64>()));
    tokio::fs::write(&part, &body)
        .await
        .map_err(|e| Error::transfer(format!("cannot write {}: {e}", part.display())))?;
    let path = target.join(&file.dst_name);
    move_into_place(&part, &path).await?;
    Ok(ResultStatus::Downloaded)
}

/// Moves a completed staging file into the target directory. Rename first;
/// the staging directory can sit on another filesystem, in which case the
/// bytes copy and the staging file is cleaned up afterwards.
async fn move_into_place(part: &Path, path: &Path) -> Result<()> {
    if tokio::fs::rename(part, path).await.is_ok() {
        return Ok(());
    }
    tokio::fs::copy(part, path)
        .await
        .map_err(|e| Error::transfer(format!("cannot move into {}: {e}", path.display())))?;
    let _ = tokio::fs::remove_file(part).await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::StageInfo;
    use serde_json::json;
    use std::sync::Mutex;

    fn local_plan(dir: &tempfile::TempDir, command: &str) -> TransferPlan {
        serde_json::from_value(json!({
            "command": command,
            "stageInfo": {
                "locationType": "LOCAL_FS",
                "location": dir.path().join("stage").display().to_string(),
            },
        }))
        .unwrap()
    }

    fn agent() -> TransferAgent {
        TransferAgent::new(Transport::builder().build().unwrap())
    }

    #[tokio::test]
    async fn put_then_get_round_trips_on_a_local_stage() -> anyhow::Result<()> {
        let dir = tempfile::TempDir::new()?;
        let src = dir.path().join("data.csv");
        std::fs::write(&src, b"a,b\n1,2\n")?;

        let mut plan = local_plan(&dir, "UPLOAD");
        plan.src_locations = vec![src.display().to_string()];
        plan.auto_compress = true;
        let results = agent()
            .execute(plan, None, &CancellationToken::new())
            .await?;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].status, "UPLOADED");
        assert_eq!(results[0].target, "data.csv.gz");
        assert_eq!(results[0].target_compression, "gzip");

        let mut plan = local_plan(&dir, "DOWNLOAD");
        plan.src_locations = vec!["data.csv.gz".to_string()];
        plan.local_location = Some(dir.path().join("out").display().to_string());
        let results = agent()
            .execute(plan, None, &CancellationToken::new())
            .await?;
        assert_eq!(results[0].status, "DOWNLOADED");
        let fetched = std::fs::read(dir.path().join("out/data.csv.gz"))?;
        assert_eq!(compress::gunzip(&fetched)?, b"a,b\n1,2\n");
        Ok(())
    }

    #[tokio::test]
    async fn second_put_without_overwrite_is_skipped() -> anyhow::Result<()> {
        let dir = tempfile::TempDir::new()?;
        let src = dir.path().join("data.csv");
        std::fs::write(&src, b"a,b\n")?;

        for want in ["UPLOADED", "SKIPPED"] {
            let mut plan = local_plan(&dir, "UPLOAD");
            plan.src_locations = vec![src.display().to_string()];
            let results = agent()
                .execute(plan, None, &CancellationToken::new())
                .await?;
            assert_eq!(results[0].status, want);
        }

        // With OVERWRITE the second PUT uploads again.
        let mut plan = local_plan(&dir, "UPLOAD");
        plan.src_locations = vec![src.display().to_string()];
        plan.overwrite = true;
        let results = agent()
            .execute(plan, None, &CancellationToken::new())
            .await?;
        assert_eq!(results[0].status, "UPLOADED");
        Ok(())
    }

    #[tokio::test]
    async fn file_stream_uploads_in_memory_source() -> anyhow::Result<()> {
        let dir = tempfile::TempDir::new()?;
        let plan = local_plan(&dir, "UPLOAD");
        let results = agent()
            .execute(
                plan,
                Some(("inline.csv".to_string(), Bytes::from_static(b"x,y\n"))),
                &CancellationToken::new(),
            )
            .await?;
        assert_eq!(results[0].status, "UPLOADED");
        assert!(dir.path().join("stage/inline.csv").exists());
        Ok(())
    }

    #[tokio::test]
    async fn downloads_stage_through_the_configured_directory() -> anyhow::Result<()> {
        let dir = tempfile::TempDir::new()?;
        std::fs::create_dir_all(dir.path().join("stage"))?;
        std::fs::write(dir.path().join("stage/data.csv"), b"a,b\n")?;
        let staging = dir.path().join("scratch");

        let mut plan = local_plan(&dir, "DOWNLOAD");
        plan.src_locations = vec!["data.csv".to_string()];
        plan.local_location = Some(dir.path().join("out").display().to_string());
        let agent = TransferAgent::new(Transport::builder().build()?)
            .with_staging_dir(Some(staging.clone()));
        let results = agent
            .execute(plan, None, &CancellationToken::new())
            .await?;
        assert_eq!(results[0].status, "DOWNLOADED");
        // The staging directory was created on demand, and the completed
        // file moved out of it into the target.
        assert!(staging.is_dir());
        assert_eq!(std::fs::read_dir(&staging)?.count(), 0);
        assert_eq!(std::fs::read(dir.path().join("out/data.csv"))?, b"a,b\n");
        Ok(())
    }

    #[tokio::test]
    async fn missing_download_is_isolated_per_file() -> anyhow::Result<()> {
        let dir = tempfile::TempDir::new()?;
        std::fs::create_dir_all(dir.path().join("stage"))?;
        std::fs::write(dir.path().join("stage/present.csv"), b"ok")?;

        let mut plan = local_plan(&dir, "DOWNLOAD");
        plan.src_locations = vec!["present.csv".to_string(), "missing.csv".to_string()];
        plan.local_location = Some(dir.path().join("out").display().to_string());
        let results = agent()
            .execute(plan, None, &CancellationToken::new())
            .await?;
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].status, "DOWNLOADED");
        assert_eq!(results[1].status, "NOT_FOUND_FILE");
        Ok(())
    }

    #[derive(Debug)]
    struct FlakyClient {
        puts: Mutex<u32>,
        fail_first: u32,
        flow: StorageFlow,
    }

    #[async_trait::async_trait]
    impl StorageClient for FlakyClient {
        async fn put(
            &self,
            _key: &str,
            _body: Bytes,
            _meta: &ObjectMeta,
            _cancel: &CancellationToken,
        ) -> Result<()> {
            let mut puts = self.puts.lock().unwrap();
            *puts += 1;
            if *puts <= self.fail_first {
                return Err(Error::transfer(StageError {
                    flow: self.flow,
                    status: 503,
                    message: "transient".to_string(),
                }));
            }
            Ok(())
        }

        async fn head(
            &self,
            _key: &str,
            _cancel: &CancellationToken,
        ) -> Result<Option<crate::client::RemoteHead>> {
            Ok(None)
        }

        async fn get(&self, _key: &str, _cancel: &CancellationToken) -> Result<Downloaded> {
            unimplemented!("not used in this test")
        }
    }
    use crate::client::Downloaded;

    #[tokio::test]
    async fn transient_failures_retry_until_success() -> anyhow::Result<()> {
        let client = Arc::new(FlakyClient {
            puts: Mutex::new(0),
            fail_first: 2,
            flow: StorageFlow::NeedRetry,
        });
        let access = RwLock::new(StageAccess {
            transport: Transport::builder().build()?,
            client: client.clone(),
            encrypt_mode: encrypt::Mode::Cbc,
            provider: Some(StorageProvider::S3),
            generation: 0,
        });
        with_retries(
            |c: Arc<dyn StorageClient>| async move {
                c.put(
                    "k",
                    Bytes::new(),
                    &ObjectMeta::default(),
                    &CancellationToken::new(),
                )
                .await
            },
            &access,
            None,
            &CancellationToken::new(),
        )
        .await?;
        assert_eq!(*client.puts.lock().unwrap(), 3);
        Ok(())
    }

    mockall::mock! {
        pub Client {}

        #[async_trait::async_trait]
        impl StorageClient for Client {
            async fn put(
                &self,
                key: &str,
                body: Bytes,
                meta: &ObjectMeta,
                cancel: &CancellationToken,
            ) -> Result<()>;
            async fn head(
                &self,
                key: &str,
                cancel: &CancellationToken,
            ) -> Result<Option<crate::client::RemoteHead>>;
            async fn get(&self, key: &str, cancel: &CancellationToken) -> Result<Downloaded>;
        }
    }

    #[derive(Debug)]
    struct LocalRefresher {
        stage_dir: std::path::PathBuf,
        calls: Mutex<u32>,
    }

    #[async_trait::async_trait]
    impl PlanRefresher for LocalRefresher {
        async fn refresh(&self, _cancel: &CancellationToken) -> Result<TransferPlan> {
            *self.calls.lock().unwrap() += 1;
            Ok(serde_json::from_value(json!({
                "command": "UPLOAD",
                "stageInfo": {
                    "locationType": "LOCAL_FS",
                    "location": self.stage_dir.display().to_string(),
                },
            }))
            .unwrap())
        }
    }

    #[tokio::test]
    async fn expired_credentials_refresh_once_and_retry() -> anyhow::Result<()> {
        let dir = tempfile::TempDir::new()?;
        let stage_dir = dir.path().join("stage");

        // The first client only ever reports expired credentials.
        let mut expired = MockClient::new();
        expired.expect_put().returning(|_, _, _, _| {
            Err(Error::transfer(StageError {
                flow: StorageFlow::RenewToken,
                status: 403,
                message: "ExpiredToken".to_string(),
            }))
        });
        let refresher = LocalRefresher {
            stage_dir: stage_dir.clone(),
            calls: Mutex::new(0),
        };
        let access = RwLock::new(StageAccess {
            transport: Transport::builder().build()?,
            client: Arc::new(expired),
            encrypt_mode: encrypt::Mode::Cbc,
            provider: Some(StorageProvider::S3),
            generation: 0,
        });
        with_retries(
            |c: Arc<dyn StorageClient>| async move {
                c.put(
                    "renewed.csv",
                    Bytes::from_static(b"payload"),
                    &ObjectMeta::default(),
                    &CancellationToken::new(),
                )
                .await
            },
            &access,
            Some(&refresher),
            &CancellationToken::new(),
        )
        .await?;
        // One refresh swapped in the working (local) client.
        assert_eq!(*refresher.calls.lock().unwrap(), 1);
        assert!(stage_dir.join("renewed.csv").exists());
        Ok(())
    }

    #[tokio::test]
    async fn renewal_without_refresher_fails() -> anyhow::Result<()> {
        let client = Arc::new(FlakyClient {
            puts: Mutex::new(0),
            fail_first: u32::MAX,
            flow: StorageFlow::RenewToken,
        });
        let access = RwLock::new(StageAccess {
            transport: Transport::builder().build()?,
            client: client.clone(),
            encrypt_mode: encrypt::Mode::Cbc,
            provider: Some(StorageProvider::S3),
            generation: 0,
        });
        let result = with_retries(
            |c: Arc<dyn StorageClient>| async move {
                c.put(
                    "k",
                    Bytes::new(),
                    &ObjectMeta::default(),
                    &CancellationToken::new(),
                )
                .await
            },
            &access,
            None,
            &CancellationToken::new(),
        )
        .await;
        assert!(result.is_err());
        // Exactly one attempt; renewal is impossible without a refresher.
        assert_eq!(*client.puts.lock().unwrap(), 1);
        Ok(())
    }
}
