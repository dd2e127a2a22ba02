//! Drives the per-chunk pipeline for a single upload

use bytes::Bytes;
use reqwest::Client as HttpClient;
use serde_json::Value;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{Semaphore, watch};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::{self, ApiClient};
use crate::uploader::UploaderConfig;
use crate::uploader::chunks::{ChunkRange, plan_chunks};
use crate::uploader::cipher::StreamEncryptor;
use crate::uploader::error::{UploadError, UploadResult};
use crate::uploader::keys::{FileKeyMaterial, WireKey};
use crate::uploader::mac::{MacEngine, MacHandle};
use crate::uploader::node::{FileAttributes, NodeRegistrar};
use crate::uploader::progress::{ProgressCallback, ProgressUpdate};
use crate::uploader::reader::read_chunk;
use crate::uploader::transfer::ChunkTransfer;

/// Turn-channel value that marks the chunk sequence as broken. A chunk that
/// fails before releasing its turn would otherwise stall every successor.
const ABORTED_TURN: u64 = u64::MAX;

/// Per-upload pipeline driver.
///
/// Reads may complete out of order within the concurrency cap; the cipher
/// and the MAC submission are serialized in chunk-index order behind a turn
/// counter; the POSTs run unordered. The completion token comes from the
/// chunk with the greatest start offset.
pub struct UploadCoordinator<'a, A: ApiClient + ?Sized> {
    api: &'a A,
    http_client: HttpClient,
    master_key: [u8; 16],
    config: UploaderConfig,
    cancel_token: CancellationToken,
}

impl<'a, A: ApiClient + ?Sized> UploadCoordinator<'a, A> {
    /// Create a coordinator for one upload
    pub fn new(
        api: &'a A,
        http_client: HttpClient,
        master_key: [u8; 16],
        config: UploaderConfig,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            api,
            http_client,
            master_key,
            config,
            cancel_token,
        }
    }

    /// Run the whole upload: validate, encrypt-and-post every chunk,
    /// finalize the integrity tag, and register the node.
    pub async fn run<P: ProgressCallback + 'static>(
        &self,
        local_path: &Path,
        target_id: &str,
        attributes: &FileAttributes,
        key_override: Option<FileKeyMaterial>,
        progress: Arc<P>,
    ) -> UploadResult<Value> {
        let file_size = validate_source(local_path).await?;
        let key = key_override.unwrap_or_else(FileKeyMaterial::generate);

        let upload_base = api::request_upload_url(self.api, file_size).await?;
        let ranges = plan_chunks(file_size);
        info!(
            target: "uploader",
            local_path = %local_path.display(),
            file_size,
            chunks = ranges.len(),
            "Planned upload"
        );

        let transfer = Arc::new(ChunkTransfer::new(
            self.http_client.clone(),
            upload_base,
            self.config.clone(),
        ));

        let mut mac = MacEngine::spawn(&key);
        let token = if ranges.is_empty() {
            // zero-byte source: a single empty post at offset 0 yields the
            // node handle, and the integrity tag folds the empty stream
            self.upload_empty(&transfer).await?
        } else {
            self.run_chunks(local_path, &key, ranges, &mac, transfer, progress)
                .await?
        };

        let meta_mac = mac.finalize(self.config.mac_drain_timeout).await?;
        let wire_key = WireKey::pack(&key, &meta_mac);

        let registrar = NodeRegistrar::new(self.api, self.master_key);
        let response = registrar
            .register(&token, target_id, &wire_key, attributes)
            .await?;

        info!(
            target: "uploader",
            local_path = %local_path.display(),
            target = target_id,
            "Upload registered"
        );
        Ok(response)
    }

    /// Post the single empty body that registers a zero-byte object
    async fn upload_empty(&self, transfer: &ChunkTransfer) -> UploadResult<String> {
        let range = ChunkRange {
            index: 0,
            start: 0,
            end: 0,
        };
        transfer
            .upload(&range, Bytes::new(), &self.cancel_token)
            .await?
            .ok_or_else(|| UploadError::protocol("empty upload returned no completion token"))
    }

    /// Process every chunk under the concurrency cap and return the
    /// completion token from the final chunk.
    async fn run_chunks<P: ProgressCallback + 'static>(
        &self,
        local_path: &Path,
        key: &FileKeyMaterial,
        ranges: Vec<ChunkRange>,
        mac: &MacEngine,
        transfer: Arc<ChunkTransfer>,
        progress: Arc<P>,
    ) -> UploadResult<String> {
        let total_chunks = ranges.len();
        let last_index = (total_chunks - 1) as u64;
        let file_size = ranges.last().map(|r| r.end).unwrap_or(0);

        let cipher = Arc::new(Mutex::new(StreamEncryptor::new(key)));
        let mac_handle = mac.handle()?;
        let semaphore = Arc::new(Semaphore::new(self.config.concurrency.max(1)));
        let (turn_tx, turn_rx) = watch::channel(0u64);
        let turn_tx = Arc::new(turn_tx);

        let mut tasks = JoinSet::new();
        for range in ranges {
            // the cap bounds in-flight chunks end to end; acquiring before
            // spawning keeps task startup in index order so the turn holder
            // is always among the running tasks
            let permit = tokio::select! {
                permit = semaphore.clone().acquire_owned() => permit
                    .map_err(|_| UploadError::Other("upload semaphore closed".to_string()))?,
                _ = self.cancel_token.cancelled() => return Err(UploadError::Cancelled),
            };

            tasks.spawn(chunk_task(
                local_path.to_path_buf(),
                range,
                cipher.clone(),
                mac_handle.clone(),
                transfer.clone(),
                turn_rx.clone(),
                turn_tx.clone(),
                self.cancel_token.clone(),
                permit,
            ));
        }
        drop(mac_handle);

        let mut completion_token = None;
        let mut first_error: Option<UploadError> = None;
        let mut bytes_done = 0u64;
        let mut chunks_done = 0usize;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok((range, token))) => {
                    if range.index == last_index {
                        completion_token = token;
                    }
                    bytes_done += range.len();
                    chunks_done += 1;
                    progress.on_progress(ProgressUpdate {
                        bytes_done,
                        bytes_total: file_size,
                        chunks_done,
                        chunks_total: total_chunks,
                        completed_chunk: range.index,
                    });
                }
                Ok(Err(e)) => {
                    // keep the most meaningful failure: secondary tasks
                    // report Cancelled once the pipeline is torn down
                    let keep = match &first_error {
                        None => true,
                        Some(existing) => existing.is_cancelled() && !e.is_cancelled(),
                    };
                    if keep {
                        warn!(
                            target: "uploader",
                            error = %e,
                            "Chunk pipeline failed, aborting remaining chunks"
                        );
                        first_error = Some(e);
                    }
                    tasks.abort_all();
                }
                Err(join_err) if join_err.is_cancelled() => {}
                Err(join_err) => {
                    if first_error.is_none() {
                        first_error = Some(UploadError::Other(format!(
                            "chunk task failed: {}",
                            join_err
                        )));
                    }
                    tasks.abort_all();
                }
            }
        }

        if let Some(e) = first_error {
            return Err(e);
        }

        debug!(
            target: "uploader",
            chunks = total_chunks,
            "All chunks uploaded"
        );

        completion_token
            .ok_or_else(|| UploadError::protocol("final chunk returned no completion token"))
    }
}

/// One chunk's trip through the pipeline: read, wait for the index turn,
/// share the plaintext with the MAC queue, encrypt, release the turn, post.
#[allow(clippy::too_many_arguments)]
async fn chunk_task(
    local_path: std::path::PathBuf,
    range: ChunkRange,
    cipher: Arc<Mutex<StreamEncryptor>>,
    mac_handle: MacHandle,
    transfer: Arc<ChunkTransfer>,
    mut turn_rx: watch::Receiver<u64>,
    turn_tx: Arc<watch::Sender<u64>>,
    cancel_token: CancellationToken,
    permit: tokio::sync::OwnedSemaphorePermit,
) -> UploadResult<(ChunkRange, Option<String>)> {
    let _permit = permit;

    let staged: UploadResult<Bytes> = async {
        // reads may complete in any order within the cap
        let plaintext = tokio::select! {
            r = read_chunk(&local_path, range.start, range.end) => r?,
            _ = cancel_token.cancelled() => return Err(UploadError::Cancelled),
        };

        // wait until every earlier chunk has gone through the cipher
        loop {
            let current = *turn_rx.borrow_and_update();
            if current == range.index {
                break;
            }
            if current == ABORTED_TURN {
                return Err(UploadError::Cancelled);
            }
            tokio::select! {
                changed = turn_rx.changed() => {
                    if changed.is_err() {
                        return Err(UploadError::Cancelled);
                    }
                }
                _ = cancel_token.cancelled() => return Err(UploadError::Cancelled),
            }
        }

        // the MAC queue gets its own view of the plaintext before the
        // cipher touches anything, and both submissions happen in index
        // order while we hold the turn
        mac_handle.submit(plaintext.clone())?;

        let cipher = cipher.clone();
        let index = range.index;
        tokio::task::spawn_blocking(move || {
            let mut guard = cipher.lock().unwrap_or_else(PoisonError::into_inner);
            guard.encrypt(index, &plaintext)
        })
        .await
        .map_err(|e| UploadError::Other(format!("cipher task failed: {}", e)))?
    }
    .await;

    let ciphertext = match staged {
        Ok(ciphertext) => ciphertext,
        Err(e) => {
            // successors are parked on this turn; mark the chain broken so
            // they bail out instead of waiting forever
            let _ = turn_tx.send(ABORTED_TURN);
            return Err(e);
        }
    };

    let _ = turn_tx.send(range.index + 1);

    // POSTs run unordered and in parallel up to the cap
    let token = transfer.upload(&range, ciphertext, &cancel_token).await?;
    Ok((range, token))
}

/// Confirm the source exists and is a regular file, returning its size
async fn validate_source(path: &Path) -> UploadResult<u64> {
    let metadata = tokio::fs::metadata(path)
        .await
        .map_err(|_| UploadError::NotFound(path.to_path_buf()))?;
    if !metadata.is_file() {
        return Err(UploadError::NotFound(path.to_path_buf()));
    }
    Ok(metadata.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn validate_source_accepts_regular_files() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"hello").unwrap();
        assert_eq!(validate_source(file.path()).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn validate_source_rejects_missing_paths() {
        let err = validate_source(Path::new("/no/such/file")).await.unwrap_err();
        assert!(matches!(err, UploadError::NotFound(_)));
    }

    #[tokio::test]
    async fn validate_source_rejects_directories() {
        let dir = tempfile::tempdir().unwrap();
        let err = validate_source(dir.path()).await.unwrap_err();
        assert!(matches!(err, UploadError::NotFound(_)));
    }
}
