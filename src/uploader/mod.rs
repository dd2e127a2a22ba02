//! End-to-end-encrypted upload pipeline
//!
//! This module drives the whole client-side upload of a single file: the
//! growing-size chunk plan, the per-upload AES-CTR stream, the parallel
//! CBC-MAC pipeline, the concurrent chunk POSTs, and finally the node
//! registration with encrypted attributes.

mod chunks;
mod cipher;
mod coordinator;
mod error;
mod keys;
mod mac;
mod node;
mod progress;
mod reader;
mod transfer;

use anyhow::Result;
use reqwest::Client as HttpClient;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

pub use chunks::{ChunkRange, plan_chunks};
pub use error::{UploadError, UploadResult};
pub use keys::{FileKeyMaterial, KEY_MATERIAL_LEN, WIRE_KEY_LEN, WireKey};
pub use node::{FileAttributes, LABEL_NAMES, decrypt_attributes, encrypt_attributes};
pub use progress::{FnProgress, NoOpProgress, ProgressCallback, ProgressUpdate};

use crate::api::ApiClient;
use coordinator::UploadCoordinator;

/// Configuration for the uploader
#[derive(Debug, Clone)]
pub struct UploaderConfig {
    /// Maximum number of chunks in flight at once
    pub concurrency: usize,
    /// Request timeout for a single chunk POST
    pub request_timeout: Duration,
    /// How long to wait for the MAC worker to drain at end-of-stream
    pub mac_drain_timeout: Duration,
    /// Maximum number of retry attempts per chunk (0 disables retries)
    pub max_retries: u32,
    /// Base delay between retries (exponential backoff)
    pub retry_base_delay: Duration,
    /// Maximum delay between retries
    pub retry_max_delay: Duration,
    /// Connect timeout for the shared HTTP client
    pub connect_timeout: Duration,
}

impl Default for UploaderConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            request_timeout: Duration::from_secs(120),
            mac_drain_timeout: Duration::from_secs(30),
            max_retries: 3,
            retry_base_delay: Duration::from_secs(1),
            retry_max_delay: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(30),
        }
    }
}

/// Parameters for a single upload
#[derive(Debug, Clone)]
pub struct UploadParams {
    /// Local file path
    pub local_path: PathBuf,
    /// Target folder handle on the service
    pub target_id: String,
    /// Attributes registered with the node
    pub attributes: FileAttributes,
    /// Caller-supplied key material; generated randomly when absent
    pub key_override: Option<FileKeyMaterial>,
}

impl UploadParams {
    /// Upload `local_path` into `target_id`, naming the node after the file
    /// name unless the attributes are changed afterwards.
    pub fn new(local_path: impl Into<PathBuf>, target_id: impl Into<String>) -> Self {
        let local_path = local_path.into();
        let name = local_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            local_path,
            target_id: target_id.into(),
            attributes: FileAttributes::new(name),
            key_override: None,
        }
    }

    /// Replace the node attributes
    pub fn with_attributes(mut self, attributes: FileAttributes) -> Self {
        self.attributes = attributes;
        self
    }

    /// Pin the key material instead of generating it
    pub fn with_key(mut self, key: FileKeyMaterial) -> Self {
        self.key_override = Some(key);
        self
    }
}

/// Main uploader entry point.
///
/// Holds the opaque API client, the session master key, and a shared HTTP
/// client, and runs one coordinator per [`upload`](MegaUploader::upload)
/// call.
pub struct MegaUploader<A: ApiClient> {
    api: Arc<A>,
    http_client: HttpClient,
    master_key: [u8; 16],
    config: UploaderConfig,
    cancel_token: CancellationToken,
}

impl<A: ApiClient> MegaUploader<A> {
    /// Create a new uploader for an authenticated session
    pub fn new(api: Arc<A>, master_key: [u8; 16], config: UploaderConfig) -> Self {
        let http_client = HttpClient::builder()
            .connect_timeout(config.connect_timeout)
            .build()
            .expect("Failed to create HTTP client");

        Self {
            api,
            http_client,
            master_key,
            config,
            cancel_token: CancellationToken::new(),
        }
    }

    /// Create uploader with a custom cancellation token
    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel_token = token;
        self
    }

    /// Cancel the current upload
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    /// Check if the upload is cancelled
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// Upload a file and register it under the target folder
    pub async fn upload(&self, params: UploadParams) -> Result<Value> {
        self.upload_with_progress(params, NoOpProgress).await
    }

    /// Upload a file with progress reporting
    pub async fn upload_with_progress<P: ProgressCallback + 'static>(
        &self,
        params: UploadParams,
        progress: P,
    ) -> Result<Value> {
        info!(
            target: "uploader",
            local_path = %params.local_path.display(),
            target = %params.target_id,
            "Starting upload"
        );

        let coordinator = UploadCoordinator::new(
            &*self.api,
            self.http_client.clone(),
            self.master_key,
            self.config.clone(),
            self.cancel_token.clone(),
        );

        let result = coordinator
            .run(
                &params.local_path,
                &params.target_id,
                &params.attributes,
                params.key_override.clone(),
                Arc::new(progress),
            )
            .await;

        match result {
            Ok(response) => {
                info!(
                    target: "uploader",
                    local_path = %params.local_path.display(),
                    "Upload completed successfully"
                );
                Ok(response)
            }
            Err(e) => {
                if e.is_cancelled() || self.cancel_token.is_cancelled() {
                    info!(
                        target: "uploader",
                        local_path = %params.local_path.display(),
                        "Upload cancelled"
                    );
                    Err(UploadError::Cancelled.into())
                } else {
                    error!(
                        target: "uploader",
                        local_path = %params.local_path.display(),
                        error = %e,
                        "Upload failed"
                    );
                    Err(e.into())
                }
            }
        }
    }
}
