//! # MEGA Uploader
//!
//! Client-side upload core for a cloud storage service whose server-visible
//! data is end-to-end encrypted. Given a local file and a target folder
//! handle, the crate encrypts the file as an AES-128-CTR stream over the
//! service's growing-size chunk layout, computes the condensed integrity
//! tag through a parallel CBC-MAC pipeline, posts the encrypted chunks
//! concurrently, and registers the resulting node with encrypted
//! attributes and an XOR-folded wire key.
//!
//! Authentication and the RPC transport stay outside the crate: callers
//! hand in an [`api::ApiClient`] that can post one JSON payload and return
//! JSON, plus the session's 16-byte master key.
//!
//! ## Example
//!
//! ```no_run
//! use mega_uploader::{MegaUploader, UploadParams, UploaderConfig};
//! use mega_uploader::api::{ApiClient, ApiResult};
//! use async_trait::async_trait;
//! use serde_json::Value;
//! use std::sync::Arc;
//!
//! struct SessionApi; // wraps the authenticated RPC endpoint
//!
//! #[async_trait]
//! impl ApiClient for SessionApi {
//!     async fn request(&self, payload: Value) -> ApiResult<Value> {
//!         // post `payload` through the session transport
//!         # let _ = payload; unimplemented!()
//!     }
//! }
//!
//! # async fn run() -> anyhow::Result<()> {
//! let master_key = [0u8; 16]; // from the authenticated session
//! let uploader = MegaUploader::new(Arc::new(SessionApi), master_key, UploaderConfig::default());
//! let response = uploader
//!     .upload(UploadParams::new("report.pdf", "folder-handle"))
//!     .await?;
//! println!("registered: {response}");
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod logging;
pub mod uploader;

// Re-export commonly used types
pub use api::{ApiClient, ApiError, ApiResult};
pub use logging::{LogConfig, LogGuard};
pub use uploader::{
    FileAttributes, FileKeyMaterial, MegaUploader, UploadError, UploadParams, UploadResult,
    UploaderConfig, WireKey,
};
