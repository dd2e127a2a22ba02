//! Opaque service RPC boundary
//!
//! Session management, the request envelope, and the transport underneath
//! it all live outside the upload core; the core only posts a JSON payload
//! and reads JSON back.

use async_trait::async_trait;
use serde_json::{Value, json};
use thiserror::Error;

/// Result type for API operations
pub type ApiResult<T> = Result<T, ApiError>;

/// Errors surfaced by the opaque API client
#[derive(Debug, Error)]
pub enum ApiError {
    /// The service answered with a numeric error code
    #[error("Service returned error code {0}")]
    Service(i64),

    /// Transport-level failure below the RPC envelope
    #[error("API transport error: {0}")]
    Transport(String),

    /// Response did not have the expected shape
    #[error("Malformed API response: {0}")]
    Malformed(String),
}

/// Opaque client for the storage service RPC endpoint.
///
/// Implementations decode the service's numeric error responses into
/// [`ApiError::Service`]; everything else comes back as JSON. The method is
/// awaitable and must be cancellation-safe: dropping the future must not
/// leave detached work behind.
#[async_trait]
pub trait ApiClient: Send + Sync {
    /// Submit one RPC payload and return the decoded response
    async fn request(&self, payload: Value) -> ApiResult<Value>;
}

#[async_trait]
impl<A: ApiClient + ?Sized> ApiClient for std::sync::Arc<A> {
    async fn request(&self, payload: Value) -> ApiResult<Value> {
        (**self).request(payload).await
    }
}

/// Ask the service for an upload base URL for a file of `size` bytes.
///
/// Issues the `u`-request and extracts the `p` field of the answer.
pub async fn request_upload_url<A: ApiClient + ?Sized>(api: &A, size: u64) -> ApiResult<String> {
    let response = api
        .request(json!({"a": "u", "s": size, "ms": 0, "r": 0, "e": 0}))
        .await?;

    if let Some(code) = response.as_i64() {
        return Err(ApiError::Service(code.wrapping_abs()));
    }

    response
        .get("p")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| ApiError::Malformed("upload URL response is missing \"p\"".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CannedApi(Value);

    #[async_trait]
    impl ApiClient for CannedApi {
        async fn request(&self, payload: Value) -> ApiResult<Value> {
            assert_eq!(payload["a"], "u");
            assert!(payload["s"].is_u64());
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn extracts_upload_url() {
        let api = CannedApi(json!({"p": "https://upload.example/seg"}));
        let url = request_upload_url(&api, 1000).await.unwrap();
        assert_eq!(url, "https://upload.example/seg");
    }

    #[tokio::test]
    async fn numeric_answer_is_a_service_error() {
        let api = CannedApi(json!(-3));
        let err = request_upload_url(&api, 1000).await.unwrap_err();
        assert!(matches!(err, ApiError::Service(3)));
    }

    #[tokio::test]
    async fn missing_field_is_malformed() {
        let api = CannedApi(json!({"q": 1}));
        let err = request_upload_url(&api, 1000).await.unwrap_err();
        assert!(matches!(err, ApiError::Malformed(_)));
    }
}
