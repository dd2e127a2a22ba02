//! HTTP transfer of encrypted chunks

use bytes::Bytes;
use reqwest::Client as HttpClient;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::uploader::UploaderConfig;
use crate::uploader::chunks::ChunkRange;
use crate::uploader::error::{UploadError, UploadResult};

/// Posts encrypted chunks to per-offset URLs under the upload base.
pub struct ChunkTransfer {
    http_client: HttpClient,
    upload_base: String,
    config: UploaderConfig,
}

impl ChunkTransfer {
    /// Create a transfer bound to one upload base URL
    pub fn new(http_client: HttpClient, upload_base: String, config: UploaderConfig) -> Self {
        Self {
            http_client,
            upload_base,
            config,
        }
    }

    /// Upload a single encrypted chunk, retrying transient transport
    /// failures with exponential backoff.
    ///
    /// Returns the token string from the response body, or `None` when the
    /// server answered with an empty body (expected for non-final chunks).
    pub async fn upload(
        &self,
        chunk: &ChunkRange,
        encrypted: Bytes,
        cancel_token: &CancellationToken,
    ) -> UploadResult<Option<String>> {
        let mut last_error = None;

        for attempt in 0..=self.config.max_retries {
            if cancel_token.is_cancelled() {
                return Err(UploadError::Cancelled);
            }

            if attempt > 0 {
                let delay = self.retry_delay(attempt);
                debug!(
                    target: "uploader::transfer",
                    chunk = chunk.index,
                    attempt,
                    delay_ms = delay.as_millis(),
                    "Retrying chunk upload"
                );

                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancel_token.cancelled() => {
                        return Err(UploadError::Cancelled);
                    }
                }
            }

            let post = self.post_chunk(chunk, encrypted.clone());
            let result = tokio::select! {
                r = post => r,
                _ = cancel_token.cancelled() => {
                    return Err(UploadError::Cancelled);
                }
            };

            match result {
                Ok(token) => {
                    debug!(
                        target: "uploader::transfer",
                        chunk = chunk.index,
                        token = ?token,
                        "Chunk uploaded successfully"
                    );
                    return Ok(token);
                }
                Err(e) => {
                    if !e.is_retryable() || attempt == self.config.max_retries {
                        error!(
                            target: "uploader::transfer",
                            chunk = chunk.index,
                            error = %e,
                            attempt,
                            "Chunk upload failed"
                        );
                        return Err(e);
                    }
                    warn!(
                        target: "uploader::transfer",
                        chunk = chunk.index,
                        error = %e,
                        attempt,
                        "Chunk upload failed, will retry"
                    );
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or(UploadError::MaxRetriesExceeded {
            chunk_index: chunk.index,
            max_retries: self.config.max_retries,
        }))
    }

    /// One POST of the encrypted bytes to `<upload_base>/<start>`
    async fn post_chunk(&self, chunk: &ChunkRange, encrypted: Bytes) -> UploadResult<Option<String>> {
        let url = format!("{}/{}", self.upload_base, chunk.start);

        debug!(
            target: "uploader::transfer",
            chunk = chunk.index,
            start = chunk.start,
            size = encrypted.len(),
            url = %url,
            "Posting encrypted chunk"
        );

        let response = self
            .http_client
            .post(&url)
            .header("Content-Length", encrypted.len())
            .timeout(self.config.request_timeout)
            .body(encrypted)
            .send()
            .await
            .map_err(|e| UploadError::TransportError(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(UploadError::TransportError(format!(
                "HTTP {}: {}",
                status, body
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| UploadError::TransportError(e.to_string()))?;
        classify_response(&body)
    }

    /// Calculate retry delay with exponential backoff
    fn retry_delay(&self, attempt: u32) -> Duration {
        let base = self.config.retry_base_delay.as_millis() as u64;
        let delay_ms = base * (1 << attempt.min(10)); // Cap exponential growth
        let delay = Duration::from_millis(delay_ms);
        delay.min(self.config.retry_max_delay)
    }
}

/// Interpret an upload response body as a service error code, an empty
/// body, or a token string.
fn classify_response(body: &str) -> UploadResult<Option<String>> {
    if let Some(code) = parse_error_code(body) {
        return Err(UploadError::ServiceError(code));
    }
    if body.is_empty() {
        return Ok(None);
    }
    Ok(Some(body.to_string()))
}

/// A body is an error code only when it is `-` followed exclusively by
/// ASCII digits; anything else, including unsigned numeric strings, is a
/// valid token. The reported code is the negation of the body's value.
fn parse_error_code(body: &str) -> Option<i64> {
    let digits = body.strip_prefix('-')?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse::<i64>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_integer_body_is_a_service_error() {
        let err = classify_response("-9").unwrap_err();
        assert!(matches!(err, UploadError::ServiceError(9)));

        let err = classify_response("-12345").unwrap_err();
        assert!(matches!(err, UploadError::ServiceError(12345)));
    }

    #[test]
    fn token_bodies_pass_through() {
        assert_eq!(
            classify_response("abcDEF").unwrap(),
            Some("abcDEF".to_string())
        );
        // unsigned numeric tokens are valid
        assert_eq!(classify_response("123").unwrap(), Some("123".to_string()));
        // a minus sign followed by non-digits is a token, not an error
        assert_eq!(
            classify_response("-12x").unwrap(),
            Some("-12x".to_string())
        );
        assert_eq!(classify_response("-").unwrap(), Some("-".to_string()));
    }

    #[test]
    fn empty_body_is_no_token() {
        assert_eq!(classify_response("").unwrap(), None);
    }
}
