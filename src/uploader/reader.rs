//! Byte-range reads from the source file

use bytes::{Bytes, BytesMut};
use std::io::SeekFrom;
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use crate::uploader::error::{UploadError, UploadResult};

/// Read exactly the bytes `[start, end)` of `path`.
///
/// The planner never emits a range past the size observed at validation, so
/// a short read means the file shrank underneath the upload and is reported
/// as a read failure. The file handle is scoped to this call and released on
/// every exit path.
pub async fn read_chunk(path: &Path, start: u64, end: u64) -> UploadResult<Bytes> {
    debug_assert!(start <= end);

    let mut file = File::open(path)
        .await
        .map_err(|e| UploadError::FileReadError(format!("{}: {}", path.display(), e)))?;
    file.seek(SeekFrom::Start(start))
        .await
        .map_err(|e| UploadError::FileReadError(format!("seek to {}: {}", start, e)))?;

    let len = (end - start) as usize;
    let mut buf = BytesMut::zeroed(len);
    file.read_exact(&mut buf).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            UploadError::FileReadError(format!(
                "short read for range {}..{}: source file truncated",
                start, end
            ))
        } else {
            UploadError::FileReadError(format!("range {}..{}: {}", start, end, e))
        }
    })?;

    Ok(buf.freeze())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn reads_exact_range() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&(0u8..=255).collect::<Vec<u8>>()).unwrap();

        let bytes = read_chunk(file.path(), 10, 20).await.unwrap();
        assert_eq!(&bytes[..], &(10u8..20).collect::<Vec<u8>>()[..]);

        let whole = read_chunk(file.path(), 0, 256).await.unwrap();
        assert_eq!(whole.len(), 256);
    }

    #[tokio::test]
    async fn short_read_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"abc").unwrap();

        let err = read_chunk(file.path(), 0, 10).await.unwrap_err();
        assert!(matches!(err, UploadError::FileReadError(_)));
    }

    #[tokio::test]
    async fn missing_file_is_an_error() {
        let err = read_chunk(Path::new("/nonexistent/source"), 0, 1)
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::FileReadError(_)));
    }
}
