//! Upload progress notifications

/// Snapshot of how far an upload has advanced.
///
/// Chunk POSTs finish in whatever order the network allows, so a snapshot
/// counts confirmed work rather than a contiguous frontier: `bytes_done`
/// can jump by a late-arriving early chunk while later offsets are already
/// on the server.
#[derive(Debug, Clone, Copy)]
pub struct ProgressUpdate {
    /// Bytes confirmed uploaded so far
    pub bytes_done: u64,
    /// Size of the source file
    pub bytes_total: u64,
    /// Chunks confirmed uploaded so far
    pub chunks_done: usize,
    /// Number of planned chunks
    pub chunks_total: usize,
    /// Index of the chunk whose completion produced this snapshot
    pub completed_chunk: u64,
}

impl ProgressUpdate {
    /// Completed fraction in `0.0..=1.0`. An empty file counts as done.
    pub fn fraction(&self) -> f64 {
        if self.bytes_total == 0 {
            1.0
        } else {
            self.bytes_done as f64 / self.bytes_total as f64
        }
    }

    /// Whether every planned chunk has been confirmed
    pub fn is_complete(&self) -> bool {
        self.chunks_done == self.chunks_total
    }
}

/// Receives one snapshot per completed chunk.
///
/// Callbacks run on the coordinator task between chunk completions and
/// should return quickly.
pub trait ProgressCallback: Send + Sync {
    /// Called after a chunk upload is confirmed
    fn on_progress(&self, update: ProgressUpdate);
}

/// Callback that discards every snapshot
pub struct NoOpProgress;

impl ProgressCallback for NoOpProgress {
    fn on_progress(&self, _update: ProgressUpdate) {}
}

/// Adapter turning a closure into a callback
pub struct FnProgress<F>(pub F);

impl<F> ProgressCallback for FnProgress<F>
where
    F: Fn(ProgressUpdate) + Send + Sync,
{
    fn on_progress(&self, update: ProgressUpdate) {
        (self.0)(update)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(bytes_done: u64, bytes_total: u64, chunks_done: usize) -> ProgressUpdate {
        ProgressUpdate {
            bytes_done,
            bytes_total,
            chunks_done,
            chunks_total: 4,
            completed_chunk: 0,
        }
    }

    #[test]
    fn fraction_tracks_bytes() {
        assert_eq!(snapshot(0, 200, 0).fraction(), 0.0);
        assert_eq!(snapshot(50, 200, 1).fraction(), 0.25);
        assert_eq!(snapshot(200, 200, 4).fraction(), 1.0);
    }

    #[test]
    fn empty_file_reads_as_done() {
        let update = snapshot(0, 0, 0);
        assert_eq!(update.fraction(), 1.0);
    }

    #[test]
    fn completion_follows_chunk_count() {
        assert!(!snapshot(100, 200, 2).is_complete());
        assert!(snapshot(200, 200, 4).is_complete());
    }

    #[test]
    fn closure_adapter_forwards_snapshots() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let seen = AtomicUsize::new(0);
        let callback = FnProgress(|update: ProgressUpdate| {
            seen.fetch_add(update.chunks_done, Ordering::SeqCst);
        });
        callback.on_progress(snapshot(50, 200, 3));
        assert_eq!(seen.load(Ordering::SeqCst), 3);
    }
}
