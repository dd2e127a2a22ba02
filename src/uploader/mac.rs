//! Chunk CBC-MAC pipeline and meta-MAC folding

use aes::Aes128;
use aes::cipher::{BlockEncrypt, KeyInit};
use bytes::Bytes;
use std::sync::mpsc;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::uploader::error::{UploadError, UploadResult};
use crate::uploader::keys::FileKeyMaterial;

const BLOCK_LEN: usize = 16;

/// Work items for the MAC worker. Closing the queue is the implicit
/// shutdown sentinel; `Finish` additionally reports drain completion.
enum MacJob {
    Chunk(Bytes),
    Finish(oneshot::Sender<()>),
}

/// Cloneable submission side of the MAC queue
#[derive(Clone)]
pub struct MacHandle {
    tx: mpsc::Sender<MacJob>,
}

impl MacHandle {
    /// Queue a chunk's plaintext for MAC processing. Never blocks; the
    /// queue is unbounded and drained by the dedicated worker. Submission
    /// order defines folding order.
    pub fn submit(&self, plaintext: Bytes) -> UploadResult<()> {
        self.tx
            .send(MacJob::Chunk(plaintext))
            .map_err(|_| UploadError::EncryptionError("MAC worker exited early".to_string()))
    }
}

/// Integrity pipeline for one upload: a dedicated worker thread computes a
/// CBC-MAC per chunk and folds it into the shared accumulator, which the
/// coordinator condenses into the 8-byte meta-MAC at end-of-stream.
pub struct MacEngine {
    tx: Option<mpsc::Sender<MacJob>>,
    worker: Option<thread::JoinHandle<()>>,
    accumulator: Arc<Mutex<[u8; BLOCK_LEN]>>,
}

impl MacEngine {
    /// Start the worker thread for an upload keyed by `key`
    pub fn spawn(key: &FileKeyMaterial) -> Self {
        let accumulator = Arc::new(Mutex::new([0u8; BLOCK_LEN]));
        let (tx, rx) = mpsc::channel();

        let content_key = *key.content_key();
        let mac_iv = key.initial_mac_iv();
        let acc = accumulator.clone();
        let worker = thread::Builder::new()
            .name("mac-worker".to_string())
            .spawn(move || worker_loop(rx, content_key, mac_iv, acc))
            .expect("Failed to spawn MAC worker");

        Self {
            tx: Some(tx),
            worker: Some(worker),
            accumulator,
        }
    }

    /// Get a cloneable handle for submitting chunks
    pub fn handle(&self) -> UploadResult<MacHandle> {
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| UploadError::EncryptionError("MAC engine already finalized".to_string()))?
            .clone();
        Ok(MacHandle { tx })
    }

    /// Signal end-of-stream and wait for the queue to drain.
    ///
    /// Returns the meta-MAC once every submitted chunk has been folded. If
    /// the worker does not drain within `timeout` the accumulator is only
    /// partial, which is reported as an integrity failure rather than a
    /// usable tag.
    pub async fn finalize(&mut self, timeout: Duration) -> UploadResult<[u8; 8]> {
        let tx = self
            .tx
            .take()
            .ok_or_else(|| UploadError::EncryptionError("MAC engine already finalized".to_string()))?;

        let (done_tx, done_rx) = oneshot::channel();
        tx.send(MacJob::Finish(done_tx))
            .map_err(|_| UploadError::EncryptionError("MAC worker exited early".to_string()))?;
        drop(tx);

        match tokio::time::timeout(timeout, done_rx).await {
            Ok(Ok(())) => {
                if let Some(worker) = self.worker.take() {
                    let _ = worker.join();
                }
                let meta_mac = self.meta_mac();
                debug!(
                    target: "uploader::mac",
                    meta_mac = %format_args!("{:016x}", u64::from_be_bytes(meta_mac)),
                    "MAC stream drained"
                );
                Ok(meta_mac)
            }
            Ok(Err(_)) => Err(UploadError::EncryptionError(
                "MAC worker exited without draining".to_string(),
            )),
            Err(_) => {
                warn!(
                    target: "uploader::mac",
                    partial_tag = %format_args!("{:016x}", u64::from_be_bytes(self.meta_mac())),
                    timeout_ms = timeout.as_millis(),
                    "MAC drain timed out; integrity tag is partial"
                );
                Err(UploadError::IntegrityError)
            }
        }
    }

    /// Condense the current accumulator into the 8-byte meta-MAC
    fn meta_mac(&self) -> [u8; 8] {
        let acc = self
            .accumulator
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        fold_meta_mac(&acc)
    }
}

impl Drop for MacEngine {
    fn drop(&mut self) {
        // closing the queue is the shutdown sentinel; the worker drains
        // whatever is left and exits, and the join keeps it from leaking
        self.tx.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn worker_loop(
    rx: mpsc::Receiver<MacJob>,
    content_key: [u8; 16],
    mac_iv: [u8; BLOCK_LEN],
    accumulator: Arc<Mutex<[u8; BLOCK_LEN]>>,
) {
    let cipher = Aes128::new(&content_key.into());

    while let Ok(job) = rx.recv() {
        match job {
            MacJob::Chunk(plaintext) => {
                let mac = chunk_mac(&cipher, &mac_iv, &plaintext);
                let mut acc = accumulator.lock().unwrap_or_else(PoisonError::into_inner);
                xor_into(&mut acc, &mac);
                cipher.encrypt_block((&mut *acc).into());
            }
            MacJob::Finish(done) => {
                let _ = done.send(());
                return;
            }
        }
    }
}

/// CBC-MAC over one chunk's plaintext: starting from the nonce-derived IV,
/// each 16-byte block is XORed in and passed through AES-ECB. The final
/// partial block carries its data first and is zero-extended.
fn chunk_mac(cipher: &Aes128, mac_iv: &[u8; BLOCK_LEN], plaintext: &[u8]) -> [u8; BLOCK_LEN] {
    let mut mac = *mac_iv;

    let mut blocks = plaintext.chunks_exact(BLOCK_LEN);
    for block in blocks.by_ref() {
        xor_into(&mut mac, block);
        cipher.encrypt_block((&mut mac).into());
    }

    let remainder = blocks.remainder();
    if !remainder.is_empty() {
        let mut last = [0u8; BLOCK_LEN];
        last[..remainder.len()].copy_from_slice(remainder);
        xor_into(&mut mac, &last);
        cipher.encrypt_block((&mut mac).into());
    }

    mac
}

/// Fold the 16-byte accumulator into the 8-byte meta-MAC: with the
/// accumulator as big-endian words w0..w3, the tag is w0^w1 || w2^w3.
pub(crate) fn fold_meta_mac(accumulator: &[u8; BLOCK_LEN]) -> [u8; 8] {
    let mut out = [0u8; 8];
    for i in 0..4 {
        out[i] = accumulator[i] ^ accumulator[4 + i];
        out[4 + i] = accumulator[8 + i] ^ accumulator[12 + i];
    }
    out
}

fn xor_into(target: &mut [u8; BLOCK_LEN], source: &[u8]) {
    for (t, s) in target.iter_mut().zip(source) {
        *t ^= s;
    }
}
