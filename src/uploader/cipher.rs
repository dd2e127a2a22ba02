//! Per-upload AES-CTR stream state

use aes::Aes128;
use aes::cipher::{KeyIvInit, StreamCipher};
use bytes::{Bytes, BytesMut};
use ctr::Ctr128BE;

use crate::uploader::error::{UploadError, UploadResult};
use crate::uploader::keys::FileKeyMaterial;

type Aes128Ctr = Ctr128BE<Aes128>;

/// Counter-mode stream for one upload.
///
/// The counter block is the 8-byte nonce followed by a big-endian 64-bit
/// counter starting at zero, and there is a single keystream for the whole
/// file: encrypting chunk K continues exactly where chunk K-1 ended. Chunks
/// must therefore arrive in index order with no gaps.
pub struct StreamEncryptor {
    cipher: Aes128Ctr,
    next_index: u64,
}

impl StreamEncryptor {
    /// Start a fresh keystream at counter zero
    pub fn new(key: &FileKeyMaterial) -> Self {
        let iv = key.initial_ctr_block();
        Self {
            cipher: Aes128Ctr::new(&(*key.content_key()).into(), &iv.into()),
            next_index: 0,
        }
    }

    /// Encrypt the next chunk in file order.
    ///
    /// Rejects any index other than the next expected one; the keystream is
    /// untouched when that happens.
    pub fn encrypt(&mut self, index: u64, plaintext: &[u8]) -> UploadResult<Bytes> {
        if index != self.next_index {
            return Err(UploadError::OutOfOrderChunk {
                expected: self.next_index,
                actual: index,
            });
        }

        let mut buf = BytesMut::from(plaintext);
        self.cipher.apply_keystream(&mut buf);
        self.next_index += 1;
        Ok(buf.freeze())
    }

    /// Number of chunks encrypted so far
    pub fn chunks_encrypted(&self) -> u64 {
        self.next_index
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::uploader::keys::KEY_MATERIAL_LEN;

    fn fixed_key() -> FileKeyMaterial {
        let mut bytes = [0u8; KEY_MATERIAL_LEN];
        for (i, b) in bytes.iter_mut().enumerate() {
            *b = (i * 7 + 3) as u8;
        }
        FileKeyMaterial::from_bytes(&bytes)
    }

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 31 + 11) as u8).collect()
    }

    #[test]
    fn chunked_stream_matches_whole_buffer() {
        let key = fixed_key();
        // uneven sizes, including a non-block-aligned tail
        let sizes = [16usize, 48, 7];
        let total: usize = sizes.iter().sum();
        let plaintext = pattern(total);

        let mut whole = plaintext.clone();
        let mut one_shot = Aes128Ctr::new(
            &(*key.content_key()).into(),
            &key.initial_ctr_block().into(),
        );
        one_shot.apply_keystream(&mut whole);

        let mut encryptor = StreamEncryptor::new(&key);
        let mut chunked = Vec::new();
        let mut offset = 0;
        for (index, size) in sizes.iter().enumerate() {
            let chunk = &plaintext[offset..offset + size];
            chunked.extend_from_slice(&encryptor.encrypt(index as u64, chunk).unwrap());
            offset += size;
        }

        assert_eq!(chunked, whole);
        assert_eq!(encryptor.chunks_encrypted(), sizes.len() as u64);
    }

    #[test]
    fn decrypting_recovers_plaintext() {
        let key = fixed_key();
        let plaintext = pattern(1000);

        let mut encryptor = StreamEncryptor::new(&key);
        let ciphertext = encryptor.encrypt(0, &plaintext).unwrap();
        assert_ne!(&ciphertext[..], &plaintext[..]);

        // CTR is symmetric
        let mut decryptor = StreamEncryptor::new(&key);
        let recovered = decryptor.encrypt(0, &ciphertext).unwrap();
        assert_eq!(&recovered[..], &plaintext[..]);
    }

    #[test]
    fn rejects_out_of_order_chunks() {
        let key = fixed_key();
        let mut encryptor = StreamEncryptor::new(&key);
        encryptor.encrypt(0, &[0u8; 16]).unwrap();

        let err = encryptor.encrypt(2, &[0u8; 16]).unwrap_err();
        assert!(matches!(
            err,
            UploadError::OutOfOrderChunk {
                expected: 1,
                actual: 2
            }
        ));

        // the stream is still usable at the expected index
        encryptor.encrypt(1, &[0u8; 16]).unwrap();
    }

    #[test]
    fn rejects_replayed_chunks() {
        let key = fixed_key();
        let mut encryptor = StreamEncryptor::new(&key);
        encryptor.encrypt(0, &[0u8; 32]).unwrap();
        assert!(encryptor.encrypt(0, &[0u8; 32]).is_err());
    }
}
