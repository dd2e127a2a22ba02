//! File key material and wire-key packing

use aes::Aes128;
use aes::cipher::{BlockEncrypt, KeyInit};
use rand::RngCore;

use crate::uploader::error::{UploadError, UploadResult};

/// AES-128 content key length in bytes
pub const CONTENT_KEY_LEN: usize = 16;
/// Counter/MAC nonce length in bytes
pub const NONCE_LEN: usize = 8;
/// Raw key material length (content key + nonce)
pub const KEY_MATERIAL_LEN: usize = CONTENT_KEY_LEN + NONCE_LEN;
/// Packed wire key length in bytes
pub const WIRE_KEY_LEN: usize = 32;

/// Per-upload key material: the AES-128 content key that drives both the
/// CTR stream and the CBC-MAC, and the 8-byte nonce that seeds the counter
/// prefix and the MAC IV.
#[derive(Clone, PartialEq, Eq)]
pub struct FileKeyMaterial {
    content_key: [u8; CONTENT_KEY_LEN],
    nonce: [u8; NONCE_LEN],
}

impl FileKeyMaterial {
    /// Generate fresh random key material for a new upload
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_MATERIAL_LEN];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self::from_bytes(&bytes)
    }

    /// Build key material from a 24-byte buffer (content key first, then nonce)
    pub fn from_bytes(bytes: &[u8; KEY_MATERIAL_LEN]) -> Self {
        let mut content_key = [0u8; CONTENT_KEY_LEN];
        let mut nonce = [0u8; NONCE_LEN];
        content_key.copy_from_slice(&bytes[..CONTENT_KEY_LEN]);
        nonce.copy_from_slice(&bytes[CONTENT_KEY_LEN..]);
        Self { content_key, nonce }
    }

    /// Build key material from a caller-supplied slice, validating its length
    pub fn from_slice(bytes: &[u8]) -> UploadResult<Self> {
        if bytes.len() != KEY_MATERIAL_LEN {
            return Err(UploadError::EncryptionError(format!(
                "Invalid key material length: expected {}, got {}",
                KEY_MATERIAL_LEN,
                bytes.len()
            )));
        }
        let mut buf = [0u8; KEY_MATERIAL_LEN];
        buf.copy_from_slice(bytes);
        Ok(Self::from_bytes(&buf))
    }

    /// The AES-128 content key
    pub fn content_key(&self) -> &[u8; CONTENT_KEY_LEN] {
        &self.content_key
    }

    /// The 8-byte nonce
    pub fn nonce(&self) -> &[u8; NONCE_LEN] {
        &self.nonce
    }

    /// Initial CBC-MAC value: the nonce repeated into a full AES block
    pub fn initial_mac_iv(&self) -> [u8; 16] {
        let mut iv = [0u8; 16];
        iv[..NONCE_LEN].copy_from_slice(&self.nonce);
        iv[NONCE_LEN..].copy_from_slice(&self.nonce);
        iv
    }

    /// Initial CTR block: the nonce prefix followed by a zero 64-bit counter
    pub fn initial_ctr_block(&self) -> [u8; 16] {
        let mut block = [0u8; 16];
        block[..NONCE_LEN].copy_from_slice(&self.nonce);
        block
    }
}

impl std::fmt::Debug for FileKeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Key bytes stay out of logs
        f.debug_struct("FileKeyMaterial").finish_non_exhaustive()
    }
}

/// The 32-byte key published alongside the node: the content key XOR-folded
/// with the nonce and meta-MAC in its first half, and the nonce and meta-MAC
/// verbatim in its second half.
#[derive(Clone, PartialEq, Eq)]
pub struct WireKey([u8; WIRE_KEY_LEN]);

impl WireKey {
    /// Pack key material and the finalized meta-MAC into the wire layout
    pub fn pack(key: &FileKeyMaterial, meta_mac: &[u8; 8]) -> Self {
        let mut out = [0u8; WIRE_KEY_LEN];
        out[16..24].copy_from_slice(key.nonce());
        out[24..32].copy_from_slice(meta_mac);
        for i in 0..16 {
            out[i] = key.content_key()[i] ^ out[16 + i];
        }
        Self(out)
    }

    /// View the raw 32 bytes
    pub fn as_bytes(&self) -> &[u8; WIRE_KEY_LEN] {
        &self.0
    }

    /// Recover the content key by undoing the XOR fold
    pub fn content_key(&self) -> [u8; CONTENT_KEY_LEN] {
        let mut key = [0u8; CONTENT_KEY_LEN];
        for i in 0..CONTENT_KEY_LEN {
            key[i] = self.0[i] ^ self.0[16 + i];
        }
        key
    }

    /// The nonce carried verbatim in words 4-5
    pub fn nonce(&self) -> [u8; NONCE_LEN] {
        let mut nonce = [0u8; NONCE_LEN];
        nonce.copy_from_slice(&self.0[16..24]);
        nonce
    }

    /// The meta-MAC carried verbatim in words 6-7
    pub fn meta_mac(&self) -> [u8; 8] {
        let mut mac = [0u8; 8];
        mac.copy_from_slice(&self.0[24..32]);
        mac
    }

    /// Derive the 16-byte attribute key by folding the two halves together
    pub fn attribute_key(&self) -> [u8; 16] {
        let mut key = [0u8; 16];
        for i in 0..16 {
            key[i] = self.0[i] ^ self.0[16 + i];
        }
        key
    }

    /// ECB-encrypt the wire key under the session master key for transit
    pub fn encrypt_for_transit(&self, master_key: &[u8; 16]) -> [u8; WIRE_KEY_LEN] {
        let cipher = Aes128::new(&(*master_key).into());
        let mut out = self.0;
        for block in out.chunks_exact_mut(16) {
            let block: &mut [u8; 16] = block.try_into().expect("exact 16-byte block");
            cipher.encrypt_block(block.into());
        }
        out
    }
}

impl std::fmt::Debug for WireKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WireKey").finish_non_exhaustive()
    }
}

/// Encrypt one AES block in place under `key` (ECB, single block)
pub(crate) fn aes128_encrypt_block(key: &[u8; 16], block: &mut [u8; 16]) {
    let cipher = Aes128::new(&(*key).into());
    cipher.encrypt_block(block.into());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed_key() -> FileKeyMaterial {
        let mut bytes = [0u8; KEY_MATERIAL_LEN];
        for (i, b) in bytes.iter_mut().enumerate() {
            *b = i as u8;
        }
        FileKeyMaterial::from_bytes(&bytes)
    }

    #[test]
    fn key_material_split() {
        let key = fixed_key();
        assert_eq!(key.content_key()[0], 0);
        assert_eq!(key.content_key()[15], 15);
        assert_eq!(key.nonce(), &[16, 17, 18, 19, 20, 21, 22, 23]);
    }

    #[test]
    fn mac_iv_repeats_nonce() {
        let key = fixed_key();
        let iv = key.initial_mac_iv();
        assert_eq!(&iv[..8], key.nonce());
        assert_eq!(&iv[8..], key.nonce());
    }

    #[test]
    fn ctr_block_starts_at_zero() {
        let key = fixed_key();
        let block = key.initial_ctr_block();
        assert_eq!(&block[..8], key.nonce());
        assert_eq!(&block[8..], &[0u8; 8]);
    }

    #[test]
    fn from_slice_rejects_bad_length() {
        assert!(FileKeyMaterial::from_slice(&[0u8; 16]).is_err());
        assert!(FileKeyMaterial::from_slice(&[0u8; 24]).is_ok());
    }

    #[test]
    fn wire_key_layout() {
        let key = fixed_key();
        let meta_mac = [0xa0, 0xa1, 0xa2, 0xa3, 0xa4, 0xa5, 0xa6, 0xa7];
        let wire = WireKey::pack(&key, &meta_mac);

        assert_eq!(wire.nonce(), *key.nonce());
        assert_eq!(wire.meta_mac(), meta_mac);
        assert_eq!(wire.content_key(), *key.content_key());

        // first half is the content key folded with nonce || meta-MAC
        for i in 0..8 {
            assert_eq!(wire.as_bytes()[i], key.content_key()[i] ^ key.nonce()[i]);
            assert_eq!(wire.as_bytes()[8 + i], key.content_key()[8 + i] ^ meta_mac[i]);
        }
    }

    #[test]
    fn attribute_key_folds_halves() {
        let key = fixed_key();
        let wire = WireKey::pack(&key, &[0u8; 8]);
        let attr_key = wire.attribute_key();
        for i in 0..16 {
            assert_eq!(attr_key[i], wire.as_bytes()[i] ^ wire.as_bytes()[16 + i]);
        }
        // folding undoes the pack XOR, so the attribute key is the content key
        assert_eq!(attr_key, wire.content_key());
    }

    #[test]
    fn transit_encryption_round_trip() {
        use aes::Aes128;
        use aes::cipher::{BlockDecrypt, KeyInit};

        let key = fixed_key();
        let wire = WireKey::pack(&key, &[7u8; 8]);
        let master_key = [0x42u8; 16];

        let mut encrypted = wire.encrypt_for_transit(&master_key);
        assert_ne!(&encrypted, wire.as_bytes());

        let cipher = Aes128::new(&master_key.into());
        for block in encrypted.chunks_exact_mut(16) {
            let block: &mut [u8; 16] = block.try_into().unwrap();
            cipher.decrypt_block(block.into());
        }
        assert_eq!(&encrypted, wire.as_bytes());
    }
}
