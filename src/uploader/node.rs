//! Node registration with encrypted attributes

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD as BASE64URL};
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::debug;

use crate::api::ApiClient;
use crate::uploader::error::{UploadError, UploadResult};
use crate::uploader::keys::WireKey;

type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;
type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;

/// Magic prefix carried in front of the attribute JSON
const ATTR_MAGIC: &[u8; 4] = b"MEGA";

/// Display names for the attribute label slots
pub const LABEL_NAMES: [&str; 8] = [
    "", "red", "orange", "yellow", "green", "blue", "purple", "grey",
];

/// Human-facing node attributes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileAttributes {
    /// Display name of the node
    pub name: String,
    /// Label slot 1-7 (0 or `None` means unlabelled)
    pub label: Option<u8>,
    /// Favorite marker
    pub favorite: bool,
}

/// Wire form of the attributes object
#[derive(Debug, Serialize, Deserialize)]
struct RawAttributes {
    n: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    lbl: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    fav: Option<u8>,
}

impl FileAttributes {
    /// Attributes carrying just a display name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            label: None,
            favorite: false,
        }
    }

    /// Set the label slot
    pub fn with_label(mut self, label: u8) -> Self {
        self.label = Some(label);
        self
    }

    /// Mark as favorite
    pub fn with_favorite(mut self) -> Self {
        self.favorite = true;
        self
    }

    /// Display name of the current label slot
    pub fn label_name(&self) -> &'static str {
        LABEL_NAMES[self.label.unwrap_or(0) as usize % LABEL_NAMES.len()]
    }

    fn to_raw(&self) -> RawAttributes {
        RawAttributes {
            n: self.name.clone(),
            lbl: self.label.filter(|&l| l != 0),
            fav: self.favorite.then_some(1),
        }
    }

    fn from_raw(raw: RawAttributes) -> Self {
        Self {
            name: raw.n,
            label: raw.lbl.filter(|&l| l != 0),
            favorite: raw.fav == Some(1),
        }
    }
}

/// Encrypt an attributes object under the 16-byte attribute key: the
/// MEGA-prefixed JSON is zero-padded to the AES block size and encrypted
/// with AES-128-CBC under a zero IV, then URL-safe base64 encoded.
pub fn encrypt_attributes(attributes: &FileAttributes, attr_key: &[u8; 16]) -> UploadResult<String> {
    let json = serde_json::to_string(&attributes.to_raw())
        .map_err(|e| UploadError::EncryptionError(format!("Attribute encoding failed: {}", e)))?;

    let mut buf = Vec::with_capacity(ATTR_MAGIC.len() + json.len() + 16);
    buf.extend_from_slice(ATTR_MAGIC);
    buf.extend_from_slice(json.as_bytes());
    let padding = (16 - buf.len() % 16) % 16;
    buf.resize(buf.len() + padding, 0);

    let mut cipher = Aes128CbcEnc::new(&(*attr_key).into(), &[0u8; 16].into());
    for block in buf.chunks_exact_mut(16) {
        let block: &mut [u8; 16] = block.try_into().expect("exact 16-byte block");
        cipher.encrypt_block_mut(block.into());
    }

    Ok(BASE64URL.encode(&buf))
}

/// Decrypt and unpack an encrypted attributes blob.
///
/// Rejects blobs that do not decrypt to the `MEGA{"` prefix or whose JSON
/// payload is malformed.
pub fn decrypt_attributes(blob_b64: &str, attr_key: &[u8; 16]) -> UploadResult<FileAttributes> {
    let mut buf = BASE64URL
        .decode(blob_b64)
        .map_err(|e| UploadError::EncryptionError(format!("Invalid attribute blob: {}", e)))?;
    if buf.is_empty() || buf.len() % 16 != 0 {
        return Err(UploadError::EncryptionError(
            "Attribute blob is not block-aligned".to_string(),
        ));
    }

    let mut cipher = Aes128CbcDec::new(&(*attr_key).into(), &[0u8; 16].into());
    for block in buf.chunks_exact_mut(16) {
        let block: &mut [u8; 16] = block.try_into().expect("exact 16-byte block");
        cipher.decrypt_block_mut(block.into());
    }

    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    let text = std::str::from_utf8(&buf[..end])
        .map_err(|_| UploadError::EncryptionError("Attributes are not UTF-8".to_string()))?;
    let json = text
        .strip_prefix("MEGA")
        .filter(|rest| rest.starts_with('{'))
        .ok_or_else(|| UploadError::EncryptionError("Attribute magic missing".to_string()))?;

    let raw: RawAttributes = serde_json::from_str(json)
        .map_err(|e| UploadError::EncryptionError(format!("Invalid attribute JSON: {}", e)))?;
    Ok(FileAttributes::from_raw(raw))
}

/// Builds and submits the node-creation request for an uploaded file.
pub struct NodeRegistrar<'a, A: ApiClient + ?Sized> {
    api: &'a A,
    master_key: [u8; 16],
}

impl<'a, A: ApiClient + ?Sized> NodeRegistrar<'a, A> {
    /// Create a registrar bound to the session's master key
    pub fn new(api: &'a A, master_key: [u8; 16]) -> Self {
        Self { api, master_key }
    }

    /// Register the uploaded object under `target_id`.
    ///
    /// Attributes are encrypted under the key folded out of the wire key;
    /// the wire key itself travels ECB-encrypted under the master key. The
    /// completion token becomes the node handle.
    pub async fn register(
        &self,
        token: &str,
        target_id: &str,
        wire_key: &WireKey,
        attributes: &FileAttributes,
    ) -> UploadResult<Value> {
        let attr_key = wire_key.attribute_key();
        let encrypted_attrs = encrypt_attributes(attributes, &attr_key)?;
        let encrypted_key = BASE64URL.encode(wire_key.encrypt_for_transit(&self.master_key));

        let payload = json!({
            "a": "p",
            "t": target_id,
            "n": [{
                "h": token,
                "t": 0,
                "a": encrypted_attrs,
                "k": encrypted_key,
            }],
        });

        debug!(
            target: "uploader::node",
            token,
            target = target_id,
            name = %attributes.name,
            "Creating node"
        );

        let response = self.api.request(payload).await?;
        if let Some(code) = response.as_i64() {
            return Err(UploadError::ServiceError(code.wrapping_abs()));
        }
        Ok(response)
    }
}
