//! Encrypted credential envelope.
//!
//! [`EncryptedSecret`] holds decoded bytes and can only be built with correctly
//! sized IV, tag and salt. [`EncodedSecret`] is the at-rest form: four base64
//! strings stored side by side in the credential table.

use super::error::CipherError;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::{Deserialize, Serialize};

/// IV size in bytes (128 bits)
pub const IV_SIZE: usize = 16;

/// Authentication tag size in bytes (128 bits)
pub const TAG_SIZE: usize = 16;

/// KDF salt size in bytes (256 bits)
pub const SALT_SIZE: usize = 32;

/// One encrypted credential with its per-call IV, tag and salt.
#[derive(Clone, PartialEq, Eq)]
pub struct EncryptedSecret {
    ciphertext: Vec<u8>,
    iv: [u8; IV_SIZE],
    auth_tag: [u8; TAG_SIZE],
    salt: [u8; SALT_SIZE],
}

impl EncryptedSecret {
    /// Builds an envelope from raw parts, checking every length.
    ///
    /// # Returns
    /// * `Err(MissingFields)` - If the ciphertext is empty
    /// * `Err(InvalidLength)` - If the IV, tag or salt has the wrong size
    pub fn new(
        ciphertext: Vec<u8>,
        iv: &[u8],
        auth_tag: &[u8],
        salt: &[u8],
    ) -> Result<Self, CipherError> {
        if ciphertext.is_empty() {
            return Err(CipherError::MissingFields);
        }

        Ok(Self {
            ciphertext,
            iv: fixed::<IV_SIZE>("iv", iv)?,
            auth_tag: fixed::<TAG_SIZE>("authTag", auth_tag)?,
            salt: fixed::<SALT_SIZE>("salt", salt)?,
        })
    }

    /// Decodes the at-rest form.
    ///
    /// Presence is checked for all four fields before any of them is decoded, so
    /// a record with a blank field always reports `MissingFields`.
    pub fn from_encoded(encoded: &EncodedSecret) -> Result<Self, CipherError> {
        let fields = [
            &encoded.ciphertext,
            &encoded.iv,
            &encoded.auth_tag,
            &encoded.salt,
        ];
        if fields.iter().any(|f| f.trim().is_empty()) {
            return Err(CipherError::MissingFields);
        }

        let ciphertext = decode("ciphertext", &encoded.ciphertext)?;
        let iv = decode("iv", &encoded.iv)?;
        let auth_tag = decode("authTag", &encoded.auth_tag)?;
        let salt = decode("salt", &encoded.salt)?;

        Self::new(ciphertext, &iv, &auth_tag, &salt)
    }

    /// Encodes every field independently for storage.
    pub fn encode(&self) -> EncodedSecret {
        EncodedSecret {
            ciphertext: BASE64.encode(&self.ciphertext),
            iv: BASE64.encode(self.iv),
            auth_tag: BASE64.encode(self.auth_tag),
            salt: BASE64.encode(self.salt),
        }
    }

    pub fn ciphertext(&self) -> &[u8] {
        &self.ciphertext
    }

    pub fn iv(&self) -> &[u8; IV_SIZE] {
        &self.iv
    }

    pub fn auth_tag(&self) -> &[u8; TAG_SIZE] {
        &self.auth_tag
    }

    pub fn salt(&self) -> &[u8; SALT_SIZE] {
        &self.salt
    }
}

impl std::fmt::Debug for EncryptedSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptedSecret")
            .field("ciphertext_len", &self.ciphertext.len())
            .finish_non_exhaustive()
    }
}

/// Base64 form of an [`EncryptedSecret`], as stored and transported.
///
/// Fields absent from a JSON document deserialize as empty strings and are
/// rejected by [`EncryptedSecret::from_encoded`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncodedSecret {
    #[serde(default)]
    pub ciphertext: String,
    #[serde(default)]
    pub iv: String,
    #[serde(default)]
    pub auth_tag: String,
    #[serde(default)]
    pub salt: String,
}

fn decode(field: &'static str, value: &str) -> Result<Vec<u8>, CipherError> {
    BASE64
        .decode(value.trim())
        .map_err(|_| CipherError::InvalidEncoding { field })
}

fn fixed<const N: usize>(field: &'static str, bytes: &[u8]) -> Result<[u8; N], CipherError> {
    bytes.try_into().map_err(|_| CipherError::InvalidLength {
        field,
        expected: N,
        actual: bytes.len(),
    })
}
