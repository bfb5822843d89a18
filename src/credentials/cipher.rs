//! AES-256-GCM encryption for stored API keys, keyed per call through scrypt.
//!
//! The master key never touches data directly. Every `encrypt` call draws a fresh
//! 32-byte salt and 16-byte IV, derives a one-off key from `(master key, salt)`
//! with scrypt (N=16384, r=8, p=1), and seals the credential with that key. Two
//! encryptions of the same plaintext are therefore unlinkable.
//!
//! Key derivation is deliberately expensive (tens of milliseconds, ~16 MiB).
//! Async callers go through [`SecretCipher::run_blocking`], which caps how many
//! derivations run at once so memory stays bounded under load. Derived keys are
//! never cached.

use super::error::CipherError;
use super::secret::{EncodedSecret, EncryptedSecret, IV_SIZE, SALT_SIZE};
use aes_gcm::{
    aead::{consts::U16, AeadInPlace, KeyInit},
    aes::Aes256,
    AesGcm, Nonce, Tag,
};
use anyhow::Context;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rand::{rngs::OsRng, RngCore};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, warn};
use zeroize::{Zeroize, Zeroizing};

/// AES-256-GCM with a 128-bit IV.
type CredentialAead = AesGcm<Aes256, U16>;

/// Size of the master key and of every derived key in bytes (256 bits)
pub const KEY_SIZE: usize = 32;

/// scrypt cost: log2(N) = 14, i.e. N = 16384
const KDF_LOG_N: u8 = 14;
const KDF_R: u32 = 8;
const KDF_P: u32 = 1;

/// Blocking KDF jobs allowed at once unless configured otherwise
pub const DEFAULT_MAX_CONCURRENT_KDF: usize = 4;

const MASK_PLACEHOLDER: &str = "****";
const MASK_MIN_LEN: usize = 8;

const SELF_CHECK_PLAINTEXT: &str = "credvault-self-check";

/// The 32-byte process master key. Zeroed on drop.
pub struct MasterKey(Zeroizing<[u8; KEY_SIZE]>);

impl MasterKey {
    /// Decodes a base64 master key.
    ///
    /// # Returns
    /// * `Err(MasterKeyMissing)` - Empty or whitespace-only input
    /// * `Err(InvalidKeyFormat)` - Not valid base64
    /// * `Err(InvalidKeyLength)` - Decodes to anything but 32 bytes
    pub fn from_base64(encoded: &str) -> Result<Self, CipherError> {
        let encoded = encoded.trim();
        if encoded.is_empty() {
            return Err(CipherError::MasterKeyMissing);
        }

        let mut bytes = BASE64
            .decode(encoded)
            .map_err(|_| CipherError::InvalidKeyFormat)?;

        let key = match <[u8; KEY_SIZE]>::try_from(bytes.as_slice()) {
            Ok(key) => Ok(Self(Zeroizing::new(key))),
            Err(_) => Err(CipherError::InvalidKeyLength {
                actual: bytes.len(),
            }),
        };
        bytes.zeroize();
        key
    }

    /// Reads the master key from an environment variable. Unset counts as missing.
    pub fn from_env(var: &str) -> Result<Self, CipherError> {
        match std::env::var(var) {
            Ok(value) => Self::from_base64(&value),
            Err(_) => Err(CipherError::MasterKeyMissing),
        }
    }

    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(Zeroizing::new(bytes))
    }

    fn as_bytes(&self) -> &[u8] {
        self.0.as_slice()
    }
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("MasterKey(..)")
    }
}

/// Authenticated encryption of single credential strings under one master key.
///
/// Immutable after construction and safe to share across threads.
pub struct SecretCipher {
    master_key: MasterKey,
    kdf_slots: Arc<Semaphore>,
    max_concurrent_kdf: usize,
}

impl SecretCipher {
    pub fn new(master_key: MasterKey) -> Self {
        Self {
            master_key,
            kdf_slots: Arc::new(Semaphore::new(DEFAULT_MAX_CONCURRENT_KDF)),
            max_concurrent_kdf: DEFAULT_MAX_CONCURRENT_KDF,
        }
    }

    /// Caps concurrent [`run_blocking`](Self::run_blocking) jobs. Zero is treated as one.
    pub fn with_max_concurrent_kdf(mut self, max: usize) -> Self {
        let max = max.max(1);
        self.kdf_slots = Arc::new(Semaphore::new(max));
        self.max_concurrent_kdf = max;
        self
    }

    pub fn max_concurrent_kdf(&self) -> usize {
        self.max_concurrent_kdf
    }

    /// Free KDF slots right now.
    pub fn available_kdf_slots(&self) -> usize {
        self.kdf_slots.available_permits()
    }

    /// Runs KDF-bound work on a blocking thread once a slot is free.
    ///
    /// Callers beyond the limit wait here instead of piling onto the blocking
    /// pool. The slot is released when `work` returns, even if the caller has
    /// stopped waiting for it.
    pub async fn run_blocking<T, F>(&self, work: F) -> anyhow::Result<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let permit = Arc::clone(&self.kdf_slots)
            .acquire_owned()
            .await
            .context("KDF limiter closed")?;

        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            work()
        })
        .await
        .context("KDF task failed")
    }

    /// Builds a cipher straight from the configured base64 value.
    ///
    /// Any error here is a configuration error and must stop startup.
    pub fn from_base64(encoded: &str) -> Result<Self, CipherError> {
        MasterKey::from_base64(encoded).map(Self::new)
    }

    /// Encrypts a credential under a freshly derived key.
    ///
    /// # Returns
    /// * `Ok(EncryptedSecret)` - Ciphertext plus the IV, tag and salt used
    /// * `Err(EmptyCredential)` - If the input is empty or whitespace only
    pub fn encrypt(&self, plaintext: &str) -> Result<EncryptedSecret, CipherError> {
        if plaintext.trim().is_empty() {
            return Err(CipherError::EmptyCredential);
        }

        let mut salt = [0u8; SALT_SIZE];
        let mut iv = [0u8; IV_SIZE];
        OsRng.fill_bytes(&mut salt);
        OsRng.fill_bytes(&mut iv);

        let key = self
            .derive_key(&salt)
            .ok_or(CipherError::EncryptionFailed)?;
        let cipher = CredentialAead::new_from_slice(key.as_slice())
            .map_err(|_| CipherError::EncryptionFailed)?;

        let mut buffer = plaintext.as_bytes().to_vec();
        let tag = cipher
            .encrypt_in_place_detached(Nonce::<U16>::from_slice(&iv), b"", &mut buffer)
            .map_err(|_| CipherError::EncryptionFailed)?;

        EncryptedSecret::new(buffer, &iv, tag.as_slice(), &salt)
    }

    /// Decrypts a credential.
    ///
    /// Wrong master key, any tampered field and fields mixed from different
    /// records all fail with the same `DecryptionFailed`.
    pub fn decrypt(&self, secret: &EncryptedSecret) -> Result<String, CipherError> {
        let key = self
            .derive_key(secret.salt())
            .ok_or(CipherError::DecryptionFailed)?;
        let cipher = CredentialAead::new_from_slice(key.as_slice())
            .map_err(|_| CipherError::DecryptionFailed)?;

        let mut buffer = secret.ciphertext().to_vec();
        if cipher
            .decrypt_in_place_detached(
                Nonce::<U16>::from_slice(secret.iv()),
                b"",
                &mut buffer,
                Tag::from_slice(secret.auth_tag()),
            )
            .is_err()
        {
            return Err(CipherError::DecryptionFailed);
        }

        String::from_utf8(buffer).map_err(|e| {
            e.into_bytes().zeroize();
            CipherError::DecryptionFailed
        })
    }

    /// Validates the at-rest form, then decrypts it.
    ///
    /// Missing or mis-sized fields are validation errors and are reported before
    /// any key derivation happens.
    pub fn decrypt_encoded(&self, encoded: &EncodedSecret) -> Result<String, CipherError> {
        let secret = EncryptedSecret::from_encoded(encoded)?;
        self.decrypt(&secret)
    }

    /// Round-trips a fixed literal. Used as a startup and health probe.
    pub fn test_encryption(&self) -> bool {
        let result = self
            .encrypt(SELF_CHECK_PLAINTEXT)
            .and_then(|secret| self.decrypt(&secret));

        match result {
            Ok(decrypted) if decrypted == SELF_CHECK_PLAINTEXT => {
                debug!("Encryption self-check passed");
                true
            }
            Ok(_) => {
                warn!("Encryption self-check returned a different plaintext");
                false
            }
            Err(e) => {
                warn!(error = %e, "Encryption self-check failed");
                false
            }
        }
    }

    fn derive_key(&self, salt: &[u8]) -> Option<Zeroizing<[u8; KEY_SIZE]>> {
        let params = scrypt::Params::new(KDF_LOG_N, KDF_R, KDF_P, KEY_SIZE).ok()?;
        let mut key = Zeroizing::new([0u8; KEY_SIZE]);
        scrypt::scrypt(self.master_key.as_bytes(), salt, &params, &mut key[..]).ok()?;
        Some(key)
    }
}

impl std::fmt::Debug for SecretCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretCipher")
            .field("master_key", &self.master_key)
            .field("max_concurrent_kdf", &self.max_concurrent_kdf)
            .finish()
    }
}

/// Formats a credential for display: `"AIza...6789"`.
///
/// Inputs shorter than 8 characters become `"****"` so no part of a short
/// secret is revealed. Works on characters, not bytes.
pub fn mask_key(plaintext: &str) -> String {
    let chars: Vec<char> = plaintext.chars().collect();
    if chars.len() < MASK_MIN_LEN {
        return MASK_PLACEHOLDER.to_string();
    }

    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}...{}", head, tail)
}
