//! Errors raised by the secret cipher.

use crate::error::ErrorKind;
use thiserror::Error;

/// Cipher failures.
///
/// Every AEAD failure collapses into [`CipherError::DecryptionFailed`]. Telling a
/// bad tag apart from a bad key or a bad salt would hand callers a decryption
/// oracle, so the variant carries no detail at all.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CipherError {
    #[error("master key required")]
    MasterKeyMissing,

    #[error("invalid key format")]
    InvalidKeyFormat,

    #[error("key must be exactly 32 bytes")]
    InvalidKeyLength { actual: usize },

    #[error("credential cannot be empty")]
    EmptyCredential,

    #[error("missing required fields")]
    MissingFields,

    #[error("invalid {field} encoding")]
    InvalidEncoding { field: &'static str },

    #[error("invalid {field} length: expected {expected} bytes, got {actual}")]
    InvalidLength {
        field: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("encryption failed")]
    EncryptionFailed,

    #[error("decryption failed")]
    DecryptionFailed,
}

impl CipherError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CipherError::MasterKeyMissing
            | CipherError::InvalidKeyFormat
            | CipherError::InvalidKeyLength { .. } => ErrorKind::Configuration,
            CipherError::EmptyCredential
            | CipherError::MissingFields
            | CipherError::InvalidEncoding { .. }
            | CipherError::InvalidLength { .. } => ErrorKind::Validation,
            CipherError::EncryptionFailed | CipherError::DecryptionFailed => {
                ErrorKind::Cryptographic
            }
        }
    }
}
