//! Encrypted storage for user-supplied platform API keys.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │       CredentialStore                    │
//! │  - add / list / update / delete          │
//! │  - masked listings, no decryption        │
//! └─────────────────────────────────────────┘
//!          ↓                    ↑
//!    (encrypt)            (decrypt, resolver only)
//!          ↓                    ↑
//! ┌─────────────────────────────────────────┐
//! │       SecretCipher                       │
//! │  - scrypt per-call key (fresh salt)      │
//! │  - AES-256-GCM, 128-bit IV and tag       │
//! └─────────────────────────────────────────┘
//!          ↓                    ↑
//! ┌─────────────────────────────────────────┐
//! │       SQLite Database                    │
//! │  - ciphertext, iv, authTag, salt         │
//! │    stored as separate base64 columns     │
//! └─────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use credvault::credentials::{CredentialStore, MasterKey, Platform, SecretCipher};
//! use std::sync::Arc;
//!
//! # fn main() -> anyhow::Result<()> {
//! let cipher = Arc::new(SecretCipher::new(MasterKey::from_env("CREDVAULT_ENCRYPTION_KEY")?));
//! let store = CredentialStore::new("credentials.db", cipher)?;
//!
//! let summary = store.add("user_1", Platform::Youtube, "AIzaSyDTestKey123456789", Some("main"))?;
//! println!("Stored {} as {}", summary.id, summary.masked_key);
//! # Ok(())
//! # }
//! ```
//!
//! # Security
//!
//! - Plaintext keys are only ever returned by the resolver, never by the store
//! - The master key lives in memory only and is zeroed on drop
//! - Every record has its own salt, IV and derived key

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

mod cipher;
mod error;
mod secret;
mod storage;

pub use cipher::{mask_key, MasterKey, SecretCipher, DEFAULT_MAX_CONCURRENT_KDF, KEY_SIZE};
pub use error::CipherError;
pub use secret::{EncodedSecret, EncryptedSecret, IV_SIZE, SALT_SIZE, TAG_SIZE};
pub use storage::CredentialStore;

/// Third-party platform a credential unlocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    /// YouTube Data API
    #[serde(alias = "YOUTUBE")]
    Youtube,
    /// Instagram scraper (RapidAPI)
    #[serde(alias = "INSTAGRAM")]
    Instagram,
}

impl Platform {
    pub const ALL: [Platform; 2] = [Platform::Youtube, Platform::Instagram];

    /// Column value used in the credential table.
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Youtube => "YOUTUBE",
            Platform::Instagram => "INSTAGRAM",
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Platform {
    type Err = UnknownPlatform;

    /// Case-insensitive: `youtube`, `YOUTUBE` and `YouTube` all parse.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "YOUTUBE" => Ok(Platform::Youtube),
            "INSTAGRAM" => Ok(Platform::Instagram),
            _ => Err(UnknownPlatform(s.to_string())),
        }
    }
}

/// Returned when a platform name is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown platform '{0}'")]
pub struct UnknownPlatform(pub String);

/// A stored credential row, including its encrypted secret.
///
/// Only the resolver reads these; everything user-facing uses
/// [`CredentialSummary`].
#[derive(Debug, Clone, PartialEq)]
pub struct StoredCredential {
    pub id: Uuid,
    pub owner_id: String,
    pub platform: Platform,
    pub secret: EncodedSecret,
    pub label: Option<String>,
    pub is_active: bool,
    pub last_used_at: Option<DateTime<Utc>>,
}

/// Display-safe view of a stored credential.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CredentialSummary {
    pub id: Uuid,
    pub platform: Platform,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub masked_key: String,
    pub is_active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Partial update applied by the owner. Absent fields are left alone.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CredentialUpdate {
    pub label: Option<String>,
    pub is_active: Option<bool>,
}
