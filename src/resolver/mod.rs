//! Chooses which platform credential an outbound API call should use.
//!
//! ```text
//! START ─(no key_id)──────────────────────────────→ SYSTEM_DEFAULT
//!   ├──(key_id, no user_id)───────────────────────→ UNAUTHORIZED
//!   └──(key_id, user_id)→ LOOKUP
//!                           ├─ NOT_FOUND ─────────→ SYSTEM_DEFAULT (or KEY_UNAVAILABLE when strict)
//!                           └─ FOUND → DECRYPT
//!                                        ├─ OK ───→ USER (+ detached lastUsedAt touch)
//!                                        └─ FAIL ─→ CORRUPTED
//! ```
//!
//! The plaintext in a [`ResolvedCredential`] must be used for one call and
//! dropped. It is zeroed on drop and never printed by `Debug`.

use crate::credentials::{CipherError, CredentialStore, Platform, SecretCipher, StoredCredential};
use crate::error::ErrorKind;
use anyhow::anyhow;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::task;
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use zeroize::Zeroizing;

#[cfg(test)]
mod tests;

/// Persistence contract the resolver consumes.
///
/// Implementations are called from blocking threads.
pub trait CredentialRepository: Send + Sync + 'static {
    /// Active record matching `(id, owner_id, platform)`, if any.
    fn find_active_credential(
        &self,
        id: Uuid,
        owner_id: &str,
        platform: Platform,
    ) -> anyhow::Result<Option<StoredCredential>>;

    /// Best-effort bookkeeping. Failures are logged and ignored by the resolver.
    fn touch_last_used(&self, id: Uuid) -> anyhow::Result<()>;
}

impl CredentialRepository for CredentialStore {
    fn find_active_credential(
        &self,
        id: Uuid,
        owner_id: &str,
        platform: Platform,
    ) -> anyhow::Result<Option<StoredCredential>> {
        CredentialStore::find_active_credential(self, id, owner_id, platform)
    }

    fn touch_last_used(&self, id: Uuid) -> anyhow::Result<()> {
        CredentialStore::touch_last_used(self, id)
    }
}

/// Source of the shared, system-provided credentials.
pub trait DefaultCredentials: Send + Sync + 'static {
    fn default_credential(&self, platform: Platform) -> Option<String>;
}

impl DefaultCredentials for HashMap<Platform, String> {
    fn default_credential(&self, platform: Platform) -> Option<String> {
        self.get(&platform).cloned()
    }
}

/// Where a resolved credential came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CredentialSource {
    /// The caller's own stored key
    User,
    /// The shared system key for the platform
    System,
}

/// What to do when a requested stored key is missing, inactive or not owned
/// by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FallbackPolicy {
    /// Use the system default and report the fallback in `fallback_from`
    #[default]
    SystemDefault,
    /// Fail with `ResolveError::KeyUnavailable`
    Reject,
}

impl FallbackPolicy {
    pub fn from_strict(strict_key_selection: bool) -> Self {
        if strict_key_selection {
            FallbackPolicy::Reject
        } else {
            FallbackPolicy::SystemDefault
        }
    }
}

/// A credential ready for a single outbound call. Never persist or log it.
pub struct ResolvedCredential {
    plaintext: Zeroizing<String>,
    pub source: CredentialSource,
    /// Stored record that produced the credential (`User` source only)
    pub record_id: Option<Uuid>,
    /// Requested key that was unavailable when the system default was used instead
    pub fallback_from: Option<Uuid>,
}

impl ResolvedCredential {
    pub fn plaintext(&self) -> &str {
        self.plaintext.as_str()
    }
}

impl std::fmt::Debug for ResolvedCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedCredential")
            .field("plaintext", &"<redacted>")
            .field("source", &self.source)
            .field("record_id", &self.record_id)
            .field("fallback_from", &self.fallback_from)
            .finish()
    }
}

/// Resolution failures.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("no credential available for {platform}")]
    NoCredential { platform: Platform },

    #[error("authentication required to use a stored credential")]
    Unauthorized,

    #[error("requested {platform} credential {key_id} is not available")]
    KeyUnavailable { platform: Platform, key_id: Uuid },

    #[error("stored credential {record_id} is corrupted")]
    Corrupted {
        record_id: Uuid,
        #[source]
        source: CipherError,
    },

    #[error("credential lookup failed: {0:#}")]
    Storage(anyhow::Error),
}

impl ResolveError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ResolveError::NoCredential { .. }
            | ResolveError::Unauthorized
            | ResolveError::KeyUnavailable { .. } => ErrorKind::Resolution,
            ResolveError::Corrupted { .. } => ErrorKind::Corruption,
            ResolveError::Storage(_) => ErrorKind::Storage,
        }
    }
}

/// Resolves `(platform, key_id?, user_id?)` to a plaintext credential.
#[derive(Clone)]
pub struct CredentialResolver {
    cipher: Arc<SecretCipher>,
    repository: Arc<dyn CredentialRepository>,
    defaults: Arc<dyn DefaultCredentials>,
    policy: FallbackPolicy,
}

impl CredentialResolver {
    pub fn new(
        cipher: Arc<SecretCipher>,
        repository: Arc<dyn CredentialRepository>,
        defaults: Arc<dyn DefaultCredentials>,
    ) -> Self {
        Self {
            cipher,
            repository,
            defaults,
            policy: FallbackPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: FallbackPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> FallbackPolicy {
        self.policy
    }

    /// Resolves the credential for one outbound call.
    ///
    /// # Arguments
    /// * `platform` - Platform the call targets
    /// * `key_id` - Stored key the caller selected, if any
    /// * `user_id` - Authenticated caller, if any
    ///
    /// # Returns
    /// * `Ok(ResolvedCredential)` - User key or system default
    /// * `Err(Unauthorized)` - `key_id` given without `user_id`; the store is not consulted
    /// * `Err(NoCredential)` - System default needed but not configured
    /// * `Err(Corrupted)` - The caller's record exists but fails to decrypt
    pub async fn resolve(
        &self,
        platform: Platform,
        key_id: Option<Uuid>,
        user_id: Option<&str>,
    ) -> Result<ResolvedCredential, ResolveError> {
        let Some(key_id) = key_id else {
            debug!(platform = %platform, "No key selected, using system default");
            return self.system_default(platform, None);
        };

        let Some(user_id) = user_id.filter(|u| !u.trim().is_empty()) else {
            warn!(
                platform = %platform,
                key_id = %key_id,
                "Stored key requested without an authenticated user"
            );
            return Err(ResolveError::Unauthorized);
        };

        let repository = Arc::clone(&self.repository);
        let owner_id = user_id.to_string();
        let record = task::spawn_blocking(move || {
            repository.find_active_credential(key_id, &owner_id, platform)
        })
        .await
        .map_err(|e| ResolveError::Storage(anyhow!("lookup task failed: {}", e)))?
        .map_err(ResolveError::Storage)?;

        let Some(record) = record else {
            warn!(
                platform = %platform,
                key_id = %key_id,
                user_id = %user_id,
                "Requested key not found, inactive or not owned by caller"
            );
            return match self.policy {
                FallbackPolicy::SystemDefault => self.system_default(platform, Some(key_id)),
                FallbackPolicy::Reject => Err(ResolveError::KeyUnavailable { platform, key_id }),
            };
        };

        let record_id = record.id;
        let cipher = Arc::clone(&self.cipher);
        let secret = record.secret;
        let decrypted = self
            .cipher
            .run_blocking(move || cipher.decrypt_encoded(&secret))
            .await
            .map_err(ResolveError::Storage)?;

        let plaintext = match decrypted {
            Ok(plaintext) => Zeroizing::new(plaintext),
            Err(e) => {
                error!(
                    record_id = %record_id,
                    platform = %platform,
                    user_id = %user_id,
                    error_kind = %e.kind(),
                    "Stored credential failed to decrypt"
                );
                return Err(ResolveError::Corrupted {
                    record_id,
                    source: e,
                });
            }
        };

        self.touch_in_background(record_id);

        info!(
            record_id = %record_id,
            platform = %platform,
            "Resolved user credential"
        );

        Ok(ResolvedCredential {
            plaintext,
            source: CredentialSource::User,
            record_id: Some(record_id),
            fallback_from: None,
        })
    }

    fn system_default(
        &self,
        platform: Platform,
        fallback_from: Option<Uuid>,
    ) -> Result<ResolvedCredential, ResolveError> {
        match self.defaults.default_credential(platform) {
            Some(key) if !key.trim().is_empty() => Ok(ResolvedCredential {
                plaintext: Zeroizing::new(key),
                source: CredentialSource::System,
                record_id: None,
                fallback_from,
            }),
            _ => {
                warn!(platform = %platform, "No system default credential configured");
                Err(ResolveError::NoCredential { platform })
            }
        }
    }

    /// Fire-and-forget `lastUsedAt` update.
    fn touch_in_background(&self, record_id: Uuid) {
        let repository = Arc::clone(&self.repository);
        task::spawn_blocking(move || {
            if let Err(e) = repository.touch_last_used(record_id) {
                warn!(record_id = %record_id, error = %e, "Failed to update last_used_at");
            }
        });
    }
}
