//! Encrypted API key storage using SQLite.
//!
//! Stores user-owned platform credentials. Each key is encrypted with its own
//! salt and IV; a masked form is kept alongside so listings never decrypt.

use super::{
    cipher::{mask_key, SecretCipher},
    CredentialSummary, CredentialUpdate, EncodedSecret, Platform, StoredCredential,
};
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

const SUMMARY_COLUMNS: &str =
    "id, platform, label, masked_key, is_active, last_used_at, created_at";

/// Encrypted credential storage backed by SQLite.
///
/// # Schema
/// ```sql
/// CREATE TABLE api_credentials (
///     id TEXT PRIMARY KEY,              -- UUID v7
///     owner_id TEXT NOT NULL,
///     platform TEXT NOT NULL,           -- YOUTUBE | INSTAGRAM
///     ciphertext TEXT NOT NULL,         -- base64
///     iv TEXT NOT NULL,                 -- base64, 16 bytes
///     auth_tag TEXT NOT NULL,           -- base64, 16 bytes
///     salt TEXT NOT NULL,               -- base64, 32 bytes
///     masked_key TEXT NOT NULL,         -- "AIza...6789"
///     label TEXT,
///     is_active INTEGER NOT NULL DEFAULT 1,
///     last_used_at TEXT,                -- ISO 8601 timestamp (optional)
///     created_at TEXT NOT NULL,         -- ISO 8601 timestamp
///     updated_at TEXT NOT NULL          -- ISO 8601 timestamp
/// );
/// ```
///
/// # Thread Safety
/// - Connection is wrapped in Mutex for safe concurrent access
/// - `touch_last_used` races are last-write-wins
pub struct CredentialStore {
    conn: Mutex<Connection>,
    cipher: Arc<SecretCipher>,
}

impl CredentialStore {
    /// Creates or opens a credential store.
    ///
    /// # Arguments
    /// * `db_path` - Path to SQLite database file (`:memory:` for tests)
    /// * `cipher` - Cipher used to encrypt newly added keys
    pub fn new<P: AsRef<Path>>(db_path: P, cipher: Arc<SecretCipher>) -> Result<Self> {
        let conn = Connection::open(db_path).context("Failed to open database")?;

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS api_credentials (
                id TEXT PRIMARY KEY,
                owner_id TEXT NOT NULL,
                platform TEXT NOT NULL,
                ciphertext TEXT NOT NULL,
                iv TEXT NOT NULL,
                auth_tag TEXT NOT NULL,
                salt TEXT NOT NULL,
                masked_key TEXT NOT NULL,
                label TEXT,
                is_active INTEGER NOT NULL DEFAULT 1,
                last_used_at TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
            [],
        )
        .context("Failed to create api_credentials table")?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_owner_platform ON api_credentials(owner_id, platform)",
            [],
        )
        .context("Failed to create index")?;

        Ok(Self {
            conn: Mutex::new(conn),
            cipher,
        })
    }

    /// Cipher used for new keys. Async callers run `add` through its KDF limiter.
    pub fn cipher(&self) -> &Arc<SecretCipher> {
        &self.cipher
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("Credential store lock poisoned"))
    }

    /// Encrypts and stores a new key for a user.
    ///
    /// Runs the KDF, so this blocks for tens of milliseconds.
    ///
    /// # Returns
    /// * `Ok(CredentialSummary)` - The stored record, masked
    /// * `Err` - `CipherError::EmptyCredential` for blank keys, or a database error
    pub fn add(
        &self,
        owner_id: &str,
        platform: Platform,
        plaintext: &str,
        label: Option<&str>,
    ) -> Result<CredentialSummary> {
        let secret = self.cipher.encrypt(plaintext)?.encode();
        let masked_key = mask_key(plaintext);
        let label = normalize_label(label);

        let id = Uuid::now_v7();
        let now = Utc::now();

        self.conn()?
            .execute(
                r#"
                INSERT INTO api_credentials (
                    id, owner_id, platform,
                    ciphertext, iv, auth_tag, salt,
                    masked_key, label, is_active,
                    last_used_at, created_at, updated_at
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 1, NULL, ?10, ?10)
                "#,
                params![
                    id.to_string(),
                    owner_id,
                    platform.as_str(),
                    secret.ciphertext,
                    secret.iv,
                    secret.auth_tag,
                    secret.salt,
                    masked_key,
                    label,
                    now.to_rfc3339(),
                ],
            )
            .context("Failed to store credential")?;

        Ok(CredentialSummary {
            id,
            platform,
            label,
            masked_key,
            is_active: true,
            last_used_at: None,
            created_at: now,
        })
    }

    /// Lists a user's credentials, newest first. Never decrypts.
    pub fn list_by_owner(&self, owner_id: &str) -> Result<Vec<CredentialSummary>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM api_credentials WHERE owner_id = ?1 ORDER BY created_at DESC, id DESC",
                SUMMARY_COLUMNS
            ))
            .context("Failed to prepare query")?;

        let rows = stmt
            .query_map(params![owner_id], read_summary_row)
            .context("Failed to execute query")?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to read results")?;

        rows.into_iter().map(SummaryRow::into_summary).collect()
    }

    /// Fetches one of the user's credentials, active or not.
    pub fn get_summary(&self, owner_id: &str, id: Uuid) -> Result<Option<CredentialSummary>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                &format!(
                    "SELECT {} FROM api_credentials WHERE id = ?1 AND owner_id = ?2",
                    SUMMARY_COLUMNS
                ),
                params![id.to_string(), owner_id],
                read_summary_row,
            )
            .optional()
            .context("Failed to query credential")?;

        row.map(SummaryRow::into_summary).transpose()
    }

    /// Applies a label and/or active-flag change.
    ///
    /// An empty label clears it.
    ///
    /// # Returns
    /// * `Ok(Some(summary))` - Updated record
    /// * `Ok(None)` - No such record for this owner
    pub fn update(
        &self,
        owner_id: &str,
        id: Uuid,
        update: &CredentialUpdate,
    ) -> Result<Option<CredentialSummary>> {
        if update.label.is_none() && update.is_active.is_none() {
            return self.get_summary(owner_id, id);
        }

        // One statement, so a failed flag change never leaves a new label behind
        let changed = self
            .conn()?
            .execute(
                r#"
                UPDATE api_credentials
                SET label = CASE WHEN ?1 THEN ?2 ELSE label END,
                    is_active = COALESCE(?3, is_active),
                    updated_at = ?4
                WHERE id = ?5 AND owner_id = ?6
                "#,
                params![
                    update.label.is_some(),
                    normalize_label(update.label.as_deref()),
                    update.is_active,
                    Utc::now().to_rfc3339(),
                    id.to_string(),
                    owner_id,
                ],
            )
            .context("Failed to update credential")?;

        if changed == 0 {
            return Ok(None);
        }

        self.get_summary(owner_id, id)
    }

    /// Physically removes a credential.
    ///
    /// # Returns
    /// * `Ok(true)` - Credential deleted
    /// * `Ok(false)` - No credential found for this owner
    pub fn delete(&self, owner_id: &str, id: Uuid) -> Result<bool> {
        let rows_affected = self
            .conn()?
            .execute(
                "DELETE FROM api_credentials WHERE id = ?1 AND owner_id = ?2",
                params![id.to_string(), owner_id],
            )
            .context("Failed to delete credential")?;

        Ok(rows_affected > 0)
    }

    /// Looks up an active credential owned by `owner_id` for `platform`.
    ///
    /// Deactivated records, other owners' records and other platforms all
    /// read as `None`.
    pub fn find_active_credential(
        &self,
        id: Uuid,
        owner_id: &str,
        platform: Platform,
    ) -> Result<Option<StoredCredential>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                r#"
                SELECT ciphertext, iv, auth_tag, salt, label, last_used_at
                FROM api_credentials
                WHERE id = ?1 AND owner_id = ?2 AND platform = ?3 AND is_active = 1
                "#,
                params![id.to_string(), owner_id, platform.as_str()],
                |row| {
                    Ok((
                        EncodedSecret {
                            ciphertext: row.get(0)?,
                            iv: row.get(1)?,
                            auth_tag: row.get(2)?,
                            salt: row.get(3)?,
                        },
                        row.get::<_, Option<String>>(4)?,
                        row.get::<_, Option<String>>(5)?,
                    ))
                },
            )
            .optional()
            .context("Failed to query credential")?;

        let Some((secret, label, last_used_at)) = row else {
            return Ok(None);
        };

        Ok(Some(StoredCredential {
            id,
            owner_id: owner_id.to_string(),
            platform,
            secret,
            label,
            is_active: true,
            last_used_at: parse_optional_timestamp(last_used_at)?,
        }))
    }

    /// Records that a credential was just used.
    pub fn touch_last_used(&self, id: Uuid) -> Result<()> {
        self.conn()?
            .execute(
                "UPDATE api_credentials SET last_used_at = ?1 WHERE id = ?2",
                params![Utc::now().to_rfc3339(), id.to_string()],
            )
            .context("Failed to update last_used_at")?;

        Ok(())
    }

    /// Overwrites the stored secret fields verbatim. Test hook for corruption
    /// scenarios; normal writes go through [`CredentialStore::add`].
    #[cfg(test)]
    pub(crate) fn overwrite_secret(&self, id: Uuid, secret: &EncodedSecret) -> Result<()> {
        self.conn()?.execute(
            "UPDATE api_credentials SET ciphertext = ?1, iv = ?2, auth_tag = ?3, salt = ?4 WHERE id = ?5",
            params![
                secret.ciphertext,
                secret.iv,
                secret.auth_tag,
                secret.salt,
                id.to_string()
            ],
        )?;
        Ok(())
    }
}

/// Raw summary columns before parsing.
struct SummaryRow {
    id: String,
    platform: String,
    label: Option<String>,
    masked_key: String,
    is_active: bool,
    last_used_at: Option<String>,
    created_at: String,
}

fn read_summary_row(row: &Row<'_>) -> rusqlite::Result<SummaryRow> {
    Ok(SummaryRow {
        id: row.get(0)?,
        platform: row.get(1)?,
        label: row.get(2)?,
        masked_key: row.get(3)?,
        is_active: row.get(4)?,
        last_used_at: row.get(5)?,
        created_at: row.get(6)?,
    })
}

impl SummaryRow {
    fn into_summary(self) -> Result<CredentialSummary> {
        Ok(CredentialSummary {
            id: Uuid::parse_str(&self.id).context("Invalid credential id in database")?,
            platform: self
                .platform
                .parse()
                .context("Invalid platform in database")?,
            label: self.label,
            masked_key: self.masked_key,
            is_active: self.is_active,
            last_used_at: parse_optional_timestamp(self.last_used_at)?,
            created_at: parse_timestamp(&self.created_at)?,
        })
    }
}

fn normalize_label(label: Option<&str>) -> Option<String> {
    label
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .context("Failed to parse timestamp")
}

fn parse_optional_timestamp(value: Option<String>) -> Result<Option<DateTime<Utc>>> {
    value.as_deref().map(parse_timestamp).transpose()
}
