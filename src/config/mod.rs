pub mod defaults;
mod env;

pub use defaults::SystemDefaults;
pub use env::{CONFIG_PATH_ENV, MASTER_KEY_ENV};

use crate::credentials::DEFAULT_MAX_CONCURRENT_KDF;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

/// Complete credvault configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct VaultConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub resolver: ResolverConfig,
    /// Shared system credentials, one per platform
    #[serde(default)]
    pub defaults: SystemDefaults,
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    /// Dashboard origins allowed by CORS. Empty allows any origin.
    #[serde(default)]
    pub allowed_origins: Vec<String>,
    /// Key derivations allowed to run at once across all requests
    #[serde(default = "default_max_concurrent_kdf")]
    pub max_concurrent_kdf: usize,
    /// Minimum seconds between encryption self-checks behind /health
    #[serde(default = "default_health_recheck_secs")]
    pub health_recheck_secs: u64,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_max_concurrent_kdf() -> usize {
    DEFAULT_MAX_CONCURRENT_KDF
}

fn default_health_recheck_secs() -> u64 {
    30
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            allowed_origins: Vec::new(),
            max_concurrent_kdf: default_max_concurrent_kdf(),
            health_recheck_secs: default_health_recheck_secs(),
        }
    }
}

/// Credential database configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_database_path")]
    pub database_path: String,
}

fn default_database_path() -> String {
    "credentials.db".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

/// Resolver behaviour
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResolverConfig {
    /// Fail instead of falling back to the system key when a requested
    /// stored key is missing, inactive or owned by someone else.
    #[serde(default)]
    pub strict_key_selection: bool,
}

/// Load configuration from a TOML file.
///
/// A missing file yields the defaults; a file that exists but does not parse
/// is an error.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<VaultConfig> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(VaultConfig::default());
    }

    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    toml::from_str(&contents)
        .with_context(|| format!("Failed to parse config file {}", path.display()))
}
