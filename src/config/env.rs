use super::VaultConfig;

/// Base64-encoded 32-byte master key. Never read from the config file.
pub const MASTER_KEY_ENV: &str = "CREDVAULT_ENCRYPTION_KEY";

/// Path of the TOML config file.
pub const CONFIG_PATH_ENV: &str = "CREDVAULT_CONFIG";

impl VaultConfig {
    /// Apply environment overrides on top of file values.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    /// Apply overrides from any variable source. Unparseable values are ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("CREDVAULT_BIND_ADDR") {
            self.server.bind_addr = v;
        }
        if let Some(v) = lookup("CREDVAULT_MAX_CONCURRENT_KDF") {
            if let Ok(n) = v.parse::<usize>() {
                self.server.max_concurrent_kdf = n;
            }
        }
        if let Some(v) = lookup("CREDVAULT_DATABASE_PATH") {
            self.storage.database_path = v;
        }
        if let Some(v) = lookup("CREDVAULT_STRICT_KEY_SELECTION") {
            if let Ok(b) = v.parse::<bool>() {
                self.resolver.strict_key_selection = b;
            }
        }
        if let Some(v) = lookup("YOUTUBE_API_KEY") {
            self.defaults.set_youtube(v);
        }
        if let Some(v) = lookup("RAPIDAPI_KEY") {
            self.defaults.set_instagram(v);
        }
    }
}
