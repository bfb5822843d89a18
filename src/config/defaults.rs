//! Shared system credentials used when a caller has no key of their own.

use crate::credentials::{mask_key, Platform};
use crate::resolver::DefaultCredentials;
use serde::Deserialize;

/// One optional system key per platform.
///
/// Blank values count as unset. `Debug` only shows masked keys.
#[derive(Clone, Default, Deserialize)]
pub struct SystemDefaults {
    #[serde(default)]
    youtube: Option<String>,
    #[serde(default)]
    instagram: Option<String>,
}

impl SystemDefaults {
    pub fn set_youtube(&mut self, key: String) {
        self.youtube = Some(key);
    }

    pub fn set_instagram(&mut self, key: String) {
        self.instagram = Some(key);
    }

    /// Platforms that have no usable system key.
    pub fn missing_platforms(&self) -> Vec<Platform> {
        Platform::ALL
            .into_iter()
            .filter(|p| self.default_credential(*p).is_none())
            .collect()
    }
}

impl DefaultCredentials for SystemDefaults {
    fn default_credential(&self, platform: Platform) -> Option<String> {
        let key = match platform {
            Platform::Youtube => self.youtube.as_ref(),
            Platform::Instagram => self.instagram.as_ref(),
        };
        key.filter(|k| !k.trim().is_empty()).cloned()
    }
}

impl std::fmt::Debug for SystemDefaults {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SystemDefaults")
            .field("youtube", &self.youtube.as_deref().map(mask_key))
            .field("instagram", &self.instagram.as_deref().map(mask_key))
            .finish()
    }
}
