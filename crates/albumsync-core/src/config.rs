//! Tunable limits for the album sync core.
//!
//! Defaults match the behaviour the apps ship with; a JSON file can override
//! any subset of fields.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AlbumError, AlbumResult};

/// Runtime configuration shared by every component
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Most recently updated albums delivered by `observe_my_albums`
    pub album_page_size: usize,
    /// Most recent notifications delivered per user
    pub notification_page_size: usize,
    /// Invite code generation attempts before giving up
    pub invite_code_max_attempts: u32,
    /// Quiet period before an incremental invite lookup hits the store
    pub invite_lookup_debounce_ms: u64,
    /// Items uploaded concurrently by a bulk upload
    pub upload_concurrency: usize,
    /// Capacity of internal command/event channels
    pub event_channel_capacity: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            album_page_size: 50,
            notification_page_size: 100,
            invite_code_max_attempts: 5,
            invite_lookup_debounce_ms: 300,
            upload_concurrency: 3,
            event_channel_capacity: 256,
        }
    }
}

impl SyncConfig {
    /// Load configuration from a JSON file.
    ///
    /// Fields missing from the file keep their default value.
    pub fn load(path: impl AsRef<Path>) -> AlbumResult<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let config: SyncConfig = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would stall the engine.
    pub fn validate(&self) -> AlbumResult<()> {
        if self.album_page_size == 0 || self.notification_page_size == 0 {
            return Err(AlbumError::InvalidInput(
                "page sizes must be greater than zero".into(),
            ));
        }
        if self.invite_code_max_attempts == 0 {
            return Err(AlbumError::InvalidInput(
                "invite_code_max_attempts must be at least 1".into(),
            ));
        }
        if self.upload_concurrency == 0 || self.event_channel_capacity == 0 {
            return Err(AlbumError::InvalidInput(
                "upload_concurrency and event_channel_capacity must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn invite_lookup_debounce(&self) -> Duration {
        Duration::from_millis(self.invite_lookup_debounce_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = SyncConfig::default();
        assert_eq!(config.album_page_size, 50);
        assert_eq!(config.notification_page_size, 100);
        assert_eq!(config.invite_code_max_attempts, 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_partial_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("albumsync.json");
        std::fs::write(&path, r#"{ "upload_concurrency": 8 }"#).unwrap();

        let config = SyncConfig::load(&path).unwrap();
        assert_eq!(config.upload_concurrency, 8);
        assert_eq!(config.album_page_size, 50);
    }

    #[test]
    fn test_load_rejects_zero_limits() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("albumsync.json");
        std::fs::write(&path, r#"{ "album_page_size": 0 }"#).unwrap();

        let result = SyncConfig::load(&path);
        assert!(matches!(result, Err(AlbumError::InvalidInput(_))));
    }

    #[test]
    fn test_load_missing_file_is_io_error() {
        let result = SyncConfig::load("/definitely/not/here.json");
        assert!(matches!(result, Err(AlbumError::Io(_))));
    }
}
