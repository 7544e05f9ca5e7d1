//! User-facing settings, persisted as `settings.json`

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::protocol::constants::{DEFAULT_HISTORY_LIMIT, DEFAULT_MAX_AUTO_DOWNLOAD};
use crate::storage::{read_json, write_json};
use crate::Result;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Broadcast local clipboard changes without asking
    pub auto_send: bool,
    /// Apply remote clipboard entries without asking
    pub auto_receive: bool,
    pub enable_file_transfer: bool,
    /// Files up to this many bytes (in total per entry) download automatically
    pub max_auto_download_size: u64,
    pub history_limit: usize,
    /// Overrides the OS hostname when set
    pub custom_device_name: Option<String>,
    pub notifications: NotificationSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            auto_send: true,
            auto_receive: true,
            enable_file_transfer: true,
            max_auto_download_size: DEFAULT_MAX_AUTO_DOWNLOAD,
            history_limit: DEFAULT_HISTORY_LIMIT,
            custom_device_name: None,
            notifications: NotificationSettings::default(),
        }
    }
}

/// Which events the host should surface to the user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationSettings {
    pub device_join: bool,
    pub device_leave: bool,
    pub data_sent: bool,
    pub data_received: bool,
    pub large_files: bool,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            device_join: true,
            device_leave: true,
            data_sent: false,
            data_received: true,
            large_files: true,
        }
    }
}

impl Settings {
    /// Load from disk; a missing or unreadable file yields defaults.
    pub fn load(path: &Path) -> Self {
        match read_json(path) {
            Ok(Some(settings)) => settings,
            Ok(None) => Self::default(),
            Err(e) => {
                tracing::warn!("settings unreadable, using defaults: {}", e);
                Self::default()
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        write_json(path, self)
    }

    /// Name this device presents to others
    pub fn device_name(&self, fallback: &str) -> String {
        self.custom_device_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .unwrap_or(fallback)
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, br#"{"auto_send": false, "notifications": {"data_sent": true}}"#).unwrap();

        let settings = Settings::load(&path);
        assert!(!settings.auto_send);
        assert!(settings.auto_receive);
        assert_eq!(settings.history_limit, DEFAULT_HISTORY_LIMIT);
        assert!(settings.notifications.data_sent);
        assert!(settings.notifications.device_join);
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let settings = Settings {
            custom_device_name: Some("studio".into()),
            max_auto_download_size: 1024,
            ..Settings::default()
        };
        settings.save(&path).unwrap();
        assert_eq!(Settings::load(&path), settings);
    }

    #[test]
    fn test_corrupt_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, b"[]").unwrap();
        assert_eq!(Settings::load(&path), Settings::default());
    }

    #[test]
    fn test_device_name_fallback() {
        let mut settings = Settings::default();
        assert_eq!(settings.device_name("host"), "host");
        settings.custom_device_name = Some("  ".into());
        assert_eq!(settings.device_name("host"), "host");
        settings.custom_device_name = Some("studio".into());
        assert_eq!(settings.device_name("host"), "studio");
    }
}
