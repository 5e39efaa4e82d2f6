//! Client configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Seconds a visitor waits before an OTP may be resent.
pub const DEFAULT_RESEND_SECS: u32 = 180;

/// Upper bound on an uploaded image, 0.3 MiB.
pub const DEFAULT_MAX_IMAGE_BYTES: usize = 314_572;

/// Longest edge of an uploaded image, in pixels.
pub const DEFAULT_MAX_IMAGE_DIMENSION: u32 = 1024;

/// Client configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// API base URL
    pub api_url: String,
    /// Per-request timeout
    pub request_timeout_secs: u64,
    /// OTP resend countdown
    pub otp_resend_secs: u32,
    /// Image upload limits
    pub compression: CompressionSettings,
    /// Logging level
    pub log_level: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.visitgate.io".into(),
            request_timeout_secs: 30,
            otp_resend_secs: DEFAULT_RESEND_SECS,
            compression: CompressionSettings::default(),
            log_level: "info".into(),
        }
    }
}

/// Image compression limits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionSettings {
    pub max_bytes: usize,
    pub max_dimension: u32,
}

impl Default for CompressionSettings {
    fn default() -> Self {
        Self {
            max_bytes: DEFAULT_MAX_IMAGE_BYTES,
            max_dimension: DEFAULT_MAX_IMAGE_DIMENSION,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Read(String),
    #[error("failed to parse config: {0}")]
    Parse(String),
    #[error("failed to write config: {0}")]
    Write(String),
}

impl ClientConfig {
    /// Load from file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read(e.to_string()))?;
        serde_json::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Save to file
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content =
            serde_json::to_string_pretty(self).map_err(|e| ConfigError::Write(e.to_string()))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Write(e.to_string()))?;
        }
        std::fs::write(path, content).map_err(|e| ConfigError::Write(e.to_string()))
    }

    /// Get config path for platform
    pub fn default_path() -> PathBuf {
        #[cfg(target_os = "windows")]
        return PathBuf::from(r"C:\ProgramData\Visitgate\client.json");
        #[cfg(target_os = "macos")]
        return PathBuf::from("/Library/Application Support/Visitgate/client.json");
        #[cfg(target_os = "linux")]
        return PathBuf::from("/etc/visitgate/client.json");
        #[cfg(not(any(target_os = "windows", target_os = "macos", target_os = "linux")))]
        return PathBuf::from("client.json");
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.otp_resend_secs, 180);
        assert_eq!(config.compression.max_dimension, 1024);
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let config: ClientConfig =
            serde_json::from_str(r#"{"api_url": "http://localhost:5000"}"#).unwrap();
        assert_eq!(config.api_url, "http://localhost:5000");
        assert_eq!(config.otp_resend_secs, DEFAULT_RESEND_SECS);
        assert_eq!(config.compression, CompressionSettings::default());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("client.json");
        let config = ClientConfig {
            api_url: "http://kiosk.local".into(),
            otp_resend_secs: 60,
            ..Default::default()
        };
        config.save(&path).unwrap();
        assert_eq!(ClientConfig::load(&path).unwrap(), config);
    }
}
