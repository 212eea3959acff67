use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Subject tag prepended to every application message.
pub const DEFAULT_SUBJECT_MARKER: &str = "EEMAILER";

/// Client configuration
///
/// Every field has a default, so an empty TOML document is a valid config.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Address of the directory event channel
    pub directory_addr: String,
    /// Base URL of the directory HTTP API
    pub directory_url: String,
    /// Base URL of the mail REST API
    pub mail_api_url: String,
    /// Profile endpoint of the identity provider
    pub userinfo_url: String,
    /// Subject tag used when sending and as the fetch filter
    pub subject_marker: String,
    /// Root directory of the local file store
    pub storage_dir: PathBuf,
    pub registration_timeout_secs: u64,
    pub request_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            directory_addr: "127.0.0.1:3000".to_string(),
            directory_url: "http://localhost:3000".to_string(),
            mail_api_url: "https://gmail.googleapis.com/gmail/v1/users/me".to_string(),
            userinfo_url: "https://www.googleapis.com/oauth2/v1/userinfo?alt=json".to_string(),
            subject_marker: DEFAULT_SUBJECT_MARKER.to_string(),
            storage_dir: PathBuf::from("./.eemailer"),
            registration_timeout_secs: 30,
            request_timeout_secs: 15,
        }
    }
}

impl Config {
    /// Parse a config from a TOML string
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    /// Load a config from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    pub fn registration_timeout(&self) -> Duration {
        Duration::from_secs(self.registration_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Build an HTTP client honouring the request timeout
    pub fn http_client(&self) -> reqwest::Result<reqwest::Client> {
        reqwest::Client::builder()
            .timeout(self.request_timeout())
            .build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.subject_marker, "EEMAILER");
        assert_eq!(config.registration_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_partial_override() {
        let config = Config::from_toml_str(
            r#"
            subject_marker = "SECRET"
            registration_timeout_secs = 5
            "#,
        )
        .unwrap();
        assert_eq!(config.subject_marker, "SECRET");
        assert_eq!(config.registration_timeout_secs, 5);
        assert_eq!(config.directory_url, "http://localhost:3000");
    }

    #[test]
    fn test_invalid_toml() {
        assert!(Config::from_toml_str("subject_marker = ").is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("eemailer.toml");
        std::fs::write(&path, "storage_dir = \"/tmp/keys\"\n").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.storage_dir, PathBuf::from("/tmp/keys"));
    }
}
