//! Ringflow configuration system.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Result, RingflowError};
use crate::traits::CredentialProvider;
use crate::types::CredentialBundle;

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RingflowConfig {
    #[serde(default)]
    pub twilio: TwilioConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

impl RingflowConfig {
    /// Load config from the default path (~/.ringflow/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            tracing::debug!("No config at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| RingflowError::Config(format!("Failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| RingflowError::Config(format!("Failed to parse config: {e}")))?;
        tracing::debug!("⚙️ Loaded config from {}", path.display());
        Ok(config)
    }

    /// Save config to a specific path.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| RingflowError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Save config to the default path.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::default_path())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the Ringflow home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".ringflow")
    }
}

/// Twilio account used for outbound calls.
#[derive(Clone, Serialize, Deserialize)]
pub struct TwilioConfig {
    #[serde(default)]
    pub account_sid: String,
    #[serde(default)]
    pub auth_token: String,
    /// Verified caller number, E.164.
    #[serde(default)]
    pub from_number: String,
    #[serde(default = "default_api_base")]
    pub api_base: String,
}

fn default_api_base() -> String { "https://api.twilio.com".into() }

impl Default for TwilioConfig {
    fn default() -> Self {
        Self {
            account_sid: String::new(),
            auth_token: String::new(),
            from_number: String::new(),
            api_base: default_api_base(),
        }
    }
}

impl std::fmt::Debug for TwilioConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TwilioConfig")
            .field("account_sid", &self.account_sid)
            .field("auth_token", &"***")
            .field("from_number", &self.from_number)
            .field("api_base", &self.api_base)
            .finish()
    }
}

impl TwilioConfig {
    pub fn bundle(&self) -> CredentialBundle {
        CredentialBundle::new(&self.account_sid, &self.auth_token, &self.from_number)
    }
}

impl CredentialProvider for TwilioConfig {
    fn credential_bundle(&self) -> Result<CredentialBundle> {
        self.bundle().credential_bundle()
    }
}

/// Dispatch engine tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Minimum gap between two invocations of the same batch.
    #[serde(default = "default_min_spacing_ms")]
    pub min_spacing_ms: u64,
    /// An invocation that has not reported by then is marked failed.
    /// Values below one second are treated as one second.
    #[serde(default = "default_invocation_timeout_secs")]
    pub invocation_timeout_secs: u64,
    /// Capacity of the status-change broadcast channel.
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
    /// Status changes kept in the in-memory history ring.
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
    #[serde(default = "default_max_repeat_count")]
    pub max_repeat_count: u32,
}

fn default_min_spacing_ms() -> u64 { 3000 }
fn default_invocation_timeout_secs() -> u64 { 30 }
fn default_event_buffer() -> usize { 256 }
fn default_history_limit() -> usize { 100 }
fn default_max_repeat_count() -> u32 { 10 }

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            min_spacing_ms: default_min_spacing_ms(),
            invocation_timeout_secs: default_invocation_timeout_secs(),
            event_buffer: default_event_buffer(),
            history_limit: default_history_limit(),
            max_repeat_count: default_max_repeat_count(),
        }
    }
}

impl DispatchConfig {
    pub fn min_spacing(&self) -> Duration {
        Duration::from_millis(self.min_spacing_ms)
    }

    pub fn invocation_timeout(&self) -> Duration {
        Duration::from_secs(self.invocation_timeout_secs.max(1))
    }
}

/// Where state lives on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_db_path")]
    pub db_path: String,
    #[serde(default = "default_contacts_path")]
    pub contacts_path: String,
}

fn default_db_path() -> String { "~/.ringflow/ringflow.db".into() }
fn default_contacts_path() -> String { "~/.ringflow/contacts.json".into() }

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            contacts_path: default_contacts_path(),
        }
    }
}

impl StorageConfig {
    pub fn db_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.db_path).to_string())
    }

    pub fn contacts_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.contacts_path).to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_toml() {
        let config: RingflowConfig = toml::from_str("").unwrap();
        assert_eq!(config.dispatch.min_spacing_ms, 3000);
        assert_eq!(config.dispatch.invocation_timeout(), Duration::from_secs(30));
        assert_eq!(config.twilio.api_base, "https://api.twilio.com");
        assert!(config.twilio.credential_bundle().is_err());
    }

    #[test]
    fn test_partial_sections() {
        let config: RingflowConfig = toml::from_str(
            r#"
            [twilio]
            account_sid = "AC42"
            auth_token = "tok"
            from_number = "+15550100"

            [dispatch]
            min_spacing_ms = 500
            "#,
        )
        .unwrap();
        assert_eq!(config.dispatch.min_spacing(), Duration::from_millis(500));
        assert_eq!(config.dispatch.max_repeat_count, 10);
        let bundle = config.twilio.credential_bundle().unwrap();
        assert_eq!(bundle.source_number, "+15550100");
    }

    #[test]
    fn test_zero_timeout_is_one_second() {
        let config: RingflowConfig = toml::from_str("[dispatch]\ninvocation_timeout_secs = 0").unwrap();
        assert_eq!(config.dispatch.invocation_timeout(), Duration::from_secs(1));
    }

    #[test]
    fn test_debug_hides_auth_token() {
        let twilio = TwilioConfig {
            account_sid: "AC42".into(),
            auth_token: "super-secret-token".into(),
            ..TwilioConfig::default()
        };
        let printed = format!("{:?}", RingflowConfig { twilio, ..RingflowConfig::default() });
        assert!(printed.contains("AC42"));
        assert!(!printed.contains("super-secret-token"));
    }

    #[test]
    fn test_save_and_reload() {
        let dir = std::env::temp_dir().join("ringflow-test-config");
        let path = dir.join("config.toml");
        let mut config = RingflowConfig::default();
        config.dispatch.history_limit = 7;
        config.save_to(&path).unwrap();

        let loaded = RingflowConfig::load_from(&path).unwrap();
        assert_eq!(loaded.dispatch.history_limit, 7);
        std::fs::remove_dir_all(&dir).ok();
    }
}
