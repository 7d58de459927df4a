//! Client configuration
//!
//! [`ClientConfig`] selects the service, the target collection and the
//! parent window for prompts. It can be built in code or read from TOML:
//!
//! ```toml
//! collection = "work"
//! service_name = "org.freedesktop.secrets"
//! window_id = ""
//! call_timeout_secs = 25
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{SecretError, SecretResult};
use crate::models::DEFAULT_COLLECTION;
use crate::service::SS_DBUS_NAME;

/// Well-known bus name of the Secret Service
pub const DEFAULT_SERVICE_NAME: &str = SS_DBUS_NAME;

/// Default per-call timeout, matching the bus default
pub const DEFAULT_CALL_TIMEOUT_SECS: u64 = 25;

/// Configuration for a [`crate::SecretServiceClient`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Name of the collection items are stored in
    pub collection: String,
    /// Bus name of the service
    pub service_name: String,
    /// Parent window handle passed when showing prompts
    pub window_id: String,
    /// Timeout applied to each method call. Never applied to prompt waits.
    pub call_timeout_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            collection: DEFAULT_COLLECTION.to_string(),
            service_name: DEFAULT_SERVICE_NAME.to_string(),
            window_id: String::new(),
            call_timeout_secs: DEFAULT_CALL_TIMEOUT_SECS,
        }
    }
}

impl ClientConfig {
    /// Creates a configuration with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the target collection
    #[must_use]
    pub fn with_collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = collection.into();
        self
    }

    /// Sets the service bus name
    #[must_use]
    pub fn with_service_name(mut self, service_name: impl Into<String>) -> Self {
        self.service_name = service_name.into();
        self
    }

    /// Sets the parent window handle for prompts
    #[must_use]
    pub fn with_window_id(mut self, window_id: impl Into<String>) -> Self {
        self.window_id = window_id.into();
        self
    }

    /// Sets the per-call timeout in seconds
    #[must_use]
    pub const fn with_call_timeout_secs(mut self, secs: u64) -> Self {
        self.call_timeout_secs = secs;
        self
    }

    /// Per-call timeout as a duration
    #[must_use]
    pub const fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    /// Parses a configuration from TOML; missing keys take their defaults
    ///
    /// # Errors
    /// Returns `SecretError::Config` if the document is not valid TOML or
    /// the resulting configuration is invalid.
    pub fn from_toml_str(content: &str) -> SecretResult<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| SecretError::Config(format!("failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Serializes the configuration to TOML
    ///
    /// # Errors
    /// Returns `SecretError::Config` if serialization fails.
    pub fn to_toml_string(&self) -> SecretResult<String> {
        toml::to_string(self)
            .map_err(|e| SecretError::Config(format!("failed to serialize config: {e}")))
    }

    /// Loads a configuration file
    ///
    /// # Errors
    /// Returns `SecretError::Config` if the file cannot be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> SecretResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            SecretError::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&content)
    }

    /// Checks that the configuration can be used to build a client
    ///
    /// # Errors
    /// Returns `SecretError::Config` if the collection or service name is
    /// empty.
    pub fn validate(&self) -> SecretResult<()> {
        if self.collection.is_empty() {
            return Err(SecretError::Config(
                "collection name cannot be empty".to_string(),
            ));
        }
        if self.service_name.is_empty() {
            return Err(SecretError::Config(
                "service name cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}
