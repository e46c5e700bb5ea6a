// snapshot-bucket/src/config.rs

use std::fmt;
use std::time::Duration;
use tracing::{debug, info};

/// Public B2 API endpoint used when no override is configured.
pub const DEFAULT_API_URL: &str = "https://api.backblazeb2.com";

/// Immutable runtime configuration, built once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// Time between two fetch-and-store cycles.
    pub interval: Duration,
    /// URL of the image to snapshot.
    pub url: String,
    pub storage: StorageConfig,
}

/// Credentials and target bucket for the object store.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub account_id: Secret,
    pub application_key: Secret,
    pub bucket: String,
    /// Base URL of the B2 API, overridable for testing against a local server.
    pub api_url: String,
}

impl Config {
    pub fn trace_loaded(&self) {
        info!(
            interval = %humantime::format_duration(self.interval),
            url = %self.url,
            bucket = %self.storage.bucket,
            api_url = %self.storage.api_url,
            account_id_len = self.storage.account_id.len(),
            application_key_len = self.storage.application_key.len(),
            "Loaded Config"
        );
        debug!(?self, "Config loaded (full debug)");
    }
}

/// A string that must never be printed. `Debug` and `Display` are redacted.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}
