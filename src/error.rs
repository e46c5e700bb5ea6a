//! Error types shared across the crate.
//!
//! Startup errors ([`ConfigError`], [`StorageError`] from session setup) are fatal
//! for the binary. Per-cycle errors ([`CycleError`]) are logged by the snapshot
//! loop and never stop it.

use thiserror::Error;

/// Validation failures while building a [`crate::config::Config`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("--url, --id, --key or --bucket cannot be empty (missing: {0})")]
    Missing(&'static str),

    #[error("invalid interval {value:?}: {reason}")]
    InvalidInterval { value: String, reason: String },
}

/// Failures talking to the object-storage provider.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage request to {endpoint} failed: {source}")]
    Transport {
        endpoint: &'static str,
        #[source]
        source: reqwest::Error,
    },

    /// The provider answered with a non-success status and an error document.
    #[error("storage API {endpoint} returned {status} ({code}): {message}")]
    Api {
        endpoint: &'static str,
        status: u16,
        code: String,
        message: String,
    },

    #[error("authorization failed: {0}")]
    Unauthorized(String),

    #[error("failed to read object body: {0}")]
    Body(String),

    #[error("operation cancelled")]
    Cancelled,
}

impl StorageError {
    /// True when the provider reported that the requested bucket does not exist.
    pub fn is_not_found(&self) -> bool {
        match self {
            StorageError::Api { status, code, .. } => *status == 404 || code == "not_found",
            _ => false,
        }
    }

    /// True when a previously issued token was rejected. A fresh
    /// `b2_authorize_account` clears it.
    pub fn is_expired_auth(&self) -> bool {
        matches!(
            self,
            StorageError::Api { status: 401, code, .. }
                if code == "expired_auth_token" || code == "bad_auth_token"
        )
    }
}

/// Failures while fetching the source image.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("unable to get image at {url}: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("unable to get image at {url}: server returned {status}")]
    Status { url: String, status: u16 },

    #[error("fetch cancelled")]
    Cancelled,
}

/// Why a single fetch-and-store cycle was abandoned.
#[derive(Debug, Error)]
pub enum CycleError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl CycleError {
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            CycleError::Fetch(FetchError::Cancelled) | CycleError::Storage(StorageError::Cancelled)
        )
    }
}
