//! Top-level error type.
//!
//! Subsystems keep their own error enums ([`ConfigError`], [`StorageError`],
//! [`ProviderError`](crate::provider::ProviderError),
//! [`FilterError`](crate::filter::FilterError)). `GuardError` is what
//! construction of a [`Guard`](crate::guard::Guard) can fail with; the
//! request path itself never returns an error.

use crate::config::ConfigError;
use crate::storage::StorageError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GuardError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl GuardError {
    /// Get a static error code string for metrics labeling.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Config(e) => e.error_code(),
            Self::Storage(e) => e.error_code(),
        }
    }
}

/// Convenience alias for guard construction results.
pub type GuardResult<T> = Result<T, GuardError>;
