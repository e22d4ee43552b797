//! Configuration validation.
//!
//! Validates configuration at startup to catch common errors early.

use super::Config;
use regex::Regex;
use std::collections::HashSet;
use thiserror::Error;

/// Validation errors for configuration.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("provider alias must not be empty")]
    EmptyProviderAlias,
    #[error("duplicate provider alias '{0}'")]
    DuplicateProvider(String),
    #[error("resolver.default_provider '{0}' is not a declared provider")]
    UnknownDefaultProvider(String),
    #[error("bans.max_attempts must be at least 1")]
    ZeroMaxAttempts,
    #[error("bans.duration '{0}' is not a valid duration")]
    InvalidBanDuration(String),
    #[error("rate_limit.{0} must be greater than 0")]
    ZeroRateLimit(&'static str),
    #[error("resolver.breaker_threshold must be at least 1")]
    ZeroBreakerThreshold,
    #[error("exclusions.paths entry '{0}' is not a valid regex")]
    InvalidExclusionRegex(String),
    #[error("filters.priority key '{0}' does not name a filter")]
    UnknownPriorityKey(String),
}

/// Validate a configuration, returning all errors found.
///
/// Provider DSNs and the storage DSN are checked by their own constructors.
pub fn validate(config: &Config) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let mut seen = HashSet::new();
    for provider in &config.providers {
        if provider.alias.trim().is_empty() {
            errors.push(ValidationError::EmptyProviderAlias);
        } else if !seen.insert(provider.alias.as_str()) {
            errors.push(ValidationError::DuplicateProvider(provider.alias.clone()));
        }
    }

    if let Some(ref alias) = config.resolver.default_provider
        && config.provider(alias).is_none()
    {
        errors.push(ValidationError::UnknownDefaultProvider(alias.clone()));
    }

    if config.resolver.breaker_threshold == 0 {
        errors.push(ValidationError::ZeroBreakerThreshold);
    }

    if config.bans.enabled {
        if config.bans.max_attempts == 0 {
            errors.push(ValidationError::ZeroMaxAttempts);
        }
        if crate::security::ban::parse_ban_duration(&config.bans.duration).is_none() {
            errors.push(ValidationError::InvalidBanDuration(config.bans.duration.clone()));
        }
    }

    if config.rate_limit.enabled {
        if config.rate_limit.requests_per_second == 0 {
            errors.push(ValidationError::ZeroRateLimit("requests_per_second"));
        }
        if config.rate_limit.burst == 0 {
            errors.push(ValidationError::ZeroRateLimit("burst"));
        }
    }

    for path in &config.exclusions.paths {
        if let Some(expr) = path.strip_prefix('~')
            && Regex::new(expr).is_err()
        {
            errors.push(ValidationError::InvalidExclusionRegex(path.clone()));
        }
    }

    for key in config.filters.priority.keys() {
        if crate::filter::category_for_key(key).is_none() {
            errors.push(ValidationError::UnknownPriorityKey(key.clone()));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
