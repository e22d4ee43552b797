//! Configuration loading and management.
//!
//! This module is split into logical submodules:
//! - [`types`]: the root [`Config`] and [`ConfigError`]
//! - [`resolver`]: geo resolution settings and provider declarations
//! - [`filters`]: per-category filter settings and priorities
//! - [`guard`]: storage, bans, rate limiting, simulate mode and exclusions
//! - [`overrides`]: per-route overrides merged over the global settings
//! - [`validation`]: startup validation returning every problem at once

pub mod defaults;
mod filters;
mod guard;
mod overrides;
mod resolver;
mod types;
pub mod validation;

pub use filters::{FilterSettings, FiltersConfig};
pub use guard::{
    BanConfig, BanKeyStrategy, ExclusionConfig, RateLimitConfig, SimulateConfig, StorageConfig,
};
pub use overrides::{FilterOverride, FilterOverrides, RouteOverride};
pub use resolver::{CacheKeyStrategy, ContextCacheBackend, ProviderConfig, ResolverConfig};
pub use types::{Config, ConfigError};
