//! geoguard - request-time geo and reputation access control.
//!
//! Given an inbound request, the [`Guard`] resolves the client's
//! geolocation through HTTP providers, runs a priority-ordered chain of
//! filters (user agent, country, IP, crawler, VPN) and returns a
//! [`Verdict`]. Denials count as attempts against the client's bucket and
//! escalate to bans stored in one of several backends.
//!
//! The crate is framework neutral: requests come in as [`RequestInfo`] and
//! refusals go out as `http::Response<String>`.

pub mod config;
pub mod context;
pub mod error;
pub mod filter;
pub mod guard;
pub mod metrics;
pub mod provider;
pub mod request;
pub mod resolver;
pub mod security;
pub mod storage;
pub mod telemetry;

pub use config::{Config, ConfigError, RouteOverride};
pub use context::GeoContext;
pub use error::{GuardError, GuardResult};
pub use geoguard_rules::{Category, Decision, DefaultBehavior};
pub use guard::{Guard, Verdict};
pub use request::RequestInfo;
pub use storage::{Storage, StorageError};
