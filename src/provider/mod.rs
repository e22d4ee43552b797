//! Geolocation providers.
//!
//! A provider is an HTTP endpoint described by a DSN of the form
//! `<scheme>+<url template>`. The scheme picks the response mapper; the
//! template carries an `{ip}` placeholder plus any number of named
//! placeholders filled from the provider's `variables` table.
//!
//! ```text
//! findip+https://api.findip.net/{ip}/?token={token}
//! ipapi+http://ip-api.com/json/{ip}?fields=66846719
//! https://ipinfo.io/{ip}/json?token={token}        (ipinfo mapper)
//! ```

pub mod circuit;
pub mod http;
pub mod mapper;

pub use circuit::{Admission, BreakerState, CircuitBreaker};
pub use http::ProviderHttp;

use crate::config::{ConfigError, ProviderConfig};
use crate::context::GeoContext;
use crate::telemetry::ProviderTimer;
use regex::{Captures, Regex};
use std::borrow::Cow;
use std::net::IpAddr;
use std::sync::OnceLock;
use thiserror::Error;
use tracing::{debug, warn};

/// Response shape a provider speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapperKind {
    /// MaxMind-style documents (findip.net).
    Findip,
    /// ip-api.com.
    IpApi,
    /// ipinfo.io, also used when the DSN has no scheme.
    IpInfo,
}

impl MapperKind {
    fn from_scheme(scheme: &str) -> Option<Self> {
        match scheme.to_ascii_lowercase().as_str() {
            "findip" => Some(Self::Findip),
            "ipapi" => Some(Self::IpApi),
            "ipinfo" => Some(Self::IpInfo),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Findip => "findip",
            Self::IpApi => "ipapi",
            Self::IpInfo => "ipinfo",
        }
    }
}

/// A failed provider lookup.
///
/// Transport details never escape as anything but one of these variants.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    #[error("provider answered HTTP {0}")]
    Http(u16),
    #[error("provider timed out")]
    Timeout,
    #[error("transport error: {0}")]
    Transport(String),
    #[error("invalid response body: {0}")]
    InvalidBody(String),
    #[error("provider rejected the lookup: {0}")]
    Rejected(String),
    #[error("circuit open for provider '{0}'")]
    CircuitOpen(String),
    #[error("unknown provider '{0}'")]
    UnknownProvider(String),
}

impl ProviderError {
    /// Stable label for logs and metrics.
    pub fn error_code(&self) -> Cow<'static, str> {
        match self {
            Self::Http(status) => Cow::Owned(format!("http_{status}")),
            Self::Timeout => Cow::Borrowed("timeout"),
            Self::Transport(_) => Cow::Borrowed("transport"),
            Self::InvalidBody(_) => Cow::Borrowed("invalid_body"),
            Self::Rejected(_) => Cow::Borrowed("rejected"),
            Self::CircuitOpen(_) => Cow::Borrowed("circuit_open"),
            Self::UnknownProvider(_) => Cow::Borrowed("unknown_provider"),
        }
    }

    /// Transport failures, timeouts and 5xx answers are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http(status) => *status >= 500,
            Self::Timeout | Self::Transport(_) => true,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else if let Some(status) = e.status() {
            Self::Http(status.as_u16())
        } else if e.is_decode() {
            Self::InvalidBody(e.without_url().to_string())
        } else {
            Self::Transport(e.without_url().to_string())
        }
    }
}

fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("static regex"))
}

/// A validated provider.
#[derive(Debug, Clone)]
pub struct GeoProvider {
    alias: String,
    mapper: MapperKind,
    /// URL with every variable substituted; only `{ip}` remains.
    template: String,
}

impl GeoProvider {
    /// Validate a provider definition.
    ///
    /// Fails on an unknown scheme, a non-http(s) URL, a template without
    /// `{ip}` or a placeholder with no matching variable.
    pub fn from_config(config: &ProviderConfig) -> Result<Self, ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidProviderDsn {
            alias: config.alias.clone(),
            reason,
        };

        let dsn = config.dsn.trim();
        let (mapper, url) = match dsn.split_once('+') {
            Some((scheme, rest)) if !scheme.contains(['/', ':']) => {
                let mapper = MapperKind::from_scheme(scheme)
                    .ok_or_else(|| invalid(format!("unknown provider scheme '{scheme}'")))?;
                (mapper, rest)
            }
            _ => (MapperKind::IpInfo, dsn),
        };

        let mut has_ip = false;
        for caps in placeholder_re().captures_iter(url) {
            let name = &caps[1];
            if name == "ip" {
                has_ip = true;
            } else if !config.variables.contains_key(name) {
                return Err(ConfigError::MissingProviderVariable {
                    alias: config.alias.clone(),
                    variable: name.to_string(),
                });
            }
        }
        if !has_ip {
            return Err(invalid("URL template has no {ip} placeholder".into()));
        }

        let template = placeholder_re()
            .replace_all(url, |caps: &Captures| match &caps[1] {
                "ip" => "{ip}".to_string(),
                name => url::form_urlencoded::byte_serialize(config.variables[name].as_bytes())
                    .collect(),
            })
            .into_owned();

        let probe = url::Url::parse(&template.replace("{ip}", "127.0.0.1"))
            .map_err(|e| invalid(e.to_string()))?;
        if !matches!(probe.scheme(), "http" | "https") {
            return Err(invalid(format!("unsupported URL scheme '{}'", probe.scheme())));
        }

        Ok(Self {
            alias: config.alias.clone(),
            mapper,
            template,
        })
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    pub fn mapper(&self) -> MapperKind {
        self.mapper
    }

    /// The lookup URL for `ip`.
    pub fn url_for(&self, ip: IpAddr) -> String {
        self.template.replace("{ip}", &ip.to_string())
    }

    /// Query the provider for `ip`.
    pub async fn lookup(&self, http: &ProviderHttp, ip: IpAddr) -> Result<GeoContext, ProviderError> {
        let timer = ProviderTimer::new(&self.alias);

        let result = match http.get_json(&self.url_for(ip)).await {
            Ok(body) => mapper::map(self.mapper, &body, ip),
            Err(e) => Err(e),
        };

        match &result {
            Ok(ctx) => {
                debug!(
                    provider = %self.alias,
                    ip = %ip,
                    country = ctx.country_code.as_deref().unwrap_or("-"),
                    elapsed_ms = timer.elapsed_ms(),
                    "Provider lookup succeeded"
                );
                timer.finish("ok");
            }
            Err(e) => {
                warn!(
                    provider = %self.alias,
                    ip = %ip,
                    error = %e,
                    code = %e.error_code(),
                    elapsed_ms = timer.elapsed_ms(),
                    "Provider lookup failed"
                );
                timer.finish(e.error_code());
            }
        }

        result
    }
}
