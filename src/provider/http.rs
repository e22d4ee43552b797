//! Shared HTTP client for provider lookups and the public-IP echo service.

use super::ProviderError;
use crate::config::{ConfigError, ResolverConfig};
use reqwest::header::ACCEPT;
use serde_json::Value;
use std::net::IpAddr;
use std::time::Duration;
use tokio_retry::RetryIf;
use tokio_retry::strategy::ExponentialBackoff;
use tracing::debug;

const USER_AGENT: &str = concat!("geoguard/", env!("CARGO_PKG_VERSION"));

/// One pooled client with the resolver's timeouts and retry budget.
#[derive(Debug, Clone)]
pub struct ProviderHttp {
    client: reqwest::Client,
    retries: usize,
    public_ip_timeout: Duration,
}

impl ProviderHttp {
    pub fn new(config: &ResolverConfig) -> Result<Self, ConfigError> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .read_timeout(Duration::from_secs(config.read_timeout_secs))
            .build()
            .map_err(|e| ConfigError::HttpClient(e.to_string()))?;

        Ok(Self {
            client,
            retries: config.retries as usize,
            public_ip_timeout: Duration::from_secs(config.public_ip_timeout_secs),
        })
    }

    /// GET `url` and decode a JSON body, retrying retryable failures with
    /// exponential backoff (200ms, 400ms, ... capped at 2s).
    pub async fn get_json(&self, url: &str) -> Result<Value, ProviderError> {
        let strategy = ExponentialBackoff::from_millis(2)
            .factor(100)
            .max_delay(Duration::from_secs(2))
            .take(self.retries);

        RetryIf::spawn(strategy, || self.fetch(url), |e: &ProviderError| {
            let retry = e.is_retryable();
            if retry {
                debug!(code = %e.error_code(), "Retrying provider request");
            }
            retry
        })
        .await
    }

    async fn fetch(&self, url: &str) -> Result<Value, ProviderError> {
        let response = self
            .client
            .get(url)
            .header(ACCEPT, "application/json")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::Http(status.as_u16()));
        }

        let body = response.bytes().await?;
        serde_json::from_slice(&body).map_err(|e| ProviderError::InvalidBody(e.to_string()))
    }

    /// Ask an echo service for this host's public address.
    ///
    /// Accepts a plain-text body or `{"ip": "..."}`. Anything that is not a
    /// public address yields `None`.
    pub async fn public_ip(&self, url: &str) -> Option<IpAddr> {
        let response = match self
            .client
            .get(url)
            .timeout(self.public_ip_timeout)
            .send()
            .await
        {
            Ok(r) if r.status().is_success() => r,
            Ok(r) => {
                debug!(status = r.status().as_u16(), "Public IP lookup refused");
                return None;
            }
            Err(e) => {
                debug!(error = %e.without_url(), "Public IP lookup failed");
                return None;
            }
        };

        let text = response.text().await.ok()?;
        let text = text.trim();
        let candidate = if text.starts_with('{') {
            serde_json::from_str::<Value>(text)
                .ok()?
                .get("ip")?
                .as_str()?
                .trim()
                .to_string()
        } else {
            text.to_string()
        };

        let ip: IpAddr = candidate.parse().ok()?;
        geoguard_rules::is_public_ip(&ip).then_some(ip)
    }
}
