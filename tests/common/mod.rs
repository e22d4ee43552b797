//! Integration test common infrastructure.
//!
//! Provider stubs on a local wiremock server and config builders that never
//! reach the network.

#![allow(dead_code)]

use geoguard::config::{Config, ProviderConfig, ResolverConfig};
use serde_json::{Value, json};
use std::collections::HashMap;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// An ip-api.com provider pointed at `server`.
pub fn ipapi_provider(alias: &str, server: &MockServer, prefix: &str) -> ProviderConfig {
    ProviderConfig {
        alias: alias.to_string(),
        dsn: format!("ipapi+{}/{prefix}/{{ip}}", server.uri()),
        variables: HashMap::new(),
    }
}

/// ip-api.com success body.
pub fn ipapi_body(ip: &str, country_code: &str) -> Value {
    json!({
        "status": "success",
        "query": ip,
        "country": country_code,
        "countryCode": country_code,
        "city": "Testville",
        "lat": 1.5,
        "lon": 2.5,
        "isp": "Test ISP",
        "as": "AS64500 Test Net",
        "proxy": false,
        "hosting": false
    })
}

/// Stub `GET /<prefix>/<ip>` with a JSON body.
pub async fn stub_ok(server: &MockServer, prefix: &str, ip: &str, body: Value) {
    Mock::given(method("GET"))
        .and(path(format!("/{prefix}/{ip}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

/// Resolver settings for tests: no retries, no public-IP lookup, short
/// breaker cooldown.
pub fn resolver_config() -> ResolverConfig {
    ResolverConfig {
        retries: 0,
        public_ip_url: None,
        breaker_threshold: 3,
        breaker_cooldown_secs: 1,
        request_timeout_secs: 2,
        read_timeout_secs: 2,
        ..ResolverConfig::default()
    }
}

/// A full config from TOML, with the test resolver settings forced in.
pub fn config(toml: &str, providers: Vec<ProviderConfig>) -> Config {
    let mut config = Config::from_toml(toml).expect("test config parses");
    let resolver = config.resolver.clone();
    config.resolver = ResolverConfig {
        default_provider: resolver.default_provider,
        fallback: resolver.fallback,
        cache_key_strategy: resolver.cache_key_strategy,
        trusted_headers: resolver.trusted_headers,
        block_on_error: resolver.block_on_error,
        ..resolver_config()
    };
    config.providers = providers;
    config
}
