//! Context resolution against stubbed providers.

mod common;

use common::{ipapi_body, ipapi_provider, resolver_config, stub_ok};
use geoguard::provider::{Admission, ProviderError};
use geoguard::resolver::{
    ContextCache, GeoContextResolver, MemoryContextCache, ResolveOptions, cache_key,
};
use geoguard::RequestInfo;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn ip(s: &str) -> IpAddr {
    s.parse().unwrap()
}

#[tokio::test]
async fn breaker_opens_after_three_failures_and_probes_after_cooldown() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/json/8.8.8.8"))
        .respond_with(ResponseTemplate::new(500))
        // Three failures, nothing while open, one probe after cooldown.
        .expect(4)
        .mount(&server)
        .await;

    let resolver = GeoContextResolver::new(
        resolver_config(),
        &[ipapi_provider("primary", &server, "json")],
        Arc::new(MemoryContextCache::new(16)),
    )
    .unwrap();

    for _ in 0..3 {
        let err = resolver.lookup(ip("8.8.8.8"), Some("primary")).await.unwrap_err();
        assert_eq!(err, ProviderError::Http(500));
    }

    let err = resolver.lookup(ip("8.8.8.8"), Some("primary")).await.unwrap_err();
    assert_eq!(err.error_code(), "circuit_open");
    assert_eq!(resolver.breaker().state("primary").failures, 3);

    tokio::time::sleep(Duration::from_millis(1100)).await;

    let err = resolver.lookup(ip("8.8.8.8"), Some("primary")).await.unwrap_err();
    assert_eq!(err, ProviderError::Http(500));
    // The failed probe reopened the circuit.
    assert_eq!(resolver.breaker().admit("primary"), Admission::Rejected);
}

#[tokio::test]
async fn fallback_caches_under_the_answering_provider() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/primary/8.8.8.8"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;
    stub_ok(&server, "secondary", "8.8.8.8", ipapi_body("8.8.8.8", "DE")).await;

    let cache = Arc::new(MemoryContextCache::new(16));
    let config = geoguard::config::ResolverConfig {
        fallback: true,
        ..resolver_config()
    };
    let resolver = GeoContextResolver::new(
        config,
        &[
            ipapi_provider("primary", &server, "primary"),
            ipapi_provider("secondary", &server, "secondary"),
        ],
        cache.clone(),
    )
    .unwrap();

    let request = RequestInfo::new("/", Some(ip("8.8.8.8")));
    let ctx = resolver
        .resolve(&request, &ResolveOptions::default())
        .await
        .unwrap();
    assert_eq!(ctx.country_code.as_deref(), Some("DE"));

    let secondary_key = cache_key("secondary", "8.8.8.8", None);
    let primary_key = cache_key("primary", "8.8.8.8", None);
    assert_eq!(cache.get(&secondary_key).await, Some(ctx));
    assert_eq!(cache.get(&primary_key).await, None);
}

#[tokio::test]
async fn without_fallback_a_failure_resolves_to_none() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/primary/8.8.8.8"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/secondary/8.8.8.8"))
        .respond_with(ResponseTemplate::new(200).set_body_json(ipapi_body("8.8.8.8", "DE")))
        .expect(0)
        .mount(&server)
        .await;

    let resolver = GeoContextResolver::new(
        resolver_config(),
        &[
            ipapi_provider("primary", &server, "primary"),
            ipapi_provider("secondary", &server, "secondary"),
        ],
        Arc::new(MemoryContextCache::new(16)),
    )
    .unwrap();

    let request = RequestInfo::new("/", Some(ip("8.8.8.8")));
    assert_eq!(resolver.resolve(&request, &ResolveOptions::default()).await, None);
}

#[tokio::test]
async fn cache_hit_skips_the_provider() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/json/1.1.1.1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(ipapi_body("1.1.1.1", "AU")))
        .expect(1)
        .mount(&server)
        .await;

    let resolver = GeoContextResolver::new(
        resolver_config(),
        &[ipapi_provider("ipapi", &server, "json")],
        Arc::new(MemoryContextCache::new(16)),
    )
    .unwrap();

    let request = RequestInfo::new("/", Some(ip("1.1.1.1")));
    let first = resolver.resolve(&request, &ResolveOptions::default()).await;
    let second = resolver.resolve(&request, &ResolveOptions::default()).await;
    assert!(first.is_some());
    assert_eq!(first, second);
}

#[tokio::test]
async fn route_forced_provider_wins() {
    let server = MockServer::start().await;
    stub_ok(&server, "a", "9.9.9.9", ipapi_body("9.9.9.9", "CH")).await;
    stub_ok(&server, "b", "9.9.9.9", ipapi_body("9.9.9.9", "NL")).await;

    let config = geoguard::config::ResolverConfig {
        default_provider: Some("a".into()),
        ..resolver_config()
    };
    let resolver = GeoContextResolver::new(
        config,
        &[ipapi_provider("a", &server, "a"), ipapi_provider("b", &server, "b")],
        Arc::new(MemoryContextCache::new(16)),
    )
    .unwrap();

    let request = RequestInfo::new("/", Some(ip("9.9.9.9")));
    let options = ResolveOptions {
        force_provider: Some("b"),
        provider: Some("a"),
        cache_ttl: Some(5),
    };
    let ctx = resolver.resolve(&request, &options).await.unwrap();
    assert_eq!(ctx.country_code.as_deref(), Some("NL"));
}

#[tokio::test]
async fn transient_failure_is_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/json/8.8.8.8"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    stub_ok(&server, "json", "8.8.8.8", ipapi_body("8.8.8.8", "US")).await;

    let config = geoguard::config::ResolverConfig {
        retries: 1,
        ..resolver_config()
    };
    let resolver = GeoContextResolver::new(
        config,
        &[ipapi_provider("ipapi", &server, "json")],
        Arc::new(MemoryContextCache::new(16)),
    )
    .unwrap();

    let ctx = resolver.lookup(ip("8.8.8.8"), None).await.unwrap();
    assert_eq!(ctx.country_code.as_deref(), Some("US"));
    assert_eq!(resolver.breaker().state("ipapi").failures, 0);
}

#[tokio::test]
async fn rejected_lookup_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/json/8.8.8.8"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({"status": "fail", "message": "quota"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let config = geoguard::config::ResolverConfig {
        retries: 2,
        ..resolver_config()
    };
    let resolver = GeoContextResolver::new(
        config,
        &[ipapi_provider("ipapi", &server, "json")],
        Arc::new(MemoryContextCache::new(16)),
    )
    .unwrap();

    let err = resolver.lookup(ip("8.8.8.8"), None).await.unwrap_err();
    assert_eq!(err.error_code(), "rejected");
}

#[tokio::test]
async fn private_client_is_looked_up_by_public_address() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/ip"))
        .respond_with(ResponseTemplate::new(200).set_body_string("8.8.4.4\n"))
        .expect(1)
        .mount(&server)
        .await;
    stub_ok(&server, "json", "8.8.4.4", ipapi_body("8.8.4.4", "US")).await;

    let config = geoguard::config::ResolverConfig {
        public_ip_url: Some(format!("{}/ip", server.uri())),
        ..resolver_config()
    };
    let cache = Arc::new(MemoryContextCache::new(16));
    let resolver = GeoContextResolver::new(
        config,
        &[ipapi_provider("ipapi", &server, "json")],
        cache.clone(),
    )
    .unwrap();

    let request = RequestInfo::new("/", Some(ip("10.0.0.7")));
    let ctx = resolver
        .resolve(&request, &ResolveOptions::default())
        .await
        .unwrap();
    assert_eq!(ctx.ip, "8.8.4.4");
    // Cached under the client's own identity.
    assert!(cache.get(&cache_key("ipapi", "10.0.0.7", None)).await.is_some());

    // The public address is discovered once.
    let other = RequestInfo::new("/", Some(ip("192.168.1.20")));
    assert!(resolver.resolve(&other, &ResolveOptions::default()).await.is_some());
}

#[tokio::test]
async fn failed_public_address_lookup_is_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/ip"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/ip"))
        .respond_with(ResponseTemplate::new(200).set_body_string("8.8.4.4"))
        .expect(1)
        .mount(&server)
        .await;
    stub_ok(&server, "json", "8.8.4.4", ipapi_body("8.8.4.4", "US")).await;

    let config = geoguard::config::ResolverConfig {
        public_ip_url: Some(format!("{}/ip", server.uri())),
        ..resolver_config()
    };
    let resolver = GeoContextResolver::new(
        config,
        &[ipapi_provider("ipapi", &server, "json")],
        Arc::new(MemoryContextCache::new(16)),
    )
    .unwrap();

    // Echo service down: the private address goes to the provider as is.
    let first = RequestInfo::new("/", Some(ip("10.0.0.7")));
    assert_eq!(resolver.resolve(&first, &ResolveOptions::default()).await, None);

    // Echo service back: the next private client is resolved publicly.
    let second = RequestInfo::new("/", Some(ip("192.168.1.20")));
    let ctx = resolver
        .resolve(&second, &ResolveOptions::default())
        .await
        .unwrap();
    assert_eq!(ctx.ip, "8.8.4.4");

    // Found once, kept from then on.
    let third = RequestInfo::new("/", Some(ip("172.16.0.9")));
    assert!(resolver.resolve(&third, &ResolveOptions::default()).await.is_some());
}

#[tokio::test]
async fn session_identity_keys_the_cache() {
    let server = MockServer::start().await;
    stub_ok(&server, "json", "8.8.8.8", ipapi_body("8.8.8.8", "US")).await;

    let config = geoguard::config::ResolverConfig {
        cache_key_strategy: geoguard::config::CacheKeyStrategy::Session,
        ..resolver_config()
    };
    let cache = Arc::new(MemoryContextCache::new(16));
    let resolver = GeoContextResolver::new(
        config,
        &[ipapi_provider("ipapi", &server, "json")],
        cache.clone(),
    )
    .unwrap();

    let request = RequestInfo::new("/", Some(ip("8.8.8.8"))).with_header("cookie", "session=abc123");
    resolver
        .resolve(&request, &ResolveOptions::default())
        .await
        .unwrap();
    assert!(cache.get("ctx_ipapi_sess_abc123").await.is_some());
}
