//! Provider response mappers.
//!
//! Every mapper tolerates missing fields; only a body that is not an object
//! or one the provider marks as an error fails.

use super::{MapperKind, ProviderError};
use crate::context::GeoContext;
use serde_json::Value;
use std::net::IpAddr;

/// Map a provider body to a [`GeoContext`] for `ip`.
pub fn map(kind: MapperKind, body: &Value, ip: IpAddr) -> Result<GeoContext, ProviderError> {
    if !body.is_object() {
        return Err(ProviderError::InvalidBody("expected a JSON object".into()));
    }
    match kind {
        MapperKind::Findip => Ok(findip(body, ip)),
        MapperKind::IpApi => ipapi(body, ip),
        MapperKind::IpInfo => ipinfo(body, ip),
    }
}

fn text(v: Option<&Value>) -> Option<String> {
    match v? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn number(v: Option<&Value>) -> Option<f64> {
    match v? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn flag(v: Option<&Value>) -> Option<bool> {
    v?.as_bool()
}

/// `Some(true)` when any flag is set, `Some(false)` when at least one is
/// present, `None` when the provider said nothing.
fn any_flag<'a>(values: impl IntoIterator<Item = Option<&'a Value>>) -> Option<bool> {
    values
        .into_iter()
        .filter_map(flag)
        .reduce(|acc, f| acc || f)
}

/// Normalize `15169`, `"15169"` or `"AS15169 Google LLC"` to `AS15169`.
fn format_asn(raw: &str) -> Option<String> {
    let token = raw.split_whitespace().next()?;
    let digits = token
        .strip_prefix("AS")
        .or_else(|| token.strip_prefix("as"))
        .unwrap_or(token);
    (!digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())).then(|| format!("AS{digits}"))
}

fn upper(code: Option<String>) -> Option<String> {
    code.map(|c| c.to_ascii_uppercase())
}

fn findip(body: &Value, ip: IpAddr) -> GeoContext {
    let traits = body.get("traits");
    let at = |path: &str| body.pointer(path);

    let hosting = traits
        .and_then(|t| t.get("user_type"))
        .and_then(Value::as_str)
        .map(|t| t.eq_ignore_ascii_case("hosting"));

    GeoContext {
        ip: ip.to_string(),
        country: text(at("/country/names/en")),
        country_code: upper(text(at("/country/iso_code"))),
        region: text(at("/subdivisions/0/names/en")),
        city: text(at("/city/names/en")),
        latitude: number(at("/location/latitude")),
        longitude: number(at("/location/longitude")),
        isp: text(at("/traits/isp")).or_else(|| text(at("/traits/autonomous_system_organization"))),
        asn: text(at("/traits/autonomous_system_number")).and_then(|a| format_asn(&a)),
        proxy: any_flag([at("/traits/is_anonymous_proxy"), at("/traits/is_anonymous")]),
        hosting,
        raw: body.clone(),
    }
}

fn ipapi(body: &Value, ip: IpAddr) -> Result<GeoContext, ProviderError> {
    if body.get("status").and_then(Value::as_str) == Some("fail") {
        let message = text(body.get("message")).unwrap_or_else(|| "fail".into());
        return Err(ProviderError::Rejected(message));
    }

    Ok(GeoContext {
        ip: ip.to_string(),
        country: text(body.get("country")),
        country_code: upper(text(body.get("countryCode"))),
        region: text(body.get("regionName")),
        city: text(body.get("city")),
        latitude: number(body.get("lat")),
        longitude: number(body.get("lon")),
        isp: text(body.get("isp")),
        asn: text(body.get("as")).and_then(|a| format_asn(&a)),
        proxy: flag(body.get("proxy")),
        hosting: flag(body.get("hosting")),
        raw: body.clone(),
    })
}

fn ipinfo(body: &Value, ip: IpAddr) -> Result<GeoContext, ProviderError> {
    if let Some(error) = body.get("error") {
        let message = text(error.get("title"))
            .or_else(|| text(error.get("message")))
            .or_else(|| text(Some(error)))
            .unwrap_or_else(|| "error".into());
        return Err(ProviderError::Rejected(message));
    }

    let (latitude, longitude) = body
        .get("loc")
        .and_then(Value::as_str)
        .and_then(|loc| loc.split_once(','))
        .map(|(lat, lon)| (lat.trim().parse().ok(), lon.trim().parse().ok()))
        .unwrap_or((None, None));

    // "AS15169 Google LLC"
    let org = text(body.get("org"));
    let (org_asn, org_name) = match org.as_deref().map(|o| o.split_once(' ')) {
        Some(Some((head, tail))) if format_asn(head).is_some() => {
            (format_asn(head), Some(tail.trim().to_string()))
        }
        _ => (None, org.clone()),
    };

    let asn = text(body.pointer("/asn/asn"))
        .and_then(|a| format_asn(&a))
        .or(org_asn);
    let isp = text(body.pointer("/asn/name"))
        .or(org_name)
        .filter(|s| !s.is_empty());

    let privacy = body.get("privacy");
    let proxy = privacy.and_then(|p| any_flag([p.get("proxy"), p.get("vpn"), p.get("tor")]));
    let hosting = privacy.and_then(|p| flag(p.get("hosting")));

    Ok(GeoContext {
        ip: ip.to_string(),
        // ipinfo reports the ISO code in `country`.
        country: text(body.get("country_name")).or_else(|| text(body.get("country"))),
        country_code: upper(text(body.get("country"))),
        region: text(body.get("region")),
        city: text(body.get("city")),
        latitude,
        longitude,
        isp,
        asn,
        proxy,
        hosting,
        raw: body.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ip() -> IpAddr {
        "8.8.8.8".parse().unwrap()
    }

    #[test]
    fn test_findip() {
        let body = json!({
            "city": {"names": {"en": "Mountain View"}},
            "country": {"iso_code": "us", "names": {"en": "United States"}},
            "location": {"latitude": 37.386, "longitude": -122.0838},
            "subdivisions": [{"names": {"en": "California"}}],
            "traits": {
                "autonomous_system_number": 15169,
                "autonomous_system_organization": "GOOGLE",
                "user_type": "hosting",
                "is_anonymous_proxy": false
            }
        });
        let ctx = map(MapperKind::Findip, &body, ip()).unwrap();
        assert_eq!(ctx.country_code.as_deref(), Some("US"));
        assert_eq!(ctx.region.as_deref(), Some("California"));
        assert_eq!(ctx.asn.as_deref(), Some("AS15169"));
        assert_eq!(ctx.isp.as_deref(), Some("GOOGLE"));
        assert_eq!(ctx.hosting, Some(true));
        assert_eq!(ctx.proxy, Some(false));
        assert_eq!(ctx.latitude, Some(37.386));
    }

    #[test]
    fn test_ipapi() {
        let body = json!({
            "status": "success", "country": "Germany", "countryCode": "DE",
            "regionName": "Hesse", "city": "Frankfurt", "lat": 50.11, "lon": 8.68,
            "isp": "Hetzner", "as": "AS24940 Hetzner Online GmbH",
            "proxy": false, "hosting": true, "query": "8.8.8.8"
        });
        let ctx = map(MapperKind::IpApi, &body, ip()).unwrap();
        assert_eq!(ctx.country_code.as_deref(), Some("DE"));
        assert_eq!(ctx.asn.as_deref(), Some("AS24940"));
        assert!(ctx.is_anonymized());

        let fail = json!({"status": "fail", "message": "reserved range"});
        assert_eq!(
            map(MapperKind::IpApi, &fail, ip()),
            Err(ProviderError::Rejected("reserved range".into()))
        );
    }

    #[test]
    fn test_ipinfo() {
        let body = json!({
            "ip": "8.8.8.8", "city": "Mountain View", "region": "California",
            "country": "US", "loc": "37.4056,-122.0775", "org": "AS15169 Google LLC",
            "privacy": {"vpn": false, "proxy": false, "tor": true, "hosting": false}
        });
        let ctx = map(MapperKind::IpInfo, &body, ip()).unwrap();
        assert_eq!(ctx.country_code.as_deref(), Some("US"));
        assert_eq!(ctx.asn.as_deref(), Some("AS15169"));
        assert_eq!(ctx.isp.as_deref(), Some("Google LLC"));
        assert_eq!(ctx.latitude, Some(37.4056));
        assert_eq!(ctx.longitude, Some(-122.0775));
        assert_eq!(ctx.proxy, Some(true));
        assert_eq!(ctx.hosting, Some(false));

        let err = json!({"error": {"title": "Wrong ip", "message": "Please provide a valid IP"}});
        assert!(matches!(map(MapperKind::IpInfo, &err, ip()), Err(ProviderError::Rejected(_))));
    }

    #[test]
    fn test_sparse_bodies() {
        let ctx = map(MapperKind::IpInfo, &json!({}), ip()).unwrap();
        assert_eq!(ctx.ip, "8.8.8.8");
        assert_eq!(ctx.proxy, None);
        assert!(map(MapperKind::Findip, &json!([1, 2]), ip()).is_err());
    }
}
