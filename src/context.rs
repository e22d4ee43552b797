//! Resolved geolocation context.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// What a provider knows about a client address.
///
/// Produced once per resolution and cached under the provider/identity key.
/// Every field besides `ip` is optional: providers omit what they do not know.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GeoContext {
    pub ip: String,
    #[serde(default)]
    pub country: Option<String>,
    /// ISO 3166-1 alpha-2 code.
    #[serde(default, alias = "countryCode")]
    pub country_code: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default, alias = "lat")]
    pub latitude: Option<f64>,
    #[serde(default, alias = "lon")]
    pub longitude: Option<f64>,
    #[serde(default)]
    pub isp: Option<String>,
    #[serde(default)]
    pub asn: Option<String>,
    /// Anonymizing proxy, VPN or Tor exit.
    #[serde(default)]
    pub proxy: Option<bool>,
    /// Datacenter or hosting network.
    #[serde(default)]
    pub hosting: Option<bool>,
    /// Untouched provider payload.
    #[serde(default)]
    pub raw: Value,
}

impl GeoContext {
    /// A context carrying nothing but the address, used when resolution
    /// failed and the chain must still run.
    pub fn unresolved(ip: impl Into<String>) -> Self {
        Self {
            ip: ip.into(),
            ..Self::default()
        }
    }

    /// Returns `true` when the address belongs to a proxy or hosting network.
    pub fn is_anonymized(&self) -> bool {
        self.proxy == Some(true) || self.hosting == Some(true)
    }

    /// Rebuild a context from a cache entry.
    ///
    /// Accepts the current shape as well as loosely typed legacy entries
    /// (`countryCode`, `lat`/`lon`, numbers stored as strings, booleans
    /// stored as `0`/`1`). Returns `None` only when the entry is not an
    /// object or lacks an IP.
    pub fn hydrate(value: &Value) -> Option<Self> {
        if let Ok(ctx) = serde_json::from_value::<GeoContext>(value.clone())
            && !ctx.ip.is_empty()
        {
            return Some(ctx);
        }

        let obj = value.as_object()?;
        let ip = lenient_string(obj.get("ip")?)?;
        let pick = |keys: &[&str]| keys.iter().find_map(|k| obj.get(*k));

        Some(Self {
            ip,
            country: pick(&["country"]).and_then(lenient_string),
            country_code: pick(&["country_code", "countryCode"]).and_then(lenient_string),
            region: pick(&["region", "regionName"]).and_then(lenient_string),
            city: pick(&["city"]).and_then(lenient_string),
            latitude: pick(&["latitude", "lat"]).and_then(lenient_f64),
            longitude: pick(&["longitude", "lon", "lng"]).and_then(lenient_f64),
            isp: pick(&["isp"]).and_then(lenient_string),
            asn: pick(&["asn", "as"]).and_then(lenient_string),
            proxy: pick(&["proxy"]).and_then(lenient_bool),
            hosting: pick(&["hosting"]).and_then(lenient_bool),
            raw: obj.get("raw").cloned().unwrap_or(Value::Null),
        })
    }
}

fn lenient_string(v: &Value) -> Option<String> {
    match v {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn lenient_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn lenient_bool(v: &Value) -> Option<bool> {
    match v {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_i64().map(|i| i != 0),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" => Some(true),
            "0" | "false" | "no" | "" => Some(false),
            _ => None,
        },
        _ => None,
    }
}
