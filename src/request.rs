//! Framework-neutral view of an inbound request.

use geoguard_rules::{is_public_ip, parse_ip};
use http::header::{ACCEPT, COOKIE, USER_AGENT};
use http::{HeaderMap, HeaderName, HeaderValue};
use std::net::IpAddr;

/// The parts of a request the guard looks at.
#[derive(Debug, Clone, Default)]
pub struct RequestInfo {
    pub path: String,
    /// Raw query string without the leading `?`.
    pub query: Option<String>,
    pub headers: HeaderMap,
    /// Transport-level peer address.
    pub remote_addr: Option<IpAddr>,
    /// Session id supplied by the host; falls back to the session cookie.
    pub session_id: Option<String>,
}

impl RequestInfo {
    pub fn new(path: impl Into<String>, remote_addr: Option<IpAddr>) -> Self {
        let path = path.into();
        let (path, query) = match path.split_once('?') {
            Some((p, q)) => (p.to_string(), Some(q.to_string())),
            None => (path, None),
        };
        Self {
            path,
            query,
            remote_addr,
            ..Self::default()
        }
    }

    /// Build from `http` request parts.
    pub fn from_parts(parts: &http::request::Parts, remote_addr: Option<IpAddr>) -> Self {
        Self {
            path: parts.uri.path().to_string(),
            query: parts.uri.query().map(str::to_string),
            headers: parts.headers.clone(),
            remote_addr,
            session_id: None,
        }
    }

    /// Add a header. Invalid names or values are dropped.
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            self.headers.append(name, value);
        }
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// The `User-Agent` header.
    ///
    /// `Err` when the header is present but not visible ASCII.
    pub fn user_agent(&self) -> Result<Option<&str>, http::header::ToStrError> {
        self.headers.get(USER_AGENT).map(|v| v.to_str()).transpose()
    }

    /// First value of query parameter `name`, percent-decoded.
    pub fn query_param(&self, name: &str) -> Option<String> {
        let query = self.query.as_deref()?;
        url::form_urlencoded::parse(query.as_bytes())
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.into_owned())
    }

    /// Value of cookie `name` from every `Cookie` header.
    pub fn cookie(&self, name: &str) -> Option<String> {
        self.headers
            .get_all(COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(k, _)| k.trim() == name)
            .map(|(_, v)| v.trim().trim_matches('"').to_string())
            .filter(|v| !v.is_empty())
    }

    /// Session id from the host, else from cookie `cookie_name`.
    pub fn session(&self, cookie_name: &str) -> Option<String> {
        self.session_id
            .clone()
            .filter(|s| !s.is_empty())
            .or_else(|| self.cookie(cookie_name))
    }

    /// Whether the client prefers a JSON response.
    pub fn accepts_json(&self) -> bool {
        self.headers
            .get(ACCEPT)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|accept| {
                let accept = accept.to_ascii_lowercase();
                accept.contains("application/json") || accept.contains("+json")
            })
    }

    /// Determine the client address.
    ///
    /// Trusted headers are consulted in order. A header may carry several
    /// addresses (`X-Forwarded-For` style, or `Forwarded: for=`); the first
    /// public one wins, else the first valid one. Without a usable header the
    /// transport address is returned.
    pub fn client_ip(&self, trusted_headers: &[String]) -> Option<IpAddr> {
        for header in trusted_headers {
            let candidates: Vec<IpAddr> = self
                .headers
                .get_all(header.as_str())
                .iter()
                .filter_map(|v| v.to_str().ok())
                .flat_map(header_candidates)
                .collect();

            if let Some(ip) = candidates.iter().find(|ip| is_public_ip(ip)) {
                return Some(*ip);
            }
            if let Some(ip) = candidates.first() {
                return Some(*ip);
            }
        }
        self.remote_addr
    }
}

/// Addresses listed in one header value.
fn header_candidates(value: &str) -> Vec<IpAddr> {
    value
        .split([',', ';', ' ', '\t'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter_map(|token| {
            let lower = token.to_ascii_lowercase();
            let token = match lower.strip_prefix("for=") {
                Some(_) => &token[4..],
                None if lower.contains('=') => return None,
                None => token,
            };
            parse_forwarded_node(token.trim_matches('"'))
        })
        .collect()
}

/// Parse `1.2.3.4`, `1.2.3.4:8080`, `[2001:db8::1]` or `[2001:db8::1]:443`.
fn parse_forwarded_node(node: &str) -> Option<IpAddr> {
    if let Some(ip) = parse_ip(node) {
        return Some(ip);
    }
    if let Some(rest) = node.strip_prefix('[') {
        let (addr, _) = rest.split_once(']')?;
        return parse_ip(addr);
    }
    let (addr, port) = node.rsplit_once(':')?;
    if port.chars().all(|c| c.is_ascii_digit()) && !addr.contains(':') {
        return parse_ip(addr);
    }
    None
}
