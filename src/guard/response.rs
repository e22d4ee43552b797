//! Rendering refusals as HTTP responses.

use super::Verdict;
use http::header::{CONTENT_TYPE, RETRY_AFTER};
use http::{HeaderValue, Response, StatusCode};
use serde_json::json;

const PROBLEM_JSON: &str = "application/problem+json";
const HTML: &str = "text/html; charset=utf-8";

impl Verdict {
    /// The response that refuses this request, or `None` when it may proceed.
    ///
    /// Denials become 403; bans and rate limits become 429 with
    /// `Retry-After` when the wait is known. JSON clients get an RFC 9457
    /// problem document, everyone else a minimal HTML page.
    pub fn into_response(self, accept_json: bool) -> Option<Response<String>> {
        let (status, detail, blocking_filter, retry_after) = match self {
            Verdict::Excluded(_) | Verdict::Allowed { .. } => return None,
            Verdict::Denied { decision, .. } => (
                StatusCode::FORBIDDEN,
                decision.reason.unwrap_or_else(|| "Access denied".into()),
                decision.blocking_filter.map(|c| c.as_str()),
                None,
            ),
            Verdict::Banned { retry_after, .. } => (
                StatusCode::TOO_MANY_REQUESTS,
                "Too many denied requests; access is temporarily blocked".to_string(),
                None,
                retry_after,
            ),
            Verdict::RateLimited { retry_after } => (
                StatusCode::TOO_MANY_REQUESTS,
                "Request rate exceeded".to_string(),
                None,
                Some(retry_after),
            ),
        };

        let title = status.canonical_reason().unwrap_or("Error");
        let (body, content_type) = if accept_json {
            let problem = json!({
                "type": "about:blank",
                "title": title,
                "status": status.as_u16(),
                "detail": detail,
                "blocking_filter": blocking_filter,
            });
            (problem.to_string(), PROBLEM_JSON)
        } else {
            (html_page(status, title, &detail), HTML)
        };

        let mut response = Response::new(body);
        *response.status_mut() = status;
        response
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
        if let Some(secs) = retry_after {
            response.headers_mut().insert(RETRY_AFTER, HeaderValue::from(secs));
        }
        Some(response)
    }
}

fn html_page(status: StatusCode, title: &str, detail: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\"><title>{code} {title}</title></head>\
         <body><h1>{title}</h1><p>{detail}</p></body></html>\n",
        code = status.as_u16(),
        title = escape_html(title),
        detail = escape_html(detail),
    )
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
