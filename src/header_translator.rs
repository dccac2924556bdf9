/*
 * Copyright (C) 2025 Jakub Žitník
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 */

//! Bidirectional header translation between the client and the upstream
//! origin: hop-by-hop stripping, cookie name de/prefixing, and the fixed
//! CSP replacement policy.

use axum::http::{HeaderMap, HeaderName, HeaderValue};

use crate::cookie::{self, CookieParseError};
use crate::model::Origin;

// `accept-encoding` is stripped rather than forwarded: this crate's
// `reqwest` dependency enables no decompression feature (`gzip`/`brotli`/
// `deflate`), so an upstream honoring the client's encoding preference would
// hand back a compressed body the dispatcher has no way to inflate before
// the body handler treats it as text.
const DROP_REQUEST_HEADERS: &[&str] = &[
    "content-length",
    "content-encoding",
    "transfer-encoding",
    "accept-encoding",
];
// `content-length` is deliberately NOT dropped here: it is only invalid once
// the body handler rewrites a textual body, at which point the body handler
// itself removes it. Binary bodies are piped through verbatim and need the
// upstream's original value preserved (end-to-end scenario 3).
const DROP_RESPONSE_HEADERS: &[&str] = &["content-encoding", "transfer-encoding", "connection"];

/// `proxyTargets`, with one or more leading underscores, is the family of
/// cookie names the translator treats specially.
fn is_proxy_targets_cookie(name: &str) -> bool {
    name.trim_start_matches('_') == "proxyTargets"
}

/// Client → upstream header rewrite.
pub fn translate_request_headers(headers: &HeaderMap, origin: &Origin) -> HeaderMap {
    let mut out = HeaderMap::with_capacity(headers.len());

    for (name, value) in headers.iter() {
        let lower = name.as_str().to_ascii_lowercase();

        if DROP_REQUEST_HEADERS.contains(&lower.as_str()) {
            continue;
        }

        if lower == "host" || lower == "origin" {
            if let Some(authority) = strip_scheme(origin.as_str()) {
                if let Ok(v) = HeaderValue::from_str(authority) {
                    out.append(name.clone(), v);
                    continue;
                }
            }
            continue;
        }

        if lower == "cookie" {
            if let Ok(raw) = value.to_str() {
                let rewritten = translate_request_cookie_header(raw);
                if !rewritten.is_empty() {
                    if let Ok(v) = HeaderValue::from_str(&rewritten) {
                        out.append(name.clone(), v);
                    }
                }
            }
            continue;
        }

        out.append(name.clone(), value.clone());
    }

    out
}

fn strip_scheme(origin: &str) -> Option<&str> {
    origin
        .split_once("://")
        .map(|(_, authority)| authority)
        .or(Some(origin))
}

/// Drop `proxyTargets`, un-prefix `_+proxyTargets`, forward the rest.
fn translate_request_cookie_header(raw: &str) -> String {
    cookie::parse_request_cookies(raw)
        .into_iter()
        .filter_map(|(name, value)| {
            if name == "proxyTargets" {
                return None;
            }
            if is_proxy_targets_cookie(&name) && name.starts_with('_') {
                let unprefixed = name[1..].to_string();
                return Some(format!("{unprefixed}={value}"));
            }
            Some(format!("{name}={value}"))
        })
        .collect::<Vec<_>>()
        .join("; ")
}

pub const CSP_TEMPLATE: &str = "default-src 'self' data: 'unsafe-inline' 'unsafe-eval' https:; script-src 'self' data: 'unsafe-inline' 'unsafe-eval' https: blob:; style-src 'self' data: 'unsafe-inline' https:; img-src 'self' data: https: blob:; font-src 'self' data: https:; connect-src 'self' data: https: wss: blob:; media-src 'self' data: https: blob:; object-src 'self' https:; child-src 'self' https: data: blob:; form-action 'self' https:; report-uri http://{proxy_host}/debug/csp";

pub fn csp_policy(proxy_host: &str) -> String {
    CSP_TEMPLATE.replace("{proxy_host}", proxy_host)
}

/// Upstream → client header rewrite. Returns the translated headers; any
/// `Set-Cookie` values that fail to parse are dropped (and reported via the
/// `dropped` out-parameter for the caller to log).
pub fn translate_response_headers(
    headers: &HeaderMap,
    proxy_host: &str,
    dropped: &mut Vec<CookieParseError>,
) -> HeaderMap {
    let mut out = HeaderMap::with_capacity(headers.len() + 1);

    for (name, value) in headers.iter() {
        let lower = name.as_str().to_ascii_lowercase();

        if DROP_RESPONSE_HEADERS.contains(&lower.as_str()) {
            continue;
        }

        if lower == "set-cookie" {
            let Ok(raw) = value.to_str() else { continue };
            match translate_set_cookie(raw, proxy_host) {
                Ok(rewritten) => {
                    if let Ok(v) = HeaderValue::from_str(&rewritten) {
                        out.append(HeaderName::from_static("set-cookie"), v);
                    }
                }
                Err(e) => dropped.push(e),
            }
            continue;
        }

        if lower == "content-security-policy" || lower == "content-security-policy-report-only" {
            if let Ok(v) = HeaderValue::from_str(&csp_policy(proxy_host)) {
                out.append(name.clone(), v);
            }
            continue;
        }

        out.append(name.clone(), value.clone());
    }

    out.insert(
        HeaderName::from_static("access-control-allow-origin"),
        HeaderValue::from_static("*"),
    );

    out
}

fn translate_set_cookie(raw: &str, proxy_host: &str) -> Result<String, CookieParseError> {
    let mut parsed = cookie::parse(raw)?;
    parsed.options.domain = Some(proxy_host.to_string());
    if is_proxy_targets_cookie(&parsed.name) {
        parsed.name = format!("_{}", parsed.name);
    }
    Ok(cookie::serialize(&parsed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn strips_hop_by_hop_request_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("content-length", HeaderValue::from_static("10"));
        headers.insert("accept", HeaderValue::from_static("*/*"));
        let out = translate_request_headers(&headers, &Origin::new("https://example.com"));
        assert!(!out.contains_key("content-length"));
        assert!(out.contains_key("accept"));
    }

    #[test]
    fn rewrites_host_and_origin() {
        let mut headers = HeaderMap::new();
        headers.insert("host", HeaderValue::from_static("proxy.local"));
        headers.insert("origin", HeaderValue::from_static("http://proxy.local"));
        let out = translate_request_headers(&headers, &Origin::new("https://example.com"));
        assert_eq!(out.get("host").unwrap(), "example.com");
        assert_eq!(out.get("origin").unwrap(), "example.com");
    }

    #[test]
    fn drops_proxy_targets_cookie_and_unprefixes_underscored() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "cookie",
            HeaderValue::from_static("proxyTargets=[\"x\"]; _proxyTargets=foo; session=abc"),
        );
        let out = translate_request_headers(&headers, &Origin::new("https://example.com"));
        let cookie = out.get("cookie").unwrap().to_str().unwrap();
        assert!(!cookie.contains("proxyTargets=[\"x\"]"));
        assert!(cookie.contains("proxyTargets=foo"));
        assert!(cookie.contains("session=abc"));
    }

    #[test]
    fn response_headers_get_fixed_csp_and_cors() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "content-security-policy",
            HeaderValue::from_static("default-src 'none'"),
        );
        let mut dropped = Vec::new();
        let out = translate_response_headers(&headers, "localhost:3000", &mut dropped);
        let csp = out.get("content-security-policy").unwrap().to_str().unwrap();
        assert!(csp.contains("http://localhost:3000/debug/csp"));
        assert_eq!(out.get("access-control-allow-origin").unwrap(), "*");
    }

    #[test]
    fn set_cookie_rewrites_domain_and_prefixes_name() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "set-cookie",
            HeaderValue::from_static("proxyTargets=abc; Domain=example.com; Path=/"),
        );
        let mut dropped = Vec::new();
        let out = translate_response_headers(&headers, "localhost:3000", &mut dropped);
        let sc = out.get("set-cookie").unwrap().to_str().unwrap();
        assert!(sc.starts_with("_proxyTargets=abc"));
        assert!(sc.contains("Domain=localhost:3000"));
        assert!(dropped.is_empty());
    }

    #[test]
    fn malformed_set_cookie_is_dropped_not_fatal() {
        let mut headers = HeaderMap::new();
        headers.insert("set-cookie", HeaderValue::from_static("justaname"));
        let mut dropped = Vec::new();
        let out = translate_response_headers(&headers, "localhost:3000", &mut dropped);
        assert!(!out.contains_key("set-cookie"));
        assert_eq!(dropped.len(), 1);
    }
}
