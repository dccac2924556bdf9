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

//! Parses and serialises a single `Set-Cookie` header value per RFC 6265
//! §5.2. Canonical attribute spellings (`sameSite`, `httpOnly`, `maxAge`)
//! are recognised case-insensitively on input but always re-emitted with
//! their camel-case spelling.

use chrono::{DateTime, Utc};

use crate::model::{Cookie, CookieOptions, SameSite};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CookieParseError {
    #[error("empty Set-Cookie value")]
    Empty,
    #[error("missing '=' in cookie name=value pair")]
    MissingEquals,
    #[error("empty cookie name")]
    EmptyName,
}

/// Parse a single `Set-Cookie` header value.
pub fn parse(raw: &str) -> Result<Cookie, CookieParseError> {
    let mut segments = raw.split(';');
    let first = segments.next().ok_or(CookieParseError::Empty)?.trim();
    if first.is_empty() {
        return Err(CookieParseError::Empty);
    }
    let (name, value) = first.split_once('=').ok_or(CookieParseError::MissingEquals)?;
    let name = name.trim();
    if name.is_empty() {
        return Err(CookieParseError::EmptyName);
    }

    let mut options = CookieOptions::default();

    for segment in segments {
        let segment = segment.trim();
        if segment.is_empty() {
            continue;
        }
        let (attr_name, attr_value) = match segment.split_once('=') {
            Some((n, v)) => (n.trim(), Some(v.trim().to_string())),
            None => (segment, None),
        };

        match attr_name.to_ascii_lowercase().as_str() {
            "domain" => options.domain = attr_value,
            "path" => options.path = attr_value,
            "expires" => {
                options.expires = attr_value
                    .as_deref()
                    .and_then(parse_http_date);
            }
            "max-age" | "maxage" => {
                options.max_age = attr_value.as_deref().and_then(|v| v.parse::<i64>().ok());
            }
            "secure" => options.secure = true,
            "httponly" => options.http_only = true,
            "samesite" => {
                options.same_site = attr_value.as_deref().and_then(SameSite::parse);
            }
            other => options.extra.push((other.to_string(), attr_value)),
        }
    }

    Ok(Cookie {
        name: name.to_string(),
        value: value.trim().to_string(),
        options,
    })
}

fn parse_http_date(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(s)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            DateTime::parse_from_rfc3339(s)
                .map(|dt| dt.with_timezone(&Utc))
                .ok()
        })
}

fn format_http_date(dt: &DateTime<Utc>) -> String {
    dt.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// Serialise a `Cookie` back into a `Set-Cookie` header value.
pub fn serialize(cookie: &Cookie) -> String {
    let mut parts = vec![format!("{}={}", cookie.name, cookie.value)];

    if let Some(domain) = &cookie.options.domain {
        parts.push(format!("Domain={domain}"));
    }
    if let Some(path) = &cookie.options.path {
        parts.push(format!("Path={path}"));
    }
    if let Some(expires) = &cookie.options.expires {
        parts.push(format!("Expires={}", format_http_date(expires)));
    }
    if let Some(max_age) = cookie.options.max_age {
        parts.push(format!("Max-Age={max_age}"));
    }
    if cookie.options.secure {
        parts.push("Secure".to_string());
    }
    if cookie.options.http_only {
        parts.push("HttpOnly".to_string());
    }
    if let Some(same_site) = &cookie.options.same_site {
        parts.push(format!("SameSite={}", same_site.as_str()));
    }
    for (name, value) in &cookie.options.extra {
        match value {
            Some(v) => parts.push(format!("{name}={v}")),
            None => parts.push(name.clone()),
        }
    }

    parts.join("; ")
}

/// Decode the client-supplied `Cookie` header into `(name, value)` pairs.
pub fn parse_request_cookies(raw: &str) -> Vec<(String, String)> {
    raw.split(';')
        .filter_map(|part| {
            let part = part.trim();
            if part.is_empty() {
                return None;
            }
            let (name, value) = part.split_once('=')?;
            Some((name.trim().to_string(), value.trim().to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_name_value_only() {
        let c = parse("session=abc123").unwrap();
        assert_eq!(c.name, "session");
        assert_eq!(c.value, "abc123");
    }

    #[test]
    fn parses_full_attribute_set() {
        let c = parse(
            "id=42; Domain=example.com; Path=/; Max-Age=3600; Secure; HttpOnly; SameSite=Lax",
        )
        .unwrap();
        assert_eq!(c.options.domain.as_deref(), Some("example.com"));
        assert_eq!(c.options.path.as_deref(), Some("/"));
        assert_eq!(c.options.max_age, Some(3600));
        assert!(c.options.secure);
        assert!(c.options.http_only);
        assert_eq!(c.options.same_site, Some(SameSite::Lax));
    }

    #[test]
    fn preserves_unknown_attribute() {
        let c = parse("a=b; Priority=High").unwrap();
        assert_eq!(
            c.options.extra,
            vec![("priority".to_string(), Some("High".to_string()))]
        );
    }

    #[test]
    fn rejects_missing_equals() {
        assert_eq!(parse("justaname"), Err(CookieParseError::MissingEquals));
    }

    #[test]
    fn rejects_empty_input() {
        assert_eq!(parse(""), Err(CookieParseError::Empty));
    }

    #[test]
    fn roundtrips_through_translator_parser() {
        let original = parse("id=42; Path=/; Secure; HttpOnly; SameSite=None").unwrap();
        let serialized = serialize(&original);
        let reparsed = parse(&serialized).unwrap();
        assert_eq!(original, reparsed);
    }

    #[test]
    fn parses_request_cookie_header() {
        let pairs = parse_request_cookies("a=1; b=2; proxyTargets=%5B%5D");
        assert_eq!(
            pairs,
            vec![
                ("a".to_string(), "1".to_string()),
                ("b".to_string(), "2".to_string()),
                ("proxyTargets".to_string(), "%5B%5D".to_string()),
            ]
        );
    }
}
