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

//! Core data types shared across the proxy pipeline.

use std::time::Instant;

/// A scheme+authority pair, e.g. `https://example.com:8443`.
///
/// Equality is string-exact; no normalisation is performed anywhere in the
/// pipeline (callers are expected to have already lower-cased a scheme if
/// they care).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Origin(String);

impl Origin {
    pub fn new(raw: impl Into<String>) -> Self {
        Origin(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Origin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Origin {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// The `proxyTargets` cookie payload: an ordered, most-recent-first list of
/// origins a client has successfully reached through the proxy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OriginList(Vec<Origin>);

impl OriginList {
    pub fn empty() -> Self {
        OriginList(Vec::new())
    }

    /// Decode the cookie value. Absent or malformed input yields an empty
    /// list rather than an error, per the glue layer's contract.
    pub fn decode(raw: Option<&str>) -> Self {
        let Some(raw) = raw else {
            return Self::empty();
        };
        match serde_json::from_str::<Vec<String>>(raw) {
            Ok(entries) => OriginList(
                entries
                    .into_iter()
                    .filter(|s| !s.is_empty())
                    .map(Origin::new)
                    .collect(),
            ),
            Err(_) => Self::empty(),
        }
    }

    pub fn encode(&self) -> String {
        let raw: Vec<&str> = self.0.iter().map(Origin::as_str).collect();
        serde_json::to_string(&raw).unwrap_or_else(|_| "[]".to_string())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &Origin)> {
        self.0.iter().enumerate()
    }

    pub fn head(&self) -> Option<&Origin> {
        self.0.first()
    }

    /// Drop entries `[0, k)` — used when index `k` was promoted by a
    /// successful response.
    pub fn truncate_to(&mut self, k: usize) {
        if k == 0 || k > self.0.len() {
            return;
        }
        self.0.drain(0..k);
    }

    /// Insert `origin` at the head of the list, unless it is already there.
    pub fn prepend(&mut self, origin: Origin) {
        if self.0.first() != Some(&origin) {
            self.0.insert(0, origin);
        }
    }
}

/// The 4-tuple used only by the rate limiter. `origin` is the *target*
/// origin a candidate is being dispatched to (not the client's `Origin`
/// request header) — the limiter is checked once per candidate in the
/// dispatcher, so budgets are naturally scoped per upstream.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestFingerprint {
    pub client_ip: String,
    pub user_agent: String,
    pub origin: String,
    pub path: String,
}

/// One rate-limiter ledger entry.
#[derive(Debug, Clone)]
pub struct RecentRequest {
    pub fingerprint: RequestFingerprint,
    pub at: Instant,
}

/// One (origin, cookie-list-index) pair considered during fallback.
/// `list_index` is `None` for the spec's `-1` sentinel (not drawn from the
/// cookie list: absolute-in-path or fallback resolution).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub origin: Origin,
    pub list_index: Option<usize>,
}

/// `Strict | Lax | None`, or an attribute value the parser didn't recognise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SameSite {
    Strict,
    Lax,
    None,
}

impl SameSite {
    pub fn as_str(&self) -> &'static str {
        match self {
            SameSite::Strict => "Strict",
            SameSite::Lax => "Lax",
            SameSite::None => "None",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "strict" => Some(SameSite::Strict),
            "lax" => Some(SameSite::Lax),
            "none" => Some(SameSite::None),
            _ => None,
        }
    }
}

/// Attributes of a cookie, as produced by `CookieParser` and consumed by the
/// header translator. Unknown attribute names are preserved verbatim in
/// `extra` rather than being dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CookieOptions {
    pub domain: Option<String>,
    pub path: Option<String>,
    pub expires: Option<chrono::DateTime<chrono::Utc>>,
    pub max_age: Option<i64>,
    pub secure: bool,
    pub http_only: bool,
    pub same_site: Option<SameSite>,
    pub extra: Vec<(String, Option<String>)>,
}

/// A single `Set-Cookie` value, parsed into its name/value pair plus
/// attributes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub options: CookieOptions,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn origin_list_roundtrip() {
        let list = OriginList::decode(Some(r#"["https://a.example","https://b.example"]"#));
        assert_eq!(list.encode(), r#"["https://a.example","https://b.example"]"#);
    }

    #[test]
    fn origin_list_absent_is_empty() {
        assert!(OriginList::decode(None).is_empty());
    }

    #[test]
    fn origin_list_malformed_is_empty() {
        assert!(OriginList::decode(Some("not json")).is_empty());
    }

    #[test]
    fn origin_list_drops_empty_entries() {
        let list = OriginList::decode(Some(r#"["", "https://a.example"]"#));
        assert_eq!(list.encode(), r#"["https://a.example"]"#);
    }

    #[test]
    fn truncate_to_drops_prefix() {
        let mut list = OriginList::decode(Some(
            r#"["https://a.example","https://b.example","https://c.example"]"#,
        ));
        list.truncate_to(2);
        assert_eq!(list.encode(), r#"["https://c.example"]"#);
    }

    #[test]
    fn prepend_skips_existing_head() {
        let mut list = OriginList::decode(Some(r#"["https://a.example"]"#));
        list.prepend(Origin::new("https://a.example"));
        assert_eq!(list.encode(), r#"["https://a.example"]"#);
        list.prepend(Origin::new("https://z.example"));
        assert_eq!(list.encode(), r#"["https://z.example","https://a.example"]"#);
    }
}
