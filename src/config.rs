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

use std::env;

use crate::model::Origin;

/// Configuration for the proxy server. No CLI, no required env vars — every
/// field has a default per the system's "no configuration" design.
#[derive(Debug, Clone)]
pub struct Config {
    /// The port to listen on.
    pub port: u16,
    /// Explicit public host[:port] of this proxy, used both for rewritten
    /// URL authorities and the CSP `report-uri`. If `None`, it is derived
    /// per-request from the `Host` header.
    pub proxy_host: Option<String>,
    /// Origin tried when the client has no `proxyTargets` cookie and the
    /// request isn't an absolute-in-path form.
    pub fallback_origin: Origin,
    /// Sliding window, in milliseconds, for the rate limiter.
    pub window_ms: u64,
    /// Max attempts per fingerprint within the window (current attempt
    /// included in the count).
    pub limit: usize,
}

impl Config {
    /// # Environment Variables
    /// * `PORT` - Port to listen on (default: 3000).
    /// * `PROXY_HOST` - Explicit public host[:port] of the proxy (optional).
    /// * `FALLBACK_ORIGIN` - Origin tried with no remembered target.
    /// * `WINDOW_MS` - Rate-limiter sliding window, in milliseconds.
    /// * `LIMIT` - Rate-limiter max attempts per fingerprint per window.
    pub fn from_env() -> Self {
        let port = env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(3000);

        let proxy_host = env::var("PROXY_HOST").ok();

        let fallback_origin = env::var("FALLBACK_ORIGIN")
            .ok()
            .map(Origin::new)
            .unwrap_or_else(|| Origin::new("https://example.com"));

        let window_ms = env::var("WINDOW_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(3000);

        let limit = env::var("LIMIT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(10);

        Self {
            port,
            proxy_host,
            fallback_origin,
            window_ms,
            limit,
        }
    }

    /// Resolve the host used in rewritten URLs and the CSP `report-uri` for
    /// one request: the configured override, or the inbound `Host` header.
    pub fn resolve_proxy_host(&self, request_host: Option<&str>) -> String {
        self.proxy_host
            .clone()
            .or_else(|| request_host.map(str::to_string))
            .unwrap_or_else(|| format!("localhost:{}", self.port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_proxy_host_from_request_when_unconfigured() {
        let config = Config {
            port: 3000,
            proxy_host: None,
            fallback_origin: Origin::new("https://example.com"),
            window_ms: 3000,
            limit: 10,
        };
        assert_eq!(config.resolve_proxy_host(Some("example.net")), "example.net");
    }

    #[test]
    fn configured_proxy_host_wins() {
        let config = Config {
            port: 3000,
            proxy_host: Some("proxy.example".to_string()),
            fallback_origin: Origin::new("https://example.com"),
            window_ms: 3000,
            limit: 10,
        };
        assert_eq!(config.resolve_proxy_host(Some("ignored.example")), "proxy.example");
    }
}
