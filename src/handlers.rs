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

use std::net::SocketAddr;

use axum::body::Body;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};

use crate::cookie;
use crate::dispatcher::{self, DispatchResult};
use crate::error::ProxyError;
use crate::header_translator;
use crate::model::{Cookie, CookieOptions, OriginList, RequestFingerprint, SameSite};
use crate::origin_resolver::{self, DispatchOutcome};
use crate::state::AppState;
use crate::url_rewriter;

const COOKIE_VALUE_ENCODE: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b',')
    .add(b';')
    .add(b'\\');

/// The single entry point for everything that isn't `/debug/csp`,
/// `/robots.txt`, or `/healthz`: absolute-in-path requests and
/// cookie/fallback-resolved requests alike flow through here.
pub async fn proxy_handler(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    req: Request,
) -> Response {
    let method = req.method().clone();
    let headers = req.headers().clone();
    let path_and_query = req
        .uri()
        .path_and_query()
        .map(|v| v.as_str())
        .unwrap_or("/")
        .to_string();
    let path_without_query = req.uri().path().to_string();

    let proxy_host = state.config.resolve_proxy_host(
        headers
            .get("host")
            .and_then(|h| h.to_str().ok()),
    );

    let list = decode_proxy_targets_cookie(&headers);

    let resolution = origin_resolver::resolve(&path_and_query, &list, &state.config.fallback_origin);

    let body_bytes = if matches!(method, Method::GET | Method::HEAD | Method::TRACE) {
        None
    } else {
        match axum::body::to_bytes(req.into_body(), usize::MAX).await {
            Ok(b) => Some(b),
            Err(e) => return ProxyError::BodyReadError(e.to_string()).into_response(),
        }
    };

    let client_ip = peer.ip().to_string();
    let user_agent = headers
        .get("user-agent")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();

    let dispatch_result = dispatcher::dispatch(
        &state.client,
        &method,
        &resolution.candidates,
        &resolution.upstream_path,
        body_bytes.as_ref(),
        &state.rate_limiter,
        |origin| header_translator::translate_request_headers(&headers, origin),
        |origin| RequestFingerprint {
            client_ip: client_ip.clone(),
            user_agent: user_agent.clone(),
            origin: origin.as_str().to_string(),
            path: path_without_query.clone(),
        },
    )
    .await;

    let DispatchResult {
        response,
        candidate,
    } = match dispatch_result {
        Ok(r) => r,
        Err(e) => return e.into_response(),
    };

    let status = response.status();
    let status_is_2xx = status.is_success();
    let content_type = response
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();
    let is_get_html = method == Method::GET && content_type.to_ascii_lowercase().contains("html");

    let mutated_list = origin_resolver::apply_mutation(
        list,
        &DispatchOutcome {
            chosen: candidate,
            status_is_2xx,
            is_get_html,
        },
    );

    let mut dropped_cookies = Vec::new();
    let mut response_headers =
        header_translator::translate_response_headers(response.headers(), &proxy_host, &mut dropped_cookies);
    for err in &dropped_cookies {
        tracing::warn!(error = %err, "dropping malformed Set-Cookie from upstream");
    }

    if let Some(v) = proxy_targets_set_cookie(&mutated_list) {
        response_headers.append(axum::http::header::SET_COOKIE, v);
    }

    if url_rewriter::is_textual_content_type(&content_type) {
        match response.bytes().await {
            Ok(bytes) => {
                let text = String::from_utf8_lossy(&bytes);
                let rewritten = url_rewriter::rewrite(&text, &proxy_host);
                response_headers.remove("content-length");
                let mut resp = Response::new(Body::from(rewritten));
                *resp.status_mut() = status;
                *resp.headers_mut() = response_headers;
                resp
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to read upstream response body");
                ProxyError::BodyReadError(e.to_string()).into_response()
            }
        }
    } else {
        let body = Body::from_stream(response.bytes_stream());
        let mut resp = Response::new(body);
        *resp.status_mut() = status;
        *resp.headers_mut() = response_headers;
        resp
    }
}

fn decode_proxy_targets_cookie(headers: &HeaderMap) -> OriginList {
    let Some(raw) = headers.get("cookie").and_then(|v| v.to_str().ok()) else {
        return OriginList::empty();
    };
    let pairs = cookie::parse_request_cookies(raw);
    let Some((_, value)) = pairs.iter().find(|(name, _)| name == "proxyTargets") else {
        return OriginList::empty();
    };
    let decoded = percent_encoding::percent_decode_str(value)
        .decode_utf8()
        .map(|s| s.into_owned())
        .ok();
    OriginList::decode(decoded.as_deref())
}

/// Serialise the mutated `proxyTargets` list into an outgoing `Set-Cookie`
/// value. `HttpOnly`, path-scoped to `/`, `SameSite=Lax`: the cookie never
/// needs to cross a navigation from a different site, since it is read back
/// only by this same proxy host.
fn proxy_targets_set_cookie(list: &OriginList) -> Option<HeaderValue> {
    let json = list.encode();
    let encoded = utf8_percent_encode(&json, COOKIE_VALUE_ENCODE).to_string();
    let cookie = Cookie {
        name: "proxyTargets".to_string(),
        value: encoded,
        options: CookieOptions {
            domain: None,
            path: Some("/".to_string()),
            expires: None,
            max_age: None,
            secure: false,
            http_only: true,
            same_site: Some(SameSite::Lax),
            extra: Vec::new(),
        },
    };
    HeaderValue::from_str(&cookie::serialize(&cookie)).ok()
}

/// `POST /debug/csp` — accept a CSP violation report, log it, reply 200.
pub async fn debug_csp_handler(headers: HeaderMap, body: axum::body::Bytes) -> Response {
    let content_type = headers
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if !content_type.ends_with("csp-report") {
        tracing::warn!(content_type, "CSP report with unexpected content type");
    }

    match serde_json::from_slice::<serde_json::Value>(&body) {
        Ok(report) => tracing::info!(report = %report, "CSP violation report"),
        Err(_) => tracing::info!(
            body = %String::from_utf8_lossy(&body),
            "CSP violation report (non-JSON body)"
        ),
    }

    StatusCode::OK.into_response()
}

pub async fn robots_txt_handler() -> Response {
    (StatusCode::OK, "User-agent: *\nDisallow: /").into_response()
}

pub async fn healthz_handler() -> Response {
    (StatusCode::OK, "OK").into_response()
}
