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

//! Drives an outbound request per candidate origin until one succeeds (status
//! < 400) or the candidate list is exhausted. The request body, if any, was
//! already fully buffered by the caller into a `Bytes`; each candidate gets
//! its own cheap clone of it rather than a true streaming tee, trading a
//! bounded amount of memory for a much simpler fallback implementation.

use axum::http::HeaderMap;
use bytes::Bytes;
use reqwest::{Client, Method};

use crate::error::ProxyError;
use crate::model::{Candidate, Origin, RequestFingerprint};
use crate::rate_limiter::RateLimiter;
use crate::url_rewriter;

pub struct DispatchResult {
    pub response: reqwest::Response,
    pub candidate: Candidate,
}

/// One candidate's fully-assembled outbound request. Built fresh for each
/// candidate in turn and consumed by `send_one`; never escapes this module,
/// let alone the request's task.
struct ProxiedRequest<'a> {
    method: Method,
    target_origin: Origin,
    target_url: String,
    translated_headers: HeaderMap,
    body: Option<&'a Bytes>,
    /// How many candidates, including this one, remain untried — used only
    /// for the `tracing` span below.
    remaining_candidates: usize,
}

async fn send_one(client: &Client, request: &ProxiedRequest<'_>) -> reqwest::Result<reqwest::Response> {
    tracing::debug!(
        target_origin = %request.target_origin,
        remaining_candidates = request.remaining_candidates,
        "dispatching to candidate"
    );

    let mut builder = client
        .request(request.method.clone(), &request.target_url)
        .headers(request.translated_headers.clone());
    if let Some(bytes) = request.body {
        builder = builder.body(bytes.clone());
    }
    builder.send().await
}

/// Dispatch `method upstream_path` against each candidate in order.
///
/// `headers_for` builds the translated request headers for a given target
/// origin; `fingerprint_for` builds the rate-limiter key for that origin.
/// Both are invoked once per candidate, since both depend on which origin is
/// being tried.
pub async fn dispatch(
    client: &Client,
    method: &Method,
    candidates: &[Candidate],
    upstream_path: &str,
    body: Option<&Bytes>,
    rate_limiter: &RateLimiter,
    headers_for: impl Fn(&Origin) -> HeaderMap,
    fingerprint_for: impl Fn(&Origin) -> RequestFingerprint,
) -> Result<DispatchResult, ProxyError> {
    if candidates.is_empty() {
        return Err(ProxyError::NoCandidates);
    }

    let mut provisional: Option<DispatchResult> = None;
    let mut last_transport_err: Option<String> = None;

    for (attempt, candidate) in candidates.iter().enumerate() {
        let fingerprint = fingerprint_for(&candidate.origin);
        if rate_limiter.check(&fingerprint) {
            return Err(ProxyError::RateLimited);
        }

        let target_url = format!("{}{}", candidate.origin.as_str(), upstream_path);
        if !url_rewriter::validate_upstream_url(split_off_fragment(&target_url)) {
            return Err(ProxyError::InvalidUpstreamUrl);
        }

        let request = ProxiedRequest {
            method: method.clone(),
            target_origin: candidate.origin.clone(),
            target_url,
            translated_headers: headers_for(&candidate.origin),
            body,
            remaining_candidates: candidates.len() - attempt,
        };

        match send_one(client, &request).await {
            Ok(response) => {
                let succeeded = response.status().as_u16() < 400;
                if succeeded {
                    return Ok(DispatchResult {
                        response,
                        candidate: candidate.clone(),
                    });
                }
                if provisional.is_none() {
                    provisional = Some(DispatchResult {
                        response,
                        candidate: candidate.clone(),
                    });
                }
            }
            Err(e) => {
                last_transport_err = Some(e.to_string());
            }
        }
    }

    match provisional {
        Some(result) => Ok(result),
        None => Err(ProxyError::UpstreamTransportError(
            last_transport_err.unwrap_or_else(|| "all candidates failed".to_string()),
        )),
    }
}

/// The grammar's `fragment` production is free-form and may itself contain
/// `#`; validation only needs to confirm the URL up to (and including) any
/// query string is well-formed, so trim a fragment before validating.
fn split_off_fragment(url: &str) -> &str {
    match url.find('#') {
        Some(idx) => &url[..idx],
        None => url,
    }
}
