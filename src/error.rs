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

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("invalid upstream URL")]
    InvalidUpstreamUrl,
    #[error("no candidate origins")]
    NoCandidates,
    #[error("rate limit exceeded")]
    RateLimited,
    #[error("upstream transport error: {0}")]
    UpstreamTransportError(String),
    #[error("failed to read request body: {0}")]
    BodyReadError(String),
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = match &self {
            ProxyError::InvalidUpstreamUrl => StatusCode::INTERNAL_SERVER_ERROR,
            ProxyError::NoCandidates => StatusCode::INTERNAL_SERVER_ERROR,
            ProxyError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ProxyError::UpstreamTransportError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ProxyError::BodyReadError(_) => StatusCode::BAD_REQUEST,
        };

        tracing::error!(error = %self, "proxy request failed");

        let body = if matches!(self, ProxyError::RateLimited) {
            String::new()
        } else {
            self.to_string()
        };

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limited_maps_to_429_with_empty_body() {
        let resp = ProxyError::RateLimited.into_response();
        assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[test]
    fn invalid_upstream_url_maps_to_500() {
        let resp = ProxyError::InvalidUpstreamUrl.into_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
