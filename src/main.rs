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

mod config;
mod cookie;
mod dispatcher;
mod error;
mod handlers;
mod header_translator;
mod model;
mod origin_resolver;
mod rate_limiter;
mod state;
mod url_rewriter;

use std::net::SocketAddr;

use axum::http::Method;
use axum::routing::{any, get, post};
use axum::Router;
use tower_http::cors::{AllowHeaders, AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::state::AppState;

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = Config::from_env();
    let state = AppState::new(config);

    // Every proxied response already carries a hard-coded
    // `Access-Control-Allow-Origin: *` (header_translator), so the layer here
    // only needs to handle the CORS preflight itself — it does not mirror the
    // request origin or allow credentials, since `*` and credentials can't be
    // combined.
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::any())
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::PATCH,
            Method::HEAD,
            Method::OPTIONS,
        ])
        .allow_headers(AllowHeaders::mirror_request());

    let app = Router::new()
        .route("/debug/csp", post(handlers::debug_csp_handler))
        .route("/robots.txt", get(handlers::robots_txt_handler))
        .route("/healthz", get(handlers::healthz_handler))
        .route("/", any(handlers::proxy_handler))
        .route("/{*path}", any(handlers::proxy_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state.clone());

    let addr: SocketAddr = format!("0.0.0.0:{}", state.config.port)
        .parse()
        .expect("invalid address/port configuration");

    tracing::info!("proxy listening on http://{}", addr);
    if let Some(host) = &state.config.proxy_host {
        tracing::info!("configured proxy host: {}", host);
    }

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("failed to bind listening socket");
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .expect("server error");
}
