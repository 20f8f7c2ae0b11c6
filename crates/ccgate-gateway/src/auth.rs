// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Bearer token authentication and per-IP rate limiting (§6 Auth, §5).
//!
//! Accepts `Authorization: Bearer <value>` or `?token=<value>`. A value equal
//! to the configured admin token (or the `x-admin-token` header) grants admin
//! access; any value matching a stored, usable [`Token`] grants user access
//! scoped to that token. With no admin token configured and no token store
//! entries, the gateway runs in open mode (every request is admin).
//!
//! Failed attempts are rate-limited per IP via `governor`'s GCRA algorithm;
//! loopback is exempt, matching the reasoning that a process with loopback
//! access already has local access to the machine.
use std::{
    net::{IpAddr, Ipv4Addr},
    num::NonZeroU32,
    sync::Arc,
};

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use ccgate_core::Token;
use governor::{clock::DefaultClock, state::keyed::DashMapStateStore, Quota, RateLimiter};
use subtle::ConstantTimeEq;
use tracing::warn;

use crate::state::AppState;

type IpLimiter = RateLimiter<IpAddr, DashMapStateStore<IpAddr>, DefaultClock>;

#[derive(Clone, Debug)]
pub enum AuthContext {
    Admin,
    User(Box<Token>),
}

impl AuthContext {
    pub fn token_mut(&mut self) -> Option<&mut Token> {
        match self {
            AuthContext::Admin => None,
            AuthContext::User(t) => Some(t),
        }
    }
}

pub struct RateLimitState {
    limiter: IpLimiter,
}

impl RateLimitState {
    pub fn new(max_per_minute: u32, burst: u32) -> Self {
        let quota = Quota::per_minute(NonZeroU32::new(max_per_minute.max(1)).unwrap()).allow_burst(NonZeroU32::new(burst.max(1)).unwrap());
        Self { limiter: RateLimiter::keyed(quota) }
    }
}

impl Default for RateLimitState {
    fn default() -> Self {
        Self::new(120, 20)
    }
}

fn is_loopback(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4 == Ipv4Addr::LOCALHOST,
        IpAddr::V6(v6) => v6.is_loopback(),
    }
}

fn extract_token<'a>(headers: &'a HeaderMap, query: Option<&'a str>) -> Option<&'a str> {
    if let Some(auth) = headers.get(axum::http::header::AUTHORIZATION).and_then(|v| v.to_str().ok()) {
        if let Some(rest) = auth.strip_prefix("Bearer ") {
            return Some(rest);
        }
    }
    if let Some(admin) = headers.get("x-admin-token").and_then(|v| v.to_str().ok()) {
        return Some(admin);
    }
    query
}

fn query_token(uri: &axum::http::Uri) -> Option<String> {
    let query = uri.query()?;
    query.split('&').find_map(|pair| {
        let (k, v) = pair.split_once('=')?;
        if k == "token" {
            Some(urlencoding_decode(v))
        } else {
            None
        }
    })
}

fn urlencoding_decode(s: &str) -> String {
    s.replace('+', " ")
}

/// Resolves a bearer value against the admin token and the token store.
/// Returns `None` when neither matches (authentication failure).
pub async fn resolve(state: &AppState, provided: &str) -> Option<AuthContext> {
    if let Some(admin) = &state.config.server.admin_token {
        if !admin.is_empty() && bool::from(provided.as_bytes().ct_eq(admin.as_bytes())) {
            return Some(AuthContext::Admin);
        }
    }
    let tokens = state.stores.tokens.list(None, |_| true);
    tokens.into_iter().find(|t| t.value == provided).map(|t| AuthContext::User(Box::new(t)))
}

/// Axum middleware: authenticates, stamps [`AuthContext`] into request
/// extensions, rate-limits failed attempts per IP.
pub async fn bearer_auth_mw(State(state): State<AppState>, ConnectInfo(addr): ConnectInfo<std::net::SocketAddr>, mut req: Request, next: Next) -> Response {
    let ip = addr.ip();
    let token_query = query_token(req.uri());
    let provided = extract_token(req.headers(), token_query.as_deref()).map(str::to_string);

    let open_mode = state.config.server.admin_token.is_none() && state.stores.tokens.is_empty();

    if open_mode {
        req.extensions_mut().insert(AuthContext::Admin);
        return next.run(req).await;
    }

    match provided {
        Some(value) => match resolve(&state, &value).await {
            Some(ctx) => {
                req.extensions_mut().insert(ctx);
                next.run(req).await
            }
            None => reject(&state.rate_limit, ip).await,
        },
        None => reject(&state.rate_limit, ip).await,
    }
}

async fn reject(limiter: &Arc<RateLimitState>, ip: IpAddr) -> Response {
    if !is_loopback(ip) && limiter.limiter.check_key(&ip).is_err() {
        warn!(%ip, "rate limit exceeded after repeated auth failures");
        return (StatusCode::TOO_MANY_REQUESTS, [(axum::http::header::RETRY_AFTER, "60")], "Too Many Requests").into_response();
    }
    warn!(%ip, "authentication failed");
    (StatusCode::UNAUTHORIZED, "Unauthorized").into_response()
}
