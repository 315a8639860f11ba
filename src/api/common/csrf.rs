//! Double-submit CSRF protection.
//!
//! `GET /auth/csrf-token` stores a random secret in the HttpOnly `_csrf`
//! cookie and hands the client a token derived from it, both in the JSON body
//! and in the readable `CSRF-TOKEN` cookie. Unsafe requests must echo the token
//! in a header; [`csrf_protection`] recomputes it from the secret cookie.

use axum::{
    extract::Request,
    http::{HeaderMap, Method},
    middleware::Next,
    response::Response,
    Json,
};
use cookie::{Cookie, SameSite};
use serde::Serialize;
use sha3::{Digest, Sha3_256};
use tower_cookies::Cookies;

use crate::api::common::utils::{cookie_from_headers, random_alphanumeric};
use crate::errors::AppError;

pub const CSRF_SECRET_COOKIE: &str = "_csrf";
pub const CSRF_TOKEN_COOKIE: &str = "CSRF-TOKEN";
const CSRF_HEADERS: [&str; 3] = ["x-csrf-token", "csrf-token", "x-xsrf-token"];
const SECRET_LENGTH: usize = 32;
const SALT_LENGTH: usize = 8;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CsrfTokenResponse {
    pub csrf_token: String,
}

pub fn create_csrf_token(secret: &str) -> String {
    let salt = random_alphanumeric(SALT_LENGTH);
    format!("{}-{}", salt, digest(&salt, secret))
}

pub fn verify_csrf_token(secret: &str, token: &str) -> bool {
    let Some((salt, mac)) = token.split_once('-') else {
        return false;
    };
    let expected = digest(salt, secret);
    expected.len() == mac.len()
        && expected
            .bytes()
            .zip(mac.bytes())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
}

fn digest(salt: &str, secret: &str) -> String {
    let mut hasher = Sha3_256::new();
    hasher.update(salt.as_bytes());
    hasher.update(b"-");
    hasher.update(secret.as_bytes());
    hex::encode(hasher.finalize())
}

#[tracing::instrument(name = "Issue CSRF token", skip(cookies))]
pub async fn csrf_token(cookies: Cookies) -> Json<CsrfTokenResponse> {
    let secret = match cookies.get(CSRF_SECRET_COOKIE) {
        Some(existing) if !existing.value().is_empty() => existing.value().to_string(),
        _ => {
            tracing::debug!("No CSRF secret cookie yet, generating one");
            let secret = random_alphanumeric(SECRET_LENGTH);
            cookies.add(
                Cookie::build((CSRF_SECRET_COOKIE, secret.clone()))
                    .path("/")
                    .http_only(true)
                    .same_site(SameSite::Lax)
                    .build(),
            );
            secret
        }
    };

    let token = create_csrf_token(&secret);
    cookies.add(
        Cookie::build((CSRF_TOKEN_COOKIE, token.clone()))
            .path("/")
            .same_site(SameSite::Lax)
            .build(),
    );

    Json(CsrfTokenResponse { csrf_token: token })
}

pub async fn csrf_protection(request: Request, next: Next) -> Result<Response, AppError> {
    if is_safe_method(request.method()) {
        return Ok(next.run(request).await);
    }

    let secret = cookie_from_headers(request.headers(), CSRF_SECRET_COOKIE);
    let token = token_from_headers(request.headers());

    match (secret, token) {
        (Some(secret), Some(token)) if verify_csrf_token(&secret, &token) => {
            Ok(next.run(request).await)
        }
        _ => {
            tracing::warn!(
                method = %request.method(),
                path = %request.uri().path(),
                "Rejected request with missing or invalid CSRF token"
            );
            Err(AppError::Forbidden("Invalid CSRF token".to_string()))
        }
    }
}

fn is_safe_method(method: &Method) -> bool {
    matches!(*method, Method::GET | Method::HEAD | Method::OPTIONS)
}

fn token_from_headers(headers: &HeaderMap) -> Option<String> {
    CSRF_HEADERS
        .iter()
        .filter_map(|name| headers.get(*name))
        .filter_map(|value| value.to_str().ok())
        .map(str::to_string)
        .find(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_verifies_against_its_secret() {
        let token = create_csrf_token("s3cret");
        assert!(verify_csrf_token("s3cret", &token));
    }

    #[test]
    fn token_fails_for_another_secret() {
        let token = create_csrf_token("s3cret");
        assert!(!verify_csrf_token("other", &token));
    }

    #[test]
    fn tampered_or_malformed_tokens_fail() {
        let token = create_csrf_token("s3cret");
        let mut tampered = token.clone();
        tampered.pop();
        tampered.push(if token.ends_with('0') { '1' } else { '0' });
        assert!(!verify_csrf_token("s3cret", &tampered));
        assert!(!verify_csrf_token("s3cret", "no-dash-but-wrong"));
        assert!(!verify_csrf_token("s3cret", "nodash"));
        assert!(!verify_csrf_token("s3cret", ""));
    }

    #[test]
    fn each_issue_is_salted_differently() {
        assert_ne!(create_csrf_token("s3cret"), create_csrf_token("s3cret"));
    }

    #[test]
    fn header_aliases_are_recognised() {
        let mut headers = HeaderMap::new();
        headers.insert("x-xsrf-token", "abc".parse().unwrap());
        assert_eq!(token_from_headers(&headers).as_deref(), Some("abc"));
    }

    #[test]
    fn only_unsafe_methods_are_checked() {
        assert!(is_safe_method(&Method::GET));
        assert!(is_safe_method(&Method::OPTIONS));
        assert!(!is_safe_method(&Method::POST));
        assert!(!is_safe_method(&Method::DELETE));
        assert!(!is_safe_method(&Method::PATCH));
    }
}
