use cookie::{Cookie, SameSite};
use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};
use std::time::Duration;
use tower_cookies::Cookies;

use crate::errors::AppError;

pub const ACCESS_COOKIE: &str = "Authentication";
pub const REFRESH_COOKIE: &str = "Refresh";

pub const QUERY_TIMEOUT: Duration = Duration::from_millis(5000);

/// HttpOnly, SameSite=Lax, path `/` cookie living for `max_age_secs`.
pub fn session_cookie(
    name: &'static str,
    value: String,
    max_age_secs: i64,
    secure: bool,
) -> Cookie<'static> {
    Cookie::build((name, value))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(secure)
        .max_age(time::Duration::seconds(max_age_secs))
        .build()
}

pub fn set_session_cookie(
    cookies: &Cookies,
    name: &'static str,
    value: String,
    max_age_secs: i64,
    secure: bool,
) {
    tracing::debug!(cookie = name, max_age_secs, "Setting session cookie");
    cookies.add(session_cookie(name, value, max_age_secs, secure));
}

pub fn clear_session_cookies(cookies: &Cookies) {
    for name in [ACCESS_COOKIE, REFRESH_COOKIE] {
        tracing::debug!(cookie = name, "Removing session cookie");
        cookies.remove(Cookie::build((name, "")).path("/").build());
    }
}

/// Reads a cookie straight from the `Cookie` header. Middleware uses this so
/// it does not depend on where the cookie manager sits in the layer stack.
pub fn cookie_from_headers(headers: &axum::http::HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(axum::http::header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|raw| raw.split(';'))
        .filter_map(|pair| Cookie::parse(pair.trim().to_string()).ok())
        .find(|cookie| cookie.name() == name)
        .map(|cookie| cookie.value().to_string())
}

pub fn random_alphanumeric(len: usize) -> String {
    let mut rng = thread_rng();
    std::iter::repeat_with(|| rng.sample(Alphanumeric))
        .map(char::from)
        .take(len)
        .collect()
}

pub async fn timeout_query<T, F>(duration: Duration, fut: F) -> Result<T, AppError>
where
    F: std::future::Future<Output = Result<T, sqlx::Error>>,
{
    match tokio::time::timeout(duration, fut).await {
        Ok(Ok(res)) => Ok(res),
        Ok(Err(e)) => Err(AppError::from(e)),
        Err(elapsed) => {
            tracing::error!("Query timeout after {:?}", duration);
            Err(AppError::Timeout(elapsed))
        }
    }
}

/// A pool whose server accepts connections but never answers the Postgres
/// handshake, so every call on it runs into `QUERY_TIMEOUT`.
#[cfg(test)]
pub(crate) async fn unresponsive_pool() -> sqlx::PgPool {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });

    sqlx::postgres::PgPoolOptions::new()
        .acquire_timeout(Duration::from_secs(30))
        .connect_lazy(&format!("postgres://videobox:videobox@{}/videobox", addr))
        .unwrap()
}
