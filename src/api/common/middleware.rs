use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};
use uuid::Uuid;

use crate::api::common::utils::{cookie_from_headers, ACCESS_COOKIE};
use crate::authentication::{decode_token, TokenKind};
use crate::errors::AppError;
use crate::InnerState;

/// Identity carried by a valid access token, inserted into request extensions
/// by [`require_auth`].
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub uuid: Uuid,
    pub email: String,
}

pub async fn require_auth(
    State(inner): State<InnerState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = extract_token(&request).ok_or_else(|| {
        tracing::warn!(path = %request.uri().path(), "Authentication failed: missing token");
        AppError::Authentication(anyhow::anyhow!("Missing token"))
    })?;

    let claims = decode_token(TokenKind::Access, &token, &inner.config.jwt).map_err(|e| {
        tracing::warn!(path = %request.uri().path(), "Authentication failed: {:?}", e);
        AppError::from(e)
    })?;

    request.extensions_mut().insert(CurrentUser {
        uuid: claims.sub,
        email: claims.email,
    });
    Ok(next.run(request).await)
}

/// Access token from the `Authentication` cookie, falling back to an
/// `Authorization: Bearer` header.
fn extract_token(req: &Request) -> Option<String> {
    if let Some(token) = cookie_from_headers(req.headers(), ACCESS_COOKIE) {
        if !token.is_empty() {
            return Some(token);
        }
    }

    req.headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty())
}
