use anyhow::Context;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::AuthError;
use crate::config::JwtSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: Uuid,
    pub email: String,
    pub kind: TokenKind,
    pub iat: i64,
    pub exp: i64,
    pub jti: Uuid,
}

impl TokenKind {
    fn secret<'a>(&self, settings: &'a JwtSettings) -> &'a str {
        match self {
            TokenKind::Access => settings.access_secret.expose_secret(),
            TokenKind::Refresh => settings.refresh_secret.expose_secret(),
        }
    }

    pub fn expiration_secs(&self, settings: &JwtSettings) -> i64 {
        match self {
            TokenKind::Access => settings.access_expiration_secs,
            TokenKind::Refresh => settings.refresh_expiration_secs,
        }
    }
}

#[tracing::instrument(name = "Generate JWT token", skip(user_uuid, email, settings), fields(user_uuid = %user_uuid))]
pub fn generate_token(
    kind: TokenKind,
    user_uuid: Uuid,
    email: &str,
    settings: &JwtSettings,
) -> Result<String, AuthError> {
    let now = chrono::Utc::now().timestamp();
    let claims = Claims {
        sub: user_uuid,
        email: email.to_owned(),
        kind,
        iat: now,
        exp: now + kind.expiration_secs(settings),
        jti: Uuid::new_v4(),
    };

    let token = encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(kind.secret(settings).as_bytes()),
    )
    .context("Failed to encode JWT token")?;

    tracing::debug!("JWT token generated");
    Ok(token)
}

#[tracing::instrument(name = "Decode JWT token", skip(token, settings))]
pub fn decode_token(
    kind: TokenKind,
    token: &str,
    settings: &JwtSettings,
) -> Result<Claims, AuthError> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(kind.secret(settings).as_bytes()),
        &Validation::new(Algorithm::HS256),
    )
    .map_err(|e| AuthError::InvalidToken(anyhow::Error::new(e).context("Failed to decode token")))?;

    if token_data.claims.kind != kind {
        return Err(AuthError::InvalidToken(anyhow::anyhow!(
            "Expected a {:?} token",
            kind
        )));
    }

    Ok(token_data.claims)
}
