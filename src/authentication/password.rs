use anyhow::Context;
use argon2::password_hash::SaltString;
use argon2::{Algorithm, Argon2, Params, PasswordHash, PasswordHasher, PasswordVerifier, Version};
use serde::Deserialize;
use sqlx::PgPool;
use std::borrow::Cow;
use validator::ValidationError;

use super::AuthError;
use crate::api::users::{get_user_by_email, User};
use crate::errors::AppError;

const MIN_PASSWORD_LENGTH: usize = 8;

// Verified against when the email is unknown so both branches cost one argon2 run.
const DUMMY_PASSWORD_HASH: &str = "$argon2id$v=19$m=15000,t=2,p=1$\
    gZiV/M1gPc22ElAH/Jh1Hw$\
    CWOrkoo7oJBQ/iyh7uJ0LO2aLEfrHwTWllSAxT0zRno";

#[derive(Deserialize)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

#[tracing::instrument(name = "Validate user credentials", skip(credentials, pool), fields(email = %credentials.email))]
pub async fn validate_credentials(
    credentials: &Credentials,
    pool: &PgPool,
) -> Result<User, AppError> {
    tracing::debug!("Fetching stored credentials from database");
    let user = get_user_by_email(pool, &credentials.email).await?;

    let expected_password_hash = match &user {
        Some(user) => user.password.clone(),
        None => {
            tracing::debug!("Unknown email, verifying against the fallback hash");
            DUMMY_PASSWORD_HASH.to_string()
        }
    };

    let candidate = credentials.password.clone();
    spawn_blocking_with_tracing(move || verify_password_hash(&expected_password_hash, &candidate))
        .await
        .context("Failed to spawn blocking task.")??;

    match user {
        Some(user) => {
            tracing::info!("Credential validation successful");
            Ok(user)
        }
        None => {
            tracing::warn!("Credential validation failed - user not found");
            Err(AuthError::InvalidCredentials(anyhow::anyhow!("Unknown email.")).into())
        }
    }
}

#[tracing::instrument(
    name = "Verify password hash",
    skip(expected_password_hash, password_candidate)
)]
pub fn verify_password_hash(
    expected_password_hash: &str,
    password_candidate: &str,
) -> Result<(), AuthError> {
    let expected_password_hash = PasswordHash::new(expected_password_hash)
        .context("Failed to parse hash in PHC string format.")?;

    Argon2::default()
        .verify_password(password_candidate.as_bytes(), &expected_password_hash)
        .context("Invalid password.")
        .map_err(|e| {
            tracing::debug!("Password verification failed");
            AuthError::InvalidCredentials(e)
        })
}

/// Hashes `password` with Argon2id (m=15000, t=2, p=1) and a random salt,
/// returning the PHC string. Runs on the blocking pool.
#[tracing::instrument(name = "Compute password hash", skip(password))]
pub async fn compute_password_hash(password: String) -> Result<String, AuthError> {
    spawn_blocking_with_tracing(move || hash_blocking(&password))
        .await
        .context("Failed to spawn blocking task.")?
}

fn hash_blocking(password: &str) -> Result<String, AuthError> {
    let salt = SaltString::generate(&mut rand::thread_rng());
    let params = Params::new(15000, 2, 1, None).context("Failed to create Argon2 params")?;
    let password_hash = Argon2::new(Algorithm::Argon2id, Version::V0x13, params)
        .hash_password(password.as_bytes(), &salt)
        .context("Failed to hash password")?
        .to_string();
    Ok(password_hash)
}

pub fn spawn_blocking_with_tracing<F, R>(f: F) -> tokio::task::JoinHandle<R>
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    let current_span = tracing::Span::current();
    tokio::task::spawn_blocking(move || current_span.in_scope(f))
}

/// Password policy for sign-up: at least eight characters with a lowercase
/// letter, an uppercase letter, a digit and a symbol.
pub fn validate_password_strength(password: &str) -> Result<(), ValidationError> {
    let long_enough = password.chars().count() >= MIN_PASSWORD_LENGTH;
    let has_lower = password.chars().any(|c| c.is_lowercase());
    let has_upper = password.chars().any(|c| c.is_uppercase());
    let has_digit = password.chars().any(|c| c.is_ascii_digit());
    let has_symbol = password
        .chars()
        .any(|c| !c.is_alphanumeric() && !c.is_whitespace());

    if long_enough && has_lower && has_upper && has_digit && has_symbol {
        return Ok(());
    }

    let mut error = ValidationError::new("password_strength");
    error.message = Some(Cow::Borrowed(
        "password is too weak: use at least 8 characters with upper and lower case letters, a number and a symbol",
    ));
    Err(error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::common::utils::unresponsive_pool;
    use axum::http::StatusCode;

    #[tokio::test]
    async fn hash_then_verify_accepts_the_same_password() {
        let hash = compute_password_hash("Sup3r$ecret".to_string())
            .await
            .unwrap();
        assert!(hash.starts_with("$argon2id$v=19$m=15000,t=2,p=1$"));
        assert!(verify_password_hash(&hash, "Sup3r$ecret").is_ok());
    }

    #[tokio::test]
    async fn verify_rejects_a_different_password() {
        let hash = compute_password_hash("Sup3r$ecret".to_string())
            .await
            .unwrap();
        let err = verify_password_hash(&hash, "sup3r$ecret").unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredentials(_)));
    }

    #[test]
    fn malformed_hash_is_unexpected_not_invalid_credentials() {
        let err = verify_password_hash("not-a-phc-string", "whatever").unwrap_err();
        assert!(matches!(err, AuthError::UnexpectedError(_)));
    }

    #[test]
    fn dummy_hash_is_a_valid_phc_string() {
        assert!(PasswordHash::new(DUMMY_PASSWORD_HASH).is_ok());
        assert!(verify_password_hash(DUMMY_PASSWORD_HASH, "Passw0rd!").is_err());
    }

    #[test]
    fn strong_passwords_pass() {
        for password in ["Passw0rd!", "C0mpl3x#Pass", "Tr1ck-y_one", "Ünïcode9$x"] {
            assert!(
                validate_password_strength(password).is_ok(),
                "{} should be accepted",
                password
            );
        }
    }

    #[test]
    fn weak_passwords_fail() {
        for password in [
            "",
            "Sh0rt!",
            "alllowercase1!",
            "ALLUPPERCASE1!",
            "NoDigitsHere!",
            "NoSymbols123",
            "        ",
        ] {
            let err = validate_password_strength(password).unwrap_err();
            assert_eq!(err.code, "password_strength", "{} should be rejected", password);
        }
    }

    #[tokio::test]
    async fn lookup_timeout_is_not_reported_as_bad_credentials() {
        let pool = unresponsive_pool().await;
        let credentials = Credentials {
            email: "ada@example.com".into(),
            password: "Passw0rd!".into(),
        };

        let err = validate_credentials(&credentials, &pool).await.unwrap_err();
        assert!(matches!(err, AppError::Timeout(_)), "got {:?}", err);
        assert_eq!(err.status_code(), StatusCode::GATEWAY_TIMEOUT);
    }
}
