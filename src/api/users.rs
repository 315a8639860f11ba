use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::api::common::utils::{timeout_query, QUERY_TIMEOUT};
use crate::errors::AppError;

const USER_COLUMNS: &str =
    "id, uuid, email, name, password, refresh_token, created_at, updated_at";

#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub id: i64,
    pub uuid: Uuid,
    pub email: String,
    pub name: String,
    pub password: String,
    pub refresh_token: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// What the API is allowed to show of a [`User`]: no password hash, no
/// refresh-token hash, no internal id.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SanitizedUser {
    pub uuid: Uuid,
    pub email: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub fn sanitize_user(user: User) -> SanitizedUser {
    SanitizedUser {
        uuid: user.uuid,
        email: user.email,
        name: user.name,
        created_at: user.created_at,
        updated_at: user.updated_at,
    }
}

impl From<User> for SanitizedUser {
    fn from(user: User) -> Self {
        sanitize_user(user)
    }
}

pub struct NewUser {
    pub email: String,
    pub name: String,
    pub password_hash: String,
}

#[tracing::instrument(name = "Get user by email", skip(pool))]
pub async fn get_user_by_email(pool: &PgPool, email: &str) -> Result<Option<User>, AppError> {
    let query = format!("SELECT {} FROM users WHERE email = $1", USER_COLUMNS);
    timeout_query(
        QUERY_TIMEOUT,
        sqlx::query_as::<_, User>(&query)
            .bind(normalize_email(email))
            .fetch_optional(pool),
    )
    .await
}

#[tracing::instrument(name = "Get user by uuid", skip(pool))]
pub async fn get_user_by_uuid(pool: &PgPool, uuid: Uuid) -> Result<User, AppError> {
    let query = format!("SELECT {} FROM users WHERE uuid = $1", USER_COLUMNS);
    timeout_query(
        QUERY_TIMEOUT,
        sqlx::query_as::<_, User>(&query).bind(uuid).fetch_optional(pool),
    )
    .await?
    .ok_or_else(|| AppError::NotFound("User not found".to_string()))
}

#[tracing::instrument(name = "Saving new user in the database", skip(pool, new_user), fields(email = %new_user.email))]
pub async fn create_user(pool: &PgPool, new_user: NewUser) -> Result<User, AppError> {
    let email = normalize_email(&new_user.email);
    let uuid = Uuid::new_v4();
    tracing::info!("Creating user {}", uuid);

    let query = format!(
        "INSERT INTO users (uuid, email, name, password) VALUES ($1, $2, $3, $4) RETURNING {}",
        USER_COLUMNS
    );

    let result = timeout_query(
        QUERY_TIMEOUT,
        sqlx::query_as::<_, User>(&query)
            .bind(uuid)
            .bind(&email)
            .bind(&new_user.name)
            .bind(&new_user.password_hash)
            .fetch_one(pool),
    )
    .await;

    match result {
        Ok(user) => {
            tracing::info!("Successfully created user {}", user.uuid);
            Ok(user)
        }
        Err(AppError::Conflict(_)) => {
            tracing::warn!("Attempted to create user with existing email");
            Err(AppError::Conflict(format!(
                "User with email '{}' already exists",
                email
            )))
        }
        Err(e) => Err(e),
    }
}

/// Stores (or clears, with `None`) the argon2 hash of the user's current
/// refresh token.
#[tracing::instrument(name = "Set refresh token hash", skip(pool, refresh_token_hash))]
pub async fn set_refresh_token_hash(
    pool: &PgPool,
    user_id: i64,
    refresh_token_hash: Option<&str>,
) -> Result<(), AppError> {
    let result = timeout_query(
        QUERY_TIMEOUT,
        sqlx::query("UPDATE users SET refresh_token = $1, updated_at = NOW() WHERE id = $2")
            .bind(refresh_token_hash)
            .bind(user_id)
            .execute(pool),
    )
    .await?;

    if result.rows_affected() == 0 {
        tracing::warn!("No user row updated for id {}", user_id);
        return Err(AppError::NotFound("User not found".to_string()));
    }
    Ok(())
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}
