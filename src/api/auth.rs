use anyhow::Context;
use axum::{
    extract::State,
    http::StatusCode,
    middleware,
    routing::{get, post},
    Extension, Json, Router,
};
use serde::Deserialize;
use tower_cookies::Cookies;
use validator::Validate;

use crate::api::common::csrf::csrf_token;
use crate::api::common::middleware::{require_auth, CurrentUser};
use crate::api::common::utils::{
    clear_session_cookies, set_session_cookie, ACCESS_COOKIE, REFRESH_COOKIE,
};
use crate::api::common::MessageResponse;
use crate::api::users::{
    create_user, get_user_by_uuid, sanitize_user, set_refresh_token_hash, NewUser, SanitizedUser,
    User,
};
use crate::authentication::{
    compute_password_hash, decode_token, generate_token, spawn_blocking_with_tracing,
    validate_credentials, validate_password_strength, verify_password_hash, AuthError,
    Credentials, TokenKind,
};
use crate::errors::AppError;
use crate::InnerState;

#[derive(Debug, Deserialize, Validate)]
pub struct SignUpBody {
    #[validate(email(message = "email must be a valid email address"))]
    pub email: String,
    #[validate(length(min = 1, max = 255, message = "name should not be empty"))]
    pub name: String,
    #[validate(custom(function = "validate_password_strength"))]
    pub password: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct SignInBody {
    #[validate(email(message = "email must be a valid email address"))]
    pub email: String,
    #[validate(length(min = 1, message = "password should not be empty"))]
    pub password: String,
}

pub fn routes(state: InnerState) -> Router<InnerState> {
    let protected = Router::new()
        .route("/sign-out", post(sign_out))
        .route("/me", get(me))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .route("/sign-up", post(sign_up))
        .route("/sign-in", post(sign_in))
        .route("/refresh", post(refresh))
        .route("/csrf-token", get(csrf_token))
        .merge(protected)
        .with_state(state)
}

#[tracing::instrument(name = "Sign up", skip(inner, body), fields(email = %body.email))]
pub async fn sign_up(
    State(inner): State<InnerState>,
    Json(body): Json<SignUpBody>,
) -> Result<(StatusCode, Json<SanitizedUser>), AppError> {
    body.validate()?;

    let password_hash = compute_password_hash(body.password).await?;
    let user = create_user(
        &inner.db,
        NewUser {
            email: body.email,
            name: body.name.trim().to_string(),
            password_hash,
        },
    )
    .await?;

    tracing::info!("User {} signed up", user.uuid);
    Ok((StatusCode::CREATED, Json(sanitize_user(user))))
}

#[tracing::instrument(name = "Sign in", skip(inner, cookies, body), fields(email = %body.email))]
pub async fn sign_in(
    State(inner): State<InnerState>,
    cookies: Cookies,
    Json(body): Json<SignInBody>,
) -> Result<Json<SanitizedUser>, AppError> {
    body.validate()?;

    let credentials = Credentials {
        email: body.email,
        password: body.password,
    };
    let user = validate_credentials(&credentials, &inner.db).await?;

    let settings = &inner.config.jwt;
    let refresh_token = generate_token(TokenKind::Refresh, user.uuid, &user.email, settings)?;
    let refresh_hash = compute_password_hash(refresh_token.clone()).await?;
    set_refresh_token_hash(&inner.db, user.id, Some(&refresh_hash)).await?;

    // Cookies only go out once the refresh hash is stored.
    issue_access_cookie(&inner, &cookies, &user)?;
    set_session_cookie(
        &cookies,
        REFRESH_COOKIE,
        refresh_token,
        settings.refresh_expiration_secs,
        inner.config.cookie_secure,
    );

    tracing::info!("User {} signed in", user.uuid);
    Ok(Json(sanitize_user(user)))
}

#[tracing::instrument(name = "Sign out", skip(inner, cookies, current_user), fields(user_uuid = %current_user.uuid))]
pub async fn sign_out(
    State(inner): State<InnerState>,
    cookies: Cookies,
    Extension(current_user): Extension<CurrentUser>,
) -> Result<Json<MessageResponse>, AppError> {
    let user = get_user_by_uuid(&inner.db, current_user.uuid)
        .await
        .map_err(not_found_as_unauthorized)?;

    set_refresh_token_hash(&inner.db, user.id, None).await?;
    clear_session_cookies(&cookies);

    tracing::info!("User {} signed out", user.uuid);
    Ok(Json(MessageResponse::ok("Signed out")))
}

/// Re-issues the access cookie when the refresh cookie is a valid refresh JWT
/// matching the hash stored for its user.
#[tracing::instrument(name = "Refresh access token", skip(inner, cookies))]
pub async fn refresh(
    State(inner): State<InnerState>,
    cookies: Cookies,
) -> Result<Json<SanitizedUser>, AppError> {
    let refresh_token = cookies
        .get(REFRESH_COOKIE)
        .map(|c| c.value().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| {
            tracing::warn!("Refresh attempted without a refresh cookie");
            AppError::Authentication(anyhow::anyhow!("Missing refresh token"))
        })?;

    let claims = decode_token(TokenKind::Refresh, &refresh_token, &inner.config.jwt)?;
    let user = get_user_by_uuid(&inner.db, claims.sub)
        .await
        .map_err(not_found_as_unauthorized)?;

    let Some(stored_hash) = user.refresh_token.clone() else {
        tracing::warn!("User {} has no active refresh token", user.uuid);
        return Err(AppError::Authentication(anyhow::anyhow!(
            "Refresh token revoked"
        )));
    };

    spawn_blocking_with_tracing(move || verify_password_hash(&stored_hash, &refresh_token))
        .await
        .context("Failed to spawn blocking task.")
        .map_err(AuthError::UnexpectedError)?
        .map_err(|e| {
            tracing::warn!("Refresh token does not match the stored hash");
            AppError::from(e)
        })?;

    issue_access_cookie(&inner, &cookies, &user)?;

    tracing::info!("Access token refreshed for user {}", user.uuid);
    Ok(Json(sanitize_user(user)))
}

#[tracing::instrument(name = "Current user", skip(inner, current_user), fields(user_uuid = %current_user.uuid))]
pub async fn me(
    State(inner): State<InnerState>,
    Extension(current_user): Extension<CurrentUser>,
) -> Result<Json<SanitizedUser>, AppError> {
    let user = get_user_by_uuid(&inner.db, current_user.uuid)
        .await
        .map_err(not_found_as_unauthorized)?;
    Ok(Json(sanitize_user(user)))
}

fn issue_access_cookie(inner: &InnerState, cookies: &Cookies, user: &User) -> Result<(), AppError> {
    let settings = &inner.config.jwt;
    let access_token = generate_token(TokenKind::Access, user.uuid, &user.email, settings)?;
    set_session_cookie(
        cookies,
        ACCESS_COOKIE,
        access_token,
        settings.access_expiration_secs,
        inner.config.cookie_secure,
    );
    Ok(())
}

// A token for a deleted user is no longer a valid session.
fn not_found_as_unauthorized(e: AppError) -> AppError {
    match e {
        AppError::NotFound(_) => AppError::Authentication(anyhow::anyhow!("User no longer exists")),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign_up_body(email: &str, name: &str, password: &str) -> SignUpBody {
        SignUpBody {
            email: email.into(),
            name: name.into(),
            password: password.into(),
        }
    }

    #[test]
    fn valid_sign_up_passes_validation() {
        assert!(sign_up_body("ada@example.com", "Ada", "Str0ng!Pass")
            .validate()
            .is_ok());
    }

    #[test]
    fn sign_up_reports_each_bad_field() {
        let errors = sign_up_body("not-an-email", "", "weak")
            .validate()
            .unwrap_err();
        let fields = errors.field_errors();
        assert!(fields.contains_key("email"));
        assert!(fields.contains_key("name"));
        assert!(fields.contains_key("password"));
    }

    #[test]
    fn sign_up_errors_become_a_400_with_field_map() {
        let errors = sign_up_body("ada@example.com", "Ada", "password")
            .validate()
            .unwrap_err();
        match AppError::from(errors) {
            AppError::ValidationErrors(map) => assert!(map.contains_key("password")),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn sign_in_requires_a_password() {
        let body = SignInBody {
            email: "ada@example.com".into(),
            password: String::new(),
        };
        assert!(body.validate().is_err());
    }

    #[test]
    fn missing_user_maps_to_unauthorized() {
        let mapped = not_found_as_unauthorized(AppError::NotFound("User not found".into()));
        assert!(matches!(mapped, AppError::Authentication(_)));

        let untouched = not_found_as_unauthorized(AppError::Conflict("x".into()));
        assert!(matches!(untouched, AppError::Conflict(_)));
    }
}
