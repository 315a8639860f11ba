use axum::{
    extract::{Path, State},
    http::StatusCode,
    middleware,
    routing::get,
    Extension, Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;
use validator::Validate;

use crate::api::common::middleware::{require_auth, CurrentUser};
use crate::api::common::ownership::{resolve_box_profile, resolve_user_id, Owner};
use crate::api::common::utils::{random_alphanumeric, timeout_query, QUERY_TIMEOUT};
use crate::api::video_groups::{fetch_video_groups, VideoGroupResponse};
use crate::api::videos::{fetch_videos, VideoResponse};
use crate::errors::AppError;
use crate::InnerState;

pub const URL_CODE_LENGTH: usize = 10;
const URL_CODE_ATTEMPTS: usize = 5;

const BOX_COLUMNS: &str = "id, uuid, name, url_code, user_id, created_at, updated_at";

#[derive(Debug, Clone, FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BoxProfile {
    #[serde(skip)]
    pub id: i64,
    pub uuid: Uuid,
    pub name: String,
    pub url_code: String,
    #[serde(skip)]
    pub user_id: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A box profile together with everything it owns.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BoxProfileContents {
    #[serde(flatten)]
    pub box_profile: BoxProfile,
    pub videos: Vec<VideoResponse>,
    pub video_groups: Vec<VideoGroupResponse>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateBoxProfileBody {
    #[validate(length(min = 1, max = 255, message = "name should not be empty"))]
    pub name: String,
}

#[derive(Debug, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateBoxProfileBody {
    #[validate(length(min = 1, max = 255, message = "name should not be empty"))]
    pub name: Option<String>,
    #[serde(default)]
    pub regenerate_url_code: bool,
}

pub fn routes(state: InnerState) -> Router<InnerState> {
    let protected = Router::new()
        .route("/", get(all_box_profiles).post(create_box_profile))
        .route(
            "/{uuid}",
            get(get_box_profile_by_uuid)
                .patch(update_box_profile)
                .delete(delete_box_profile),
        )
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .route("/code/{url_code}", get(get_box_profile_by_code))
        .merge(protected)
        .with_state(state)
}

pub fn generate_url_code() -> String {
    random_alphanumeric(URL_CODE_LENGTH)
}

#[tracing::instrument(name = "Get all box profiles", skip(inner, current_user), fields(user_uuid = %current_user.uuid))]
pub async fn all_box_profiles(
    State(inner): State<InnerState>,
    Extension(current_user): Extension<CurrentUser>,
) -> Result<Json<Vec<BoxProfile>>, AppError> {
    let user_id = resolve_user_id(&inner.db, &current_user).await?;
    let query = format!(
        "SELECT {} FROM box_profiles WHERE user_id = $1 ORDER BY created_at DESC, id DESC",
        BOX_COLUMNS
    );
    let boxes = timeout_query(
        QUERY_TIMEOUT,
        sqlx::query_as::<_, BoxProfile>(&query)
            .bind(user_id)
            .fetch_all(&inner.db),
    )
    .await?;

    tracing::debug!("Fetched {} box profiles", boxes.len());
    Ok(Json(boxes))
}

#[tracing::instrument(name = "Get box profile by uuid", skip(inner, current_user), fields(user_uuid = %current_user.uuid))]
pub async fn get_box_profile_by_uuid(
    State(inner): State<InnerState>,
    Extension(current_user): Extension<CurrentUser>,
    Path(uuid): Path<Uuid>,
) -> Result<Json<BoxProfileContents>, AppError> {
    let box_profile = resolve_box_profile(&inner.db, &current_user, uuid).await?;
    Ok(Json(with_contents(&inner.db, box_profile).await?))
}

#[tracing::instrument(name = "Get box profile by url code", skip(inner))]
pub async fn get_box_profile_by_code(
    State(inner): State<InnerState>,
    Path(url_code): Path<String>,
) -> Result<Json<BoxProfileContents>, AppError> {
    let query = format!("SELECT {} FROM box_profiles WHERE url_code = $1", BOX_COLUMNS);
    let box_profile = timeout_query(
        QUERY_TIMEOUT,
        sqlx::query_as::<_, BoxProfile>(&query)
            .bind(&url_code)
            .fetch_optional(&inner.db),
    )
    .await?
    .ok_or_else(|| AppError::NotFound(format!("Box profile with code '{}' not found", url_code)))?;

    Ok(Json(with_contents(&inner.db, box_profile).await?))
}

#[tracing::instrument(name = "Create box profile", skip(inner, current_user, body), fields(user_uuid = %current_user.uuid))]
pub async fn create_box_profile(
    State(inner): State<InnerState>,
    Extension(current_user): Extension<CurrentUser>,
    Json(body): Json<CreateBoxProfileBody>,
) -> Result<(StatusCode, Json<BoxProfile>), AppError> {
    body.validate()?;
    let user_id = resolve_user_id(&inner.db, &current_user).await?;
    let name = body.name.trim().to_string();
    let uuid = Uuid::new_v4();

    let query = format!(
        "INSERT INTO box_profiles (uuid, name, url_code, user_id) VALUES ($1, $2, $3, $4) RETURNING {}",
        BOX_COLUMNS
    );
    let box_profile = with_fresh_url_code(|url_code| {
        timeout_query(
            QUERY_TIMEOUT,
            sqlx::query_as::<_, BoxProfile>(&query)
                .bind(uuid)
                .bind(&name)
                .bind(url_code)
                .bind(user_id)
                .fetch_one(&inner.db),
        )
    })
    .await?;

    tracing::info!("Created box profile {} with code {}", uuid, box_profile.url_code);
    Ok((StatusCode::CREATED, Json(box_profile)))
}

#[tracing::instrument(name = "Update box profile", skip(inner, current_user, body), fields(user_uuid = %current_user.uuid))]
pub async fn update_box_profile(
    State(inner): State<InnerState>,
    Extension(current_user): Extension<CurrentUser>,
    Path(uuid): Path<Uuid>,
    Json(body): Json<UpdateBoxProfileBody>,
) -> Result<Json<BoxProfile>, AppError> {
    body.validate()?;
    let existing = resolve_box_profile(&inner.db, &current_user, uuid).await?;
    let name = body.name.as_deref().map(str::trim).map(str::to_string);

    let query = format!(
        r#"
        UPDATE box_profiles
        SET name = COALESCE($1, name), url_code = $2, updated_at = NOW()
        WHERE id = $3
        RETURNING {}
        "#,
        BOX_COLUMNS
    );

    let box_profile = if body.regenerate_url_code {
        tracing::debug!("Regenerating url code of box profile {}", uuid);
        with_fresh_url_code(|url_code| {
            timeout_query(
                QUERY_TIMEOUT,
                sqlx::query_as::<_, BoxProfile>(&query)
                    .bind(name.clone())
                    .bind(url_code)
                    .bind(existing.id)
                    .fetch_one(&inner.db),
            )
        })
        .await?
    } else {
        timeout_query(
            QUERY_TIMEOUT,
            sqlx::query_as::<_, BoxProfile>(&query)
                .bind(name)
                .bind(&existing.url_code)
                .bind(existing.id)
                .fetch_one(&inner.db),
        )
        .await?
    };

    tracing::info!("Updated box profile {}", uuid);
    Ok(Json(box_profile))
}

/// Deleting a box profile cascades to the videos and video groups it owns.
#[tracing::instrument(name = "Delete box profile", skip(inner, current_user), fields(user_uuid = %current_user.uuid))]
pub async fn delete_box_profile(
    State(inner): State<InnerState>,
    Extension(current_user): Extension<CurrentUser>,
    Path(uuid): Path<Uuid>,
) -> Result<Json<BoxProfile>, AppError> {
    let box_profile = resolve_box_profile(&inner.db, &current_user, uuid).await?;

    timeout_query(
        QUERY_TIMEOUT,
        sqlx::query("DELETE FROM box_profiles WHERE id = $1")
            .bind(box_profile.id)
            .execute(&inner.db),
    )
    .await?;

    tracing::info!("Deleted box profile {}", uuid);
    Ok(Json(box_profile))
}

async fn with_contents(db: &PgPool, box_profile: BoxProfile) -> Result<BoxProfileContents, AppError> {
    let owner = Owner::BoxProfile(box_profile.id);
    let videos = fetch_videos(db, owner).await?;
    let video_groups = fetch_video_groups(db, owner).await?;
    Ok(BoxProfileContents {
        box_profile,
        videos,
        video_groups,
    })
}

/// Runs `insert` with freshly generated url codes until one does not collide
/// with an existing box profile.
async fn with_fresh_url_code<F, Fut>(insert: F) -> Result<BoxProfile, AppError>
where
    F: Fn(String) -> Fut,
    Fut: std::future::Future<Output = Result<BoxProfile, AppError>>,
{
    for attempt in 1..=URL_CODE_ATTEMPTS {
        match insert(generate_url_code()).await {
            Err(AppError::Conflict(msg)) if msg.contains("box_profiles_url_code_key") => {
                tracing::warn!("Url code collision on attempt {}", attempt);
            }
            other => return other,
        }
    }

    Err(AppError::Conflict(
        "Could not generate a unique url code".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn box_profile(url_code: String) -> BoxProfile {
        BoxProfile {
            id: 5,
            uuid: Uuid::new_v4(),
            name: "Living room".into(),
            url_code,
            user_id: 1,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn collision() -> AppError {
        AppError::Conflict("Unique constraint 'box_profiles_url_code_key' violated".into())
    }

    #[test]
    fn url_codes_are_short_and_alphanumeric() {
        let code = generate_url_code();
        assert_eq!(code.len(), URL_CODE_LENGTH);
        assert!(code.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn serialized_box_profile_exposes_url_code_only() {
        let json = serde_json::to_value(box_profile("abcDEF1234".into())).unwrap();
        assert_eq!(json["urlCode"], "abcDEF1234");
        assert!(json.get("id").is_none());
        assert!(json.get("userId").is_none());
    }

    #[test]
    fn update_body_defaults_to_keeping_the_code() {
        let body: UpdateBoxProfileBody = serde_json::from_value(json!({ "name": "Den" })).unwrap();
        assert!(!body.regenerate_url_code);
        let body: UpdateBoxProfileBody =
            serde_json::from_value(json!({ "regenerateUrlCode": true })).unwrap();
        assert!(body.regenerate_url_code);
        assert!(body.name.is_none());
    }

    #[tokio::test]
    async fn url_code_collisions_are_retried() {
        let calls = AtomicUsize::new(0);
        let result = with_fresh_url_code(|code| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(collision())
                } else {
                    Ok(box_profile(code))
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(result.url_code.len(), URL_CODE_LENGTH);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retries_give_up_after_five_collisions() {
        let calls = AtomicUsize::new(0);
        let result = with_fresh_url_code(|_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(collision()) }
        })
        .await;
        assert!(matches!(result, Err(AppError::Conflict(_))));
        assert_eq!(calls.load(Ordering::SeqCst), URL_CODE_ATTEMPTS);
    }

    #[tokio::test]
    async fn other_errors_are_not_retried() {
        let calls = AtomicUsize::new(0);
        let result = with_fresh_url_code(|_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(AppError::NotFound("gone".into())) }
        })
        .await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn collision_message_names_the_url_code_constraint() {
        match collision() {
            AppError::Conflict(msg) => assert!(msg.contains("box_profiles_url_code_key")),
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
