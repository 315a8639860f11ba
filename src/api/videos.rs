use axum::{
    extract::{Path, State},
    http::StatusCode,
    middleware,
    routing::get,
    Extension, Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use std::collections::HashMap;
use uuid::Uuid;
use validator::Validate;

use crate::api::common::middleware::{require_auth, CurrentUser};
use crate::api::common::ownership::{
    resolve_user_id, unique_uuids, Owner, RelatedRow, RelatedSummary,
};
use crate::api::common::utils::{timeout_query, QUERY_TIMEOUT};
use crate::errors::AppError;
use crate::InnerState;

const VIDEO_COLUMNS: &str =
    "id, uuid, name, platform, external_id, user_id, box_profile_id, created_at, updated_at";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "video_platform", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Platform {
    Youtube,
    Vimeo,
    Twitch,
}

#[derive(Debug, Clone, FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Video {
    #[serde(skip)]
    pub id: i64,
    pub uuid: Uuid,
    pub name: String,
    pub platform: Platform,
    pub external_id: String,
    #[serde(skip)]
    pub user_id: Option<i64>,
    #[serde(skip)]
    pub box_profile_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoResponse {
    #[serde(flatten)]
    pub video: Video,
    pub video_groups: Vec<RelatedSummary>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateVideoBody {
    #[validate(length(min = 1, max = 255, message = "name should not be empty"))]
    pub name: String,
    pub platform: Platform,
    #[validate(length(min = 1, max = 255, message = "externalId should not be empty"))]
    pub external_id: String,
    #[serde(default)]
    pub video_group_uuids: Option<Vec<Uuid>>,
}

#[derive(Debug, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateVideoBody {
    #[validate(length(min = 1, max = 255, message = "name should not be empty"))]
    pub name: Option<String>,
    pub platform: Option<Platform>,
    #[validate(length(min = 1, max = 255, message = "externalId should not be empty"))]
    pub external_id: Option<String>,
    pub video_group_uuids: Option<Vec<Uuid>>,
}

pub fn routes(state: InnerState) -> Router<InnerState> {
    Router::new()
        .route("/", get(all_videos).post(create_video))
        .route(
            "/{uuid}",
            get(get_video_by_uuid)
                .patch(update_video)
                .delete(delete_video),
        )
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth))
        .with_state(state)
}

#[tracing::instrument(name = "Get all videos", skip(inner, current_user), fields(user_uuid = %current_user.uuid))]
pub async fn all_videos(
    State(inner): State<InnerState>,
    Extension(current_user): Extension<CurrentUser>,
) -> Result<Json<Vec<VideoResponse>>, AppError> {
    let owner = Owner::User(resolve_user_id(&inner.db, &current_user).await?);
    Ok(Json(fetch_videos(&inner.db, owner).await?))
}

#[tracing::instrument(name = "Get video by uuid", skip(inner, current_user), fields(user_uuid = %current_user.uuid))]
pub async fn get_video_by_uuid(
    State(inner): State<InnerState>,
    Extension(current_user): Extension<CurrentUser>,
    Path(uuid): Path<Uuid>,
) -> Result<Json<VideoResponse>, AppError> {
    let owner = Owner::User(resolve_user_id(&inner.db, &current_user).await?);
    Ok(Json(fetch_video(&inner.db, owner, uuid).await?))
}

#[tracing::instrument(name = "Create video", skip(inner, current_user, body), fields(user_uuid = %current_user.uuid))]
pub async fn create_video(
    State(inner): State<InnerState>,
    Extension(current_user): Extension<CurrentUser>,
    Json(body): Json<CreateVideoBody>,
) -> Result<(StatusCode, Json<VideoResponse>), AppError> {
    body.validate()?;
    let owner = Owner::User(resolve_user_id(&inner.db, &current_user).await?);
    let video = insert_video(&inner.db, owner, body).await?;
    Ok((StatusCode::CREATED, Json(video)))
}

#[tracing::instrument(name = "Update video", skip(inner, current_user, body), fields(user_uuid = %current_user.uuid))]
pub async fn update_video(
    State(inner): State<InnerState>,
    Extension(current_user): Extension<CurrentUser>,
    Path(uuid): Path<Uuid>,
    Json(body): Json<UpdateVideoBody>,
) -> Result<Json<VideoResponse>, AppError> {
    body.validate()?;
    let owner = Owner::User(resolve_user_id(&inner.db, &current_user).await?);
    Ok(Json(patch_video(&inner.db, owner, uuid, body).await?))
}

#[tracing::instrument(name = "Delete video", skip(inner, current_user), fields(user_uuid = %current_user.uuid))]
pub async fn delete_video(
    State(inner): State<InnerState>,
    Extension(current_user): Extension<CurrentUser>,
    Path(uuid): Path<Uuid>,
) -> Result<Json<VideoResponse>, AppError> {
    let owner = Owner::User(resolve_user_id(&inner.db, &current_user).await?);
    Ok(Json(remove_video(&inner.db, owner, uuid).await?))
}

#[tracing::instrument(name = "Fetch videos", skip(db))]
pub async fn fetch_videos(db: &PgPool, owner: Owner) -> Result<Vec<VideoResponse>, AppError> {
    let query = format!(
        "SELECT {} FROM videos WHERE {} = $1 ORDER BY created_at DESC, id DESC",
        VIDEO_COLUMNS,
        owner.column()
    );
    let videos = timeout_query(
        QUERY_TIMEOUT,
        sqlx::query_as::<_, Video>(&query)
            .bind(owner.id())
            .fetch_all(db),
    )
    .await?;

    tracing::debug!("Fetched {} videos", videos.len());
    with_groups(db, videos).await
}

#[tracing::instrument(name = "Fetch video", skip(db))]
pub async fn fetch_video(db: &PgPool, owner: Owner, uuid: Uuid) -> Result<VideoResponse, AppError> {
    let query = format!(
        "SELECT {} FROM videos WHERE uuid = $1 AND {} = $2",
        VIDEO_COLUMNS,
        owner.column()
    );
    let video = timeout_query(
        QUERY_TIMEOUT,
        sqlx::query_as::<_, Video>(&query)
            .bind(uuid)
            .bind(owner.id())
            .fetch_optional(db),
    )
    .await?
    .ok_or_else(|| video_not_found(uuid))?;

    with_groups(db, vec![video])
        .await?
        .pop()
        .ok_or_else(|| video_not_found(uuid))
}

#[tracing::instrument(name = "Insert video", skip(db, body))]
pub async fn insert_video(
    db: &PgPool,
    owner: Owner,
    body: CreateVideoBody,
) -> Result<VideoResponse, AppError> {
    let mut tx = timeout_query(QUERY_TIMEOUT, db.begin()).await?;

    let uuid = Uuid::new_v4();
    let video_id = timeout_query(
        QUERY_TIMEOUT,
        sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO videos (uuid, name, platform, external_id, user_id, box_profile_id)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id
            "#,
        )
        .bind(uuid)
        .bind(body.name.trim())
        .bind(body.platform)
        .bind(body.external_id.trim())
        .bind(owner.user_id())
        .bind(owner.box_profile_id())
        .fetch_one(&mut *tx),
    )
    .await?;

    if let Some(group_uuids) = body.video_group_uuids.as_deref() {
        let group_ids = resolve_group_ids(&mut tx, owner, group_uuids).await?;
        link_groups(&mut tx, video_id, &group_ids).await?;
    }

    timeout_query(QUERY_TIMEOUT, tx.commit()).await?;
    tracing::info!("Created video {}", uuid);

    fetch_video(db, owner, uuid).await
}

#[tracing::instrument(name = "Patch video", skip(db, body))]
pub async fn patch_video(
    db: &PgPool,
    owner: Owner,
    uuid: Uuid,
    body: UpdateVideoBody,
) -> Result<VideoResponse, AppError> {
    let mut tx = timeout_query(QUERY_TIMEOUT, db.begin()).await?;

    let query = format!(
        r#"
        UPDATE videos
        SET name = COALESCE($1, name),
            platform = COALESCE($2, platform),
            external_id = COALESCE($3, external_id),
            updated_at = NOW()
        WHERE uuid = $4 AND {} = $5
        RETURNING id
        "#,
        owner.column()
    );
    let video_id = timeout_query(
        QUERY_TIMEOUT,
        sqlx::query_scalar::<_, i64>(&query)
            .bind(body.name.as_deref().map(str::trim))
            .bind(body.platform)
            .bind(body.external_id.as_deref().map(str::trim))
            .bind(uuid)
            .bind(owner.id())
            .fetch_optional(&mut *tx),
    )
    .await?
    .ok_or_else(|| video_not_found(uuid))?;

    if let Some(group_uuids) = body.video_group_uuids.as_deref() {
        tracing::debug!("Replacing video groups of video {}", uuid);
        let group_ids = resolve_group_ids(&mut tx, owner, group_uuids).await?;
        timeout_query(
            QUERY_TIMEOUT,
            sqlx::query("DELETE FROM video_groups_videos WHERE video_id = $1")
                .bind(video_id)
                .execute(&mut *tx),
        )
        .await?;
        link_groups(&mut tx, video_id, &group_ids).await?;
    }

    timeout_query(QUERY_TIMEOUT, tx.commit()).await?;
    tracing::info!("Updated video {}", uuid);

    fetch_video(db, owner, uuid).await
}

#[tracing::instrument(name = "Remove video", skip(db))]
pub async fn remove_video(db: &PgPool, owner: Owner, uuid: Uuid) -> Result<VideoResponse, AppError> {
    let video = fetch_video(db, owner, uuid).await?;

    let mut tx = timeout_query(QUERY_TIMEOUT, db.begin()).await?;
    timeout_query(
        QUERY_TIMEOUT,
        sqlx::query("DELETE FROM video_groups_videos WHERE video_id = $1")
            .bind(video.video.id)
            .execute(&mut *tx),
    )
    .await?;
    let query = format!("DELETE FROM videos WHERE id = $1 AND {} = $2", owner.column());
    let deleted = timeout_query(
        QUERY_TIMEOUT,
        sqlx::query(&query)
            .bind(video.video.id)
            .bind(owner.id())
            .execute(&mut *tx),
    )
    .await?;

    if deleted.rows_affected() == 0 {
        return Err(video_not_found(uuid));
    }
    timeout_query(QUERY_TIMEOUT, tx.commit()).await?;
    tracing::info!("Deleted video {}", uuid);

    Ok(video)
}

async fn with_groups(db: &PgPool, videos: Vec<Video>) -> Result<Vec<VideoResponse>, AppError> {
    if videos.is_empty() {
        return Ok(Vec::new());
    }

    let ids: Vec<i64> = videos.iter().map(|v| v.id).collect();
    let rows = timeout_query(
        QUERY_TIMEOUT,
        sqlx::query_as::<_, RelatedRow>(
            r#"
            SELECT vgv.video_id AS parent_id, g.uuid, g.name
            FROM video_groups_videos vgv
            INNER JOIN video_groups g ON g.id = vgv.video_group_id
            WHERE vgv.video_id = ANY($1)
            ORDER BY g.name
            "#,
        )
        .bind(&ids)
        .fetch_all(db),
    )
    .await?;

    let mut by_video: HashMap<i64, Vec<RelatedSummary>> = HashMap::new();
    for row in rows {
        by_video.entry(row.parent_id).or_default().push(row.into());
    }

    Ok(videos
        .into_iter()
        .map(|video| VideoResponse {
            video_groups: by_video.remove(&video.id).unwrap_or_default(),
            video,
        })
        .collect())
}

/// Ids of the given video groups, all of which must belong to `owner`.
async fn resolve_group_ids(
    tx: &mut Transaction<'_, Postgres>,
    owner: Owner,
    group_uuids: &[Uuid],
) -> Result<Vec<i64>, AppError> {
    let uuids = unique_uuids(group_uuids);
    if uuids.is_empty() {
        return Ok(Vec::new());
    }

    let query = format!(
        "SELECT id FROM video_groups WHERE uuid = ANY($1) AND {} = $2",
        owner.column()
    );
    let ids = timeout_query(
        QUERY_TIMEOUT,
        sqlx::query_scalar::<_, i64>(&query)
            .bind(&uuids)
            .bind(owner.id())
            .fetch_all(&mut **tx),
    )
    .await?;

    if ids.len() != uuids.len() {
        tracing::warn!(
            "Only {} of {} video groups belong to the owner",
            ids.len(),
            uuids.len()
        );
        return Err(AppError::NotFound(
            "One or more video groups not found".to_string(),
        ));
    }
    Ok(ids)
}

async fn link_groups(
    tx: &mut Transaction<'_, Postgres>,
    video_id: i64,
    group_ids: &[i64],
) -> Result<(), AppError> {
    if group_ids.is_empty() {
        return Ok(());
    }
    timeout_query(
        QUERY_TIMEOUT,
        sqlx::query(
            r#"
            INSERT INTO video_groups_videos (video_group_id, video_id)
            SELECT UNNEST($1::bigint[]), $2
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(group_ids)
        .bind(video_id)
        .execute(&mut **tx),
    )
    .await?;
    Ok(())
}

fn video_not_found(uuid: Uuid) -> AppError {
    AppError::NotFound(format!("Video '{}' not found", uuid))
}
