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
use crate::api::common::ownership::{resolve_user_id, unique_uuids, Owner};
use crate::api::common::utils::{timeout_query, QUERY_TIMEOUT};
use crate::api::videos::Video;
use crate::errors::AppError;
use crate::InnerState;

const GROUP_COLUMNS: &str =
    "id, uuid, name, description, user_id, box_profile_id, created_at, updated_at";

#[derive(Debug, Clone, FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoGroup {
    #[serde(skip)]
    pub id: i64,
    pub uuid: Uuid,
    pub name: String,
    pub description: Option<String>,
    #[serde(skip)]
    pub user_id: Option<i64>,
    #[serde(skip)]
    pub box_profile_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoGroupResponse {
    #[serde(flatten)]
    pub group: VideoGroup,
    pub videos: Vec<Video>,
}

#[derive(Debug, FromRow)]
struct GroupVideoRow {
    group_ref: i64,
    #[sqlx(flatten)]
    video: Video,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateVideoGroupBody {
    #[validate(length(min = 1, max = 255, message = "name should not be empty"))]
    pub name: String,
    #[validate(length(max = 2000, message = "description is too long"))]
    pub description: Option<String>,
    #[serde(default)]
    pub video_uuids: Option<Vec<Uuid>>,
}

#[derive(Debug, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateVideoGroupBody {
    #[validate(length(min = 1, max = 255, message = "name should not be empty"))]
    pub name: Option<String>,
    /// Absent keeps the description, `null` clears it.
    #[serde(default, deserialize_with = "present_or_null")]
    #[validate(length(max = 2000, message = "description is too long"))]
    pub description: Option<Option<String>>,
    pub video_uuids: Option<Vec<Uuid>>,
}

fn present_or_null<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

pub fn routes(state: InnerState) -> Router<InnerState> {
    Router::new()
        .route("/", get(all_video_groups).post(create_video_group))
        .route(
            "/{uuid}",
            get(get_video_group_by_uuid)
                .patch(update_video_group)
                .delete(delete_video_group),
        )
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth))
        .with_state(state)
}

#[tracing::instrument(name = "Get all video groups", skip(inner, current_user), fields(user_uuid = %current_user.uuid))]
pub async fn all_video_groups(
    State(inner): State<InnerState>,
    Extension(current_user): Extension<CurrentUser>,
) -> Result<Json<Vec<VideoGroupResponse>>, AppError> {
    let owner = Owner::User(resolve_user_id(&inner.db, &current_user).await?);
    Ok(Json(fetch_video_groups(&inner.db, owner).await?))
}

#[tracing::instrument(name = "Get video group by uuid", skip(inner, current_user), fields(user_uuid = %current_user.uuid))]
pub async fn get_video_group_by_uuid(
    State(inner): State<InnerState>,
    Extension(current_user): Extension<CurrentUser>,
    Path(uuid): Path<Uuid>,
) -> Result<Json<VideoGroupResponse>, AppError> {
    let owner = Owner::User(resolve_user_id(&inner.db, &current_user).await?);
    Ok(Json(fetch_video_group(&inner.db, owner, uuid).await?))
}

#[tracing::instrument(name = "Create video group", skip(inner, current_user, body), fields(user_uuid = %current_user.uuid))]
pub async fn create_video_group(
    State(inner): State<InnerState>,
    Extension(current_user): Extension<CurrentUser>,
    Json(body): Json<CreateVideoGroupBody>,
) -> Result<(StatusCode, Json<VideoGroupResponse>), AppError> {
    body.validate()?;
    let owner = Owner::User(resolve_user_id(&inner.db, &current_user).await?);
    let group = insert_video_group(&inner.db, owner, body).await?;
    Ok((StatusCode::CREATED, Json(group)))
}

#[tracing::instrument(name = "Update video group", skip(inner, current_user, body), fields(user_uuid = %current_user.uuid))]
pub async fn update_video_group(
    State(inner): State<InnerState>,
    Extension(current_user): Extension<CurrentUser>,
    Path(uuid): Path<Uuid>,
    Json(body): Json<UpdateVideoGroupBody>,
) -> Result<Json<VideoGroupResponse>, AppError> {
    body.validate()?;
    let owner = Owner::User(resolve_user_id(&inner.db, &current_user).await?);
    Ok(Json(patch_video_group(&inner.db, owner, uuid, body).await?))
}

#[tracing::instrument(name = "Delete video group", skip(inner, current_user), fields(user_uuid = %current_user.uuid))]
pub async fn delete_video_group(
    State(inner): State<InnerState>,
    Extension(current_user): Extension<CurrentUser>,
    Path(uuid): Path<Uuid>,
) -> Result<Json<VideoGroupResponse>, AppError> {
    let owner = Owner::User(resolve_user_id(&inner.db, &current_user).await?);
    Ok(Json(remove_video_group(&inner.db, owner, uuid).await?))
}

#[tracing::instrument(name = "Fetch video groups", skip(db))]
pub async fn fetch_video_groups(
    db: &PgPool,
    owner: Owner,
) -> Result<Vec<VideoGroupResponse>, AppError> {
    let query = format!(
        "SELECT {} FROM video_groups WHERE {} = $1 ORDER BY created_at DESC, id DESC",
        GROUP_COLUMNS,
        owner.column()
    );
    let groups = timeout_query(
        QUERY_TIMEOUT,
        sqlx::query_as::<_, VideoGroup>(&query)
            .bind(owner.id())
            .fetch_all(db),
    )
    .await?;

    tracing::debug!("Fetched {} video groups", groups.len());
    with_videos(db, groups).await
}

#[tracing::instrument(name = "Fetch video group", skip(db))]
pub async fn fetch_video_group(
    db: &PgPool,
    owner: Owner,
    uuid: Uuid,
) -> Result<VideoGroupResponse, AppError> {
    let query = format!(
        "SELECT {} FROM video_groups WHERE uuid = $1 AND {} = $2",
        GROUP_COLUMNS,
        owner.column()
    );
    let group = timeout_query(
        QUERY_TIMEOUT,
        sqlx::query_as::<_, VideoGroup>(&query)
            .bind(uuid)
            .bind(owner.id())
            .fetch_optional(db),
    )
    .await?
    .ok_or_else(|| group_not_found(uuid))?;

    with_videos(db, vec![group])
        .await?
        .pop()
        .ok_or_else(|| group_not_found(uuid))
}

#[tracing::instrument(name = "Insert video group", skip(db, body))]
pub async fn insert_video_group(
    db: &PgPool,
    owner: Owner,
    body: CreateVideoGroupBody,
) -> Result<VideoGroupResponse, AppError> {
    let mut tx = timeout_query(QUERY_TIMEOUT, db.begin()).await?;

    let uuid = Uuid::new_v4();
    let group_id = timeout_query(
        QUERY_TIMEOUT,
        sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO video_groups (uuid, name, description, user_id, box_profile_id)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id
            "#,
        )
        .bind(uuid)
        .bind(body.name.trim())
        .bind(body.description.as_deref())
        .bind(owner.user_id())
        .bind(owner.box_profile_id())
        .fetch_one(&mut *tx),
    )
    .await?;

    if let Some(video_uuids) = body.video_uuids.as_deref() {
        let video_ids = resolve_video_ids(&mut tx, owner, video_uuids).await?;
        link_videos(&mut tx, group_id, &video_ids).await?;
    }

    timeout_query(QUERY_TIMEOUT, tx.commit()).await?;
    tracing::info!("Created video group {}", uuid);

    fetch_video_group(db, owner, uuid).await
}

#[tracing::instrument(name = "Patch video group", skip(db, body))]
pub async fn patch_video_group(
    db: &PgPool,
    owner: Owner,
    uuid: Uuid,
    body: UpdateVideoGroupBody,
) -> Result<VideoGroupResponse, AppError> {
    let mut tx = timeout_query(QUERY_TIMEOUT, db.begin()).await?;

    let query = format!(
        r#"
        UPDATE video_groups
        SET name = COALESCE($1, name),
            description = CASE WHEN $2 THEN $3 ELSE description END,
            updated_at = NOW()
        WHERE uuid = $4 AND {} = $5
        RETURNING id
        "#,
        owner.column()
    );
    let group_id = timeout_query(
        QUERY_TIMEOUT,
        sqlx::query_scalar::<_, i64>(&query)
            .bind(body.name.as_deref().map(str::trim))
            .bind(body.description.is_some())
            .bind(body.description.clone().flatten())
            .bind(uuid)
            .bind(owner.id())
            .fetch_optional(&mut *tx),
    )
    .await?
    .ok_or_else(|| group_not_found(uuid))?;

    if let Some(video_uuids) = body.video_uuids.as_deref() {
        tracing::debug!("Replacing videos of video group {}", uuid);
        let video_ids = resolve_video_ids(&mut tx, owner, video_uuids).await?;
        timeout_query(
            QUERY_TIMEOUT,
            sqlx::query("DELETE FROM video_groups_videos WHERE video_group_id = $1")
                .bind(group_id)
                .execute(&mut *tx),
        )
        .await?;
        link_videos(&mut tx, group_id, &video_ids).await?;
    }

    timeout_query(QUERY_TIMEOUT, tx.commit()).await?;
    tracing::info!("Updated video group {}", uuid);

    fetch_video_group(db, owner, uuid).await
}

#[tracing::instrument(name = "Remove video group", skip(db))]
pub async fn remove_video_group(
    db: &PgPool,
    owner: Owner,
    uuid: Uuid,
) -> Result<VideoGroupResponse, AppError> {
    let group = fetch_video_group(db, owner, uuid).await?;

    let mut tx = timeout_query(QUERY_TIMEOUT, db.begin()).await?;
    timeout_query(
        QUERY_TIMEOUT,
        sqlx::query("DELETE FROM video_groups_videos WHERE video_group_id = $1")
            .bind(group.group.id)
            .execute(&mut *tx),
    )
    .await?;
    let query = format!(
        "DELETE FROM video_groups WHERE id = $1 AND {} = $2",
        owner.column()
    );
    let deleted = timeout_query(
        QUERY_TIMEOUT,
        sqlx::query(&query)
            .bind(group.group.id)
            .bind(owner.id())
            .execute(&mut *tx),
    )
    .await?;

    if deleted.rows_affected() == 0 {
        return Err(group_not_found(uuid));
    }
    timeout_query(QUERY_TIMEOUT, tx.commit()).await?;
    tracing::info!("Deleted video group {}", uuid);

    Ok(group)
}

async fn with_videos(
    db: &PgPool,
    groups: Vec<VideoGroup>,
) -> Result<Vec<VideoGroupResponse>, AppError> {
    if groups.is_empty() {
        return Ok(Vec::new());
    }

    let ids: Vec<i64> = groups.iter().map(|g| g.id).collect();
    let rows = timeout_query(
        QUERY_TIMEOUT,
        sqlx::query_as::<_, GroupVideoRow>(
            r#"
            SELECT vgv.video_group_id AS group_ref,
                   v.id, v.uuid, v.name, v.platform, v.external_id,
                   v.user_id, v.box_profile_id, v.created_at, v.updated_at
            FROM video_groups_videos vgv
            INNER JOIN videos v ON v.id = vgv.video_id
            WHERE vgv.video_group_id = ANY($1)
            ORDER BY v.created_at DESC, v.id DESC
            "#,
        )
        .bind(&ids)
        .fetch_all(db),
    )
    .await?;

    let mut by_group: HashMap<i64, Vec<Video>> = HashMap::new();
    for row in rows {
        by_group.entry(row.group_ref).or_default().push(row.video);
    }

    Ok(groups
        .into_iter()
        .map(|group| VideoGroupResponse {
            videos: by_group.remove(&group.id).unwrap_or_default(),
            group,
        })
        .collect())
}

async fn resolve_video_ids(
    tx: &mut Transaction<'_, Postgres>,
    owner: Owner,
    video_uuids: &[Uuid],
) -> Result<Vec<i64>, AppError> {
    let uuids = unique_uuids(video_uuids);
    if uuids.is_empty() {
        return Ok(Vec::new());
    }

    let query = format!(
        "SELECT id FROM videos WHERE uuid = ANY($1) AND {} = $2",
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
            "Only {} of {} videos belong to the owner",
            ids.len(),
            uuids.len()
        );
        return Err(AppError::NotFound("One or more videos not found".to_string()));
    }
    Ok(ids)
}

async fn link_videos(
    tx: &mut Transaction<'_, Postgres>,
    group_id: i64,
    video_ids: &[i64],
) -> Result<(), AppError> {
    if video_ids.is_empty() {
        return Ok(());
    }
    timeout_query(
        QUERY_TIMEOUT,
        sqlx::query(
            r#"
            INSERT INTO video_groups_videos (video_group_id, video_id)
            SELECT $1, UNNEST($2::bigint[])
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(group_id)
        .bind(video_ids)
        .execute(&mut **tx),
    )
    .await?;
    Ok(())
}

fn group_not_found(uuid: Uuid) -> AppError {
    AppError::NotFound(format!("Video group '{}' not found", uuid))
}
