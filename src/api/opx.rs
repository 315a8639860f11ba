//! Videos and video groups owned by a box profile rather than a user,
//! served under `/opx/{box_profile_uuid}`. The box profile has to belong to
//! the caller.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    middleware,
    routing::get,
    Extension, Json, Router,
};
use uuid::Uuid;
use validator::Validate;

use crate::api::common::middleware::{require_auth, CurrentUser};
use crate::api::common::ownership::{resolve_box_profile, Owner};
use crate::api::video_groups::{
    fetch_video_group, fetch_video_groups, insert_video_group, patch_video_group,
    remove_video_group, CreateVideoGroupBody, UpdateVideoGroupBody, VideoGroupResponse,
};
use crate::api::videos::{
    fetch_video, fetch_videos, insert_video, patch_video, remove_video, CreateVideoBody,
    UpdateVideoBody, VideoResponse,
};
use crate::errors::AppError;
use crate::InnerState;

pub fn routes(state: InnerState) -> Router<InnerState> {
    Router::new()
        .route(
            "/{box_profile_uuid}/videos",
            get(all_box_videos).post(create_box_video),
        )
        .route(
            "/{box_profile_uuid}/videos/{uuid}",
            get(get_box_video)
                .patch(update_box_video)
                .delete(delete_box_video),
        )
        .route(
            "/{box_profile_uuid}/video-groups",
            get(all_box_video_groups).post(create_box_video_group),
        )
        .route(
            "/{box_profile_uuid}/video-groups/{uuid}",
            get(get_box_video_group)
                .patch(update_box_video_group)
                .delete(delete_box_video_group),
        )
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth))
        .with_state(state)
}

async fn box_owner(
    inner: &InnerState,
    current_user: &CurrentUser,
    box_profile_uuid: Uuid,
) -> Result<Owner, AppError> {
    let box_profile = resolve_box_profile(&inner.db, current_user, box_profile_uuid).await?;
    Ok(Owner::BoxProfile(box_profile.id))
}

#[tracing::instrument(name = "Get box videos", skip(inner, current_user), fields(user_uuid = %current_user.uuid))]
pub async fn all_box_videos(
    State(inner): State<InnerState>,
    Extension(current_user): Extension<CurrentUser>,
    Path(box_profile_uuid): Path<Uuid>,
) -> Result<Json<Vec<VideoResponse>>, AppError> {
    let owner = box_owner(&inner, &current_user, box_profile_uuid).await?;
    Ok(Json(fetch_videos(&inner.db, owner).await?))
}

#[tracing::instrument(name = "Get box video", skip(inner, current_user), fields(user_uuid = %current_user.uuid))]
pub async fn get_box_video(
    State(inner): State<InnerState>,
    Extension(current_user): Extension<CurrentUser>,
    Path((box_profile_uuid, uuid)): Path<(Uuid, Uuid)>,
) -> Result<Json<VideoResponse>, AppError> {
    let owner = box_owner(&inner, &current_user, box_profile_uuid).await?;
    Ok(Json(fetch_video(&inner.db, owner, uuid).await?))
}

#[tracing::instrument(name = "Create box video", skip(inner, current_user, body), fields(user_uuid = %current_user.uuid))]
pub async fn create_box_video(
    State(inner): State<InnerState>,
    Extension(current_user): Extension<CurrentUser>,
    Path(box_profile_uuid): Path<Uuid>,
    Json(body): Json<CreateVideoBody>,
) -> Result<(StatusCode, Json<VideoResponse>), AppError> {
    body.validate()?;
    let owner = box_owner(&inner, &current_user, box_profile_uuid).await?;
    let video = insert_video(&inner.db, owner, body).await?;
    Ok((StatusCode::CREATED, Json(video)))
}

#[tracing::instrument(name = "Update box video", skip(inner, current_user, body), fields(user_uuid = %current_user.uuid))]
pub async fn update_box_video(
    State(inner): State<InnerState>,
    Extension(current_user): Extension<CurrentUser>,
    Path((box_profile_uuid, uuid)): Path<(Uuid, Uuid)>,
    Json(body): Json<UpdateVideoBody>,
) -> Result<Json<VideoResponse>, AppError> {
    body.validate()?;
    let owner = box_owner(&inner, &current_user, box_profile_uuid).await?;
    Ok(Json(patch_video(&inner.db, owner, uuid, body).await?))
}

#[tracing::instrument(name = "Delete box video", skip(inner, current_user), fields(user_uuid = %current_user.uuid))]
pub async fn delete_box_video(
    State(inner): State<InnerState>,
    Extension(current_user): Extension<CurrentUser>,
    Path((box_profile_uuid, uuid)): Path<(Uuid, Uuid)>,
) -> Result<Json<VideoResponse>, AppError> {
    let owner = box_owner(&inner, &current_user, box_profile_uuid).await?;
    Ok(Json(remove_video(&inner.db, owner, uuid).await?))
}

#[tracing::instrument(name = "Get box video groups", skip(inner, current_user), fields(user_uuid = %current_user.uuid))]
pub async fn all_box_video_groups(
    State(inner): State<InnerState>,
    Extension(current_user): Extension<CurrentUser>,
    Path(box_profile_uuid): Path<Uuid>,
) -> Result<Json<Vec<VideoGroupResponse>>, AppError> {
    let owner = box_owner(&inner, &current_user, box_profile_uuid).await?;
    Ok(Json(fetch_video_groups(&inner.db, owner).await?))
}

#[tracing::instrument(name = "Get box video group", skip(inner, current_user), fields(user_uuid = %current_user.uuid))]
pub async fn get_box_video_group(
    State(inner): State<InnerState>,
    Extension(current_user): Extension<CurrentUser>,
    Path((box_profile_uuid, uuid)): Path<(Uuid, Uuid)>,
) -> Result<Json<VideoGroupResponse>, AppError> {
    let owner = box_owner(&inner, &current_user, box_profile_uuid).await?;
    Ok(Json(fetch_video_group(&inner.db, owner, uuid).await?))
}

#[tracing::instrument(name = "Create box video group", skip(inner, current_user, body), fields(user_uuid = %current_user.uuid))]
pub async fn create_box_video_group(
    State(inner): State<InnerState>,
    Extension(current_user): Extension<CurrentUser>,
    Path(box_profile_uuid): Path<Uuid>,
    Json(body): Json<CreateVideoGroupBody>,
) -> Result<(StatusCode, Json<VideoGroupResponse>), AppError> {
    body.validate()?;
    let owner = box_owner(&inner, &current_user, box_profile_uuid).await?;
    let group = insert_video_group(&inner.db, owner, body).await?;
    Ok((StatusCode::CREATED, Json(group)))
}

#[tracing::instrument(name = "Update box video group", skip(inner, current_user, body), fields(user_uuid = %current_user.uuid))]
pub async fn update_box_video_group(
    State(inner): State<InnerState>,
    Extension(current_user): Extension<CurrentUser>,
    Path((box_profile_uuid, uuid)): Path<(Uuid, Uuid)>,
    Json(body): Json<UpdateVideoGroupBody>,
) -> Result<Json<VideoGroupResponse>, AppError> {
    body.validate()?;
    let owner = box_owner(&inner, &current_user, box_profile_uuid).await?;
    Ok(Json(patch_video_group(&inner.db, owner, uuid, body).await?))
}

#[tracing::instrument(name = "Delete box video group", skip(inner, current_user), fields(user_uuid = %current_user.uuid))]
pub async fn delete_box_video_group(
    State(inner): State<InnerState>,
    Extension(current_user): Extension<CurrentUser>,
    Path((box_profile_uuid, uuid)): Path<(Uuid, Uuid)>,
) -> Result<Json<VideoGroupResponse>, AppError> {
    let owner = box_owner(&inner, &current_user, box_profile_uuid).await?;
    Ok(Json(remove_video_group(&inner.db, owner, uuid).await?))
}
