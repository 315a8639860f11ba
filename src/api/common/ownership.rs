use serde::Serialize;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::api::box_profiles::BoxProfile;
use crate::api::common::middleware::CurrentUser;
use crate::api::common::utils::{timeout_query, QUERY_TIMEOUT};
use crate::errors::AppError;

/// Who a video or video group belongs to. Every query on those tables is
/// filtered by the owner's column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Owner {
    User(i64),
    BoxProfile(i64),
}

impl Owner {
    pub fn column(&self) -> &'static str {
        match self {
            Owner::User(_) => "user_id",
            Owner::BoxProfile(_) => "box_profile_id",
        }
    }

    pub fn id(&self) -> i64 {
        match self {
            Owner::User(id) | Owner::BoxProfile(id) => *id,
        }
    }

    pub fn user_id(&self) -> Option<i64> {
        match self {
            Owner::User(id) => Some(*id),
            Owner::BoxProfile(_) => None,
        }
    }

    pub fn box_profile_id(&self) -> Option<i64> {
        match self {
            Owner::BoxProfile(id) => Some(*id),
            Owner::User(_) => None,
        }
    }
}

/// `uuid` + `name` of a related row, keyed by the id of the row it hangs off.
#[derive(Debug, Clone, FromRow)]
pub struct RelatedRow {
    pub parent_id: i64,
    pub uuid: Uuid,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RelatedSummary {
    pub uuid: Uuid,
    pub name: String,
}

impl From<RelatedRow> for RelatedSummary {
    fn from(row: RelatedRow) -> Self {
        Self {
            uuid: row.uuid,
            name: row.name,
        }
    }
}

#[tracing::instrument(name = "Resolve user id", skip(db, current_user), fields(user_uuid = %current_user.uuid))]
pub async fn resolve_user_id(db: &PgPool, current_user: &CurrentUser) -> Result<i64, AppError> {
    let id = timeout_query(
        QUERY_TIMEOUT,
        sqlx::query_scalar::<_, i64>("SELECT id FROM users WHERE uuid = $1")
            .bind(current_user.uuid)
            .fetch_optional(db),
    )
    .await?;

    id.ok_or_else(|| {
        tracing::warn!("Token refers to a user that no longer exists");
        AppError::Authentication(anyhow::anyhow!("User no longer exists"))
    })
}

#[tracing::instrument(name = "Resolve owned box profile", skip(db, current_user), fields(user_uuid = %current_user.uuid))]
pub async fn resolve_box_profile(
    db: &PgPool,
    current_user: &CurrentUser,
    box_profile_uuid: Uuid,
) -> Result<BoxProfile, AppError> {
    let query = r#"
        SELECT b.id, b.uuid, b.name, b.url_code, b.user_id, b.created_at, b.updated_at
        FROM box_profiles b
        INNER JOIN users u ON u.id = b.user_id
        WHERE b.uuid = $1 AND u.uuid = $2
    "#;

    let box_profile = timeout_query(
        QUERY_TIMEOUT,
        sqlx::query_as::<_, BoxProfile>(query)
            .bind(box_profile_uuid)
            .bind(current_user.uuid)
            .fetch_optional(db),
    )
    .await?;

    box_profile.ok_or_else(|| {
        tracing::warn!("Box profile {} not found or not owned", box_profile_uuid);
        AppError::NotFound(format!("Box profile '{}' not found", box_profile_uuid))
    })
}

/// Deduplicates uuids while keeping their first-seen order.
pub fn unique_uuids(uuids: &[Uuid]) -> Vec<Uuid> {
    let mut seen = std::collections::HashSet::new();
    uuids.iter().copied().filter(|u| seen.insert(*u)).collect()
}
