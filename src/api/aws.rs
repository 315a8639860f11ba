use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::Deserialize;
use validator::Validate;

use crate::api::common::middleware::require_auth;
use crate::api::common::MessageResponse;
use crate::aws::{
    AwsServices, BucketSummary, ObjectSummary, PublishOutcome, PutObjectOutcome, SubscribeOutcome,
    TopicSummary,
};
use crate::errors::AppError;
use crate::InnerState;

#[derive(Debug, Deserialize, Validate)]
pub struct CreateBucketBody {
    #[validate(length(min = 3, max = 63, message = "bucket name must be 3 to 63 characters"))]
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct ListObjectsQuery {
    pub prefix: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateTopicBody {
    #[validate(length(min = 1, max = 256, message = "topic name should not be empty"))]
    pub name: String,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct PublishBody {
    #[validate(length(min = 1, message = "topicArn should not be empty"))]
    pub topic_arn: String,
    #[validate(length(min = 1, message = "message should not be empty"))]
    pub message: String,
    pub subject: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeBody {
    #[validate(length(min = 1, message = "topicArn should not be empty"))]
    pub topic_arn: String,
    #[validate(length(min = 1, message = "protocol should not be empty"))]
    pub protocol: String,
    #[validate(length(min = 1, message = "endpoint should not be empty"))]
    pub endpoint: String,
}

/// `/aws` routes. They carry their own state, so the auth guard is attached
/// here with the application state before the AWS clients are plugged in.
pub fn routes(state: InnerState, aws: AwsServices) -> Router<InnerState> {
    Router::new()
        .route("/s3/buckets", get(list_buckets).post(create_bucket))
        .route("/s3/buckets/{bucket}", delete(delete_bucket))
        .route("/s3/buckets/{bucket}/objects", get(list_objects))
        .route(
            "/s3/buckets/{bucket}/objects/{*key}",
            get(get_object).put(put_object).delete(delete_object),
        )
        .route("/sns/topics", get(list_topics).post(create_topic))
        .route("/sns/topics/{arn}", delete(delete_topic))
        .route("/sns/publish", post(publish))
        .route("/sns/subscribe", post(subscribe))
        .route_layer(middleware::from_fn_with_state(state, require_auth))
        .with_state(aws)
}

#[tracing::instrument(name = "List buckets", skip(aws))]
pub async fn list_buckets(
    State(aws): State<AwsServices>,
) -> Result<Json<Vec<BucketSummary>>, AppError> {
    Ok(Json(aws.s3.list_buckets().await?))
}

#[tracing::instrument(name = "Create bucket", skip(aws))]
pub async fn create_bucket(
    State(aws): State<AwsServices>,
    Json(body): Json<CreateBucketBody>,
) -> Result<(StatusCode, Json<MessageResponse>), AppError> {
    body.validate()?;
    aws.s3.create_bucket(&body.name).await?;
    Ok((
        StatusCode::CREATED,
        Json(MessageResponse::ok(format!("Bucket '{}' created", body.name))),
    ))
}

#[tracing::instrument(name = "Delete bucket", skip(aws))]
pub async fn delete_bucket(
    State(aws): State<AwsServices>,
    Path(bucket): Path<String>,
) -> Result<Json<MessageResponse>, AppError> {
    aws.s3.delete_bucket(&bucket).await?;
    Ok(Json(MessageResponse::ok(format!("Bucket '{}' deleted", bucket))))
}

#[tracing::instrument(name = "List objects", skip(aws))]
pub async fn list_objects(
    State(aws): State<AwsServices>,
    Path(bucket): Path<String>,
    Query(query): Query<ListObjectsQuery>,
) -> Result<Json<Vec<ObjectSummary>>, AppError> {
    Ok(Json(aws.s3.list_objects(&bucket, query.prefix).await?))
}

#[tracing::instrument(name = "Put object", skip(aws, headers, body))]
pub async fn put_object(
    State(aws): State<AwsServices>,
    Path((bucket, key)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<PutObjectOutcome>), AppError> {
    if body.is_empty() {
        return Err(AppError::Validation("Object body must not be empty".to_string()));
    }
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let outcome = aws.s3.put_object(&bucket, &key, body, content_type).await?;
    Ok((StatusCode::CREATED, Json(outcome)))
}

#[tracing::instrument(name = "Get object", skip(aws))]
pub async fn get_object(
    State(aws): State<AwsServices>,
    Path((bucket, key)): Path<(String, String)>,
) -> Result<Response, AppError> {
    let object = aws.s3.get_object(&bucket, &key).await?;
    let content_type = object
        .content_type
        .unwrap_or_else(|| "application/octet-stream".to_string());
    Ok(([(header::CONTENT_TYPE, content_type)], object.body).into_response())
}

#[tracing::instrument(name = "Delete object", skip(aws))]
pub async fn delete_object(
    State(aws): State<AwsServices>,
    Path((bucket, key)): Path<(String, String)>,
) -> Result<Json<MessageResponse>, AppError> {
    aws.s3.delete_object(&bucket, &key).await?;
    Ok(Json(MessageResponse::ok(format!("Object '{}' deleted", key))))
}

#[tracing::instrument(name = "List topics", skip(aws))]
pub async fn list_topics(
    State(aws): State<AwsServices>,
) -> Result<Json<Vec<TopicSummary>>, AppError> {
    Ok(Json(aws.sns.list_topics().await?))
}

#[tracing::instrument(name = "Create topic", skip(aws))]
pub async fn create_topic(
    State(aws): State<AwsServices>,
    Json(body): Json<CreateTopicBody>,
) -> Result<(StatusCode, Json<TopicSummary>), AppError> {
    body.validate()?;
    Ok((StatusCode::CREATED, Json(aws.sns.create_topic(&body.name).await?)))
}

#[tracing::instrument(name = "Delete topic", skip(aws))]
pub async fn delete_topic(
    State(aws): State<AwsServices>,
    Path(arn): Path<String>,
) -> Result<Json<MessageResponse>, AppError> {
    aws.sns.delete_topic(&arn).await?;
    Ok(Json(MessageResponse::ok(format!("Topic '{}' deleted", arn))))
}

#[tracing::instrument(name = "Publish message", skip(aws, body), fields(topic_arn = %body.topic_arn))]
pub async fn publish(
    State(aws): State<AwsServices>,
    Json(body): Json<PublishBody>,
) -> Result<Json<PublishOutcome>, AppError> {
    body.validate()?;
    Ok(Json(
        aws.sns
            .publish(&body.topic_arn, &body.message, body.subject)
            .await?,
    ))
}

#[tracing::instrument(name = "Subscribe endpoint", skip(aws, body), fields(topic_arn = %body.topic_arn))]
pub async fn subscribe(
    State(aws): State<AwsServices>,
    Json(body): Json<SubscribeBody>,
) -> Result<Json<SubscribeOutcome>, AppError> {
    body.validate()?;
    Ok(Json(
        aws.sns
            .subscribe(&body.topic_arn, &body.protocol, &body.endpoint)
            .await?,
    ))
}
