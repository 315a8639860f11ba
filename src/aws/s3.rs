use aws_sdk_s3::primitives::{ByteStream, DateTimeFormat};
use aws_sdk_s3::types::{BucketLocationConstraint, CreateBucketConfiguration};
use aws_sdk_s3::Client;
use bytes::Bytes;
use serde::Serialize;

use super::sdk_error;
use crate::errors::AppError;

// Buckets in this region are created without a location constraint.
const DEFAULT_REGION: &str = "us-east-1";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketSummary {
    pub name: String,
    pub creation_date: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectSummary {
    pub key: String,
    pub size: Option<i64>,
    pub last_modified: Option<String>,
    pub e_tag: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PutObjectOutcome {
    pub bucket: String,
    pub key: String,
    pub e_tag: Option<String>,
}

pub struct StoredObject {
    pub body: Bytes,
    pub content_type: Option<String>,
}

#[derive(Clone)]
pub struct S3Service {
    client: Client,
    region: String,
}

impl S3Service {
    pub fn new(client: Client, region: String) -> Self {
        Self { client, region }
    }

    #[tracing::instrument(name = "S3 list buckets", skip(self))]
    pub async fn list_buckets(&self) -> Result<Vec<BucketSummary>, AppError> {
        let resp = self
            .client
            .list_buckets()
            .send()
            .await
            .map_err(|e| sdk_error("ListBuckets", e))?;

        Ok(resp
            .buckets()
            .iter()
            .map(|b| BucketSummary {
                name: b.name().unwrap_or_default().to_string(),
                creation_date: b
                    .creation_date()
                    .and_then(|d| d.fmt(DateTimeFormat::DateTime).ok()),
            })
            .collect())
    }

    #[tracing::instrument(name = "S3 create bucket", skip(self))]
    pub async fn create_bucket(&self, bucket: &str) -> Result<(), AppError> {
        let mut request = self.client.create_bucket().bucket(bucket);
        if let Some(constraint) = location_constraint(&self.region) {
            request = request.create_bucket_configuration(
                CreateBucketConfiguration::builder()
                    .location_constraint(BucketLocationConstraint::from(constraint))
                    .build(),
            );
        }

        request
            .send()
            .await
            .map_err(|e| sdk_error("CreateBucket", e))?;
        tracing::info!("Created bucket {}", bucket);
        Ok(())
    }

    #[tracing::instrument(name = "S3 delete bucket", skip(self))]
    pub async fn delete_bucket(&self, bucket: &str) -> Result<(), AppError> {
        self.client
            .delete_bucket()
            .bucket(bucket)
            .send()
            .await
            .map_err(|e| sdk_error("DeleteBucket", e))?;
        tracing::info!("Deleted bucket {}", bucket);
        Ok(())
    }

    #[tracing::instrument(name = "S3 list objects", skip(self))]
    pub async fn list_objects(
        &self,
        bucket: &str,
        prefix: Option<String>,
    ) -> Result<Vec<ObjectSummary>, AppError> {
        let resp = self
            .client
            .list_objects_v2()
            .bucket(bucket)
            .set_prefix(prefix)
            .send()
            .await
            .map_err(|e| sdk_error("ListObjectsV2", e))?;

        Ok(resp
            .contents()
            .iter()
            .map(|o| ObjectSummary {
                key: o.key().unwrap_or_default().to_string(),
                size: o.size(),
                last_modified: o
                    .last_modified()
                    .and_then(|d| d.fmt(DateTimeFormat::DateTime).ok()),
                e_tag: o.e_tag().map(str::to_string),
            })
            .collect())
    }

    #[tracing::instrument(name = "S3 put object", skip(self, body), fields(size = body.len()))]
    pub async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        content_type: Option<String>,
    ) -> Result<PutObjectOutcome, AppError> {
        let resp = self
            .client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(body))
            .set_content_type(content_type)
            .send()
            .await
            .map_err(|e| sdk_error("PutObject", e))?;

        tracing::info!("Stored object {}/{}", bucket, key);
        Ok(PutObjectOutcome {
            bucket: bucket.to_string(),
            key: key.to_string(),
            e_tag: resp.e_tag().map(str::to_string),
        })
    }

    #[tracing::instrument(name = "S3 get object", skip(self))]
    pub async fn get_object(&self, bucket: &str, key: &str) -> Result<StoredObject, AppError> {
        let resp = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error().is_some_and(|se| se.is_no_such_key()) {
                    AppError::NotFound(format!("Object '{}' not found in '{}'", key, bucket))
                } else {
                    sdk_error("GetObject", e)
                }
            })?;

        let content_type = resp.content_type().map(str::to_string);
        let body = resp
            .body
            .collect()
            .await
            .map_err(|e| sdk_error("GetObject body", e))?
            .into_bytes();

        Ok(StoredObject { body, content_type })
    }

    #[tracing::instrument(name = "S3 delete object", skip(self))]
    pub async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), AppError> {
        self.client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| sdk_error("DeleteObject", e))?;
        tracing::info!("Deleted object {}/{}", bucket, key);
        Ok(())
    }
}

fn location_constraint(region: &str) -> Option<&str> {
    (region != DEFAULT_REGION).then_some(region)
}
