//! Thin wrappers over the S3 and SNS SDK clients. Every method is a single
//! SDK call; failures surface as [`AppError::ExternalService`].

mod s3;
mod sns;

pub use s3::*;
pub use sns::*;

use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Region;

use crate::errors::AppError;

#[derive(Clone)]
pub struct AwsServices {
    pub s3: S3Service,
    pub sns: SnsService,
}

impl AwsServices {
    #[tracing::instrument(name = "Load AWS configuration")]
    pub async fn from_region(region: &str) -> Self {
        let config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(region.to_string()))
            .load()
            .await;

        tracing::info!("AWS clients configured for region {}", region);
        Self {
            s3: S3Service::new(aws_sdk_s3::Client::new(&config), region.to_string()),
            sns: SnsService::new(aws_sdk_sns::Client::new(&config)),
        }
    }
}

fn sdk_error<E>(operation: &str, err: E) -> AppError
where
    E: std::error::Error,
{
    tracing::error!("AWS {} failed: {}", operation, aws_sdk_s3::error::DisplayErrorContext(&err));
    AppError::ExternalService(anyhow::anyhow!(
        "AWS {} failed: {}",
        operation,
        aws_sdk_s3::error::DisplayErrorContext(&err)
    ))
}
