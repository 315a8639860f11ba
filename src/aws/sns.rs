use aws_sdk_sns::Client;
use serde::Serialize;

use super::sdk_error;
use crate::errors::AppError;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicSummary {
    pub topic_arn: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishOutcome {
    pub message_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeOutcome {
    pub subscription_arn: Option<String>,
}

#[derive(Clone)]
pub struct SnsService {
    client: Client,
}

impl SnsService {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    #[tracing::instrument(name = "SNS list topics", skip(self))]
    pub async fn list_topics(&self) -> Result<Vec<TopicSummary>, AppError> {
        let resp = self
            .client
            .list_topics()
            .send()
            .await
            .map_err(|e| sdk_error("ListTopics", e))?;

        Ok(resp
            .topics()
            .iter()
            .filter_map(|t| t.topic_arn())
            .map(|arn| TopicSummary {
                topic_arn: arn.to_string(),
            })
            .collect())
    }

    #[tracing::instrument(name = "SNS create topic", skip(self))]
    pub async fn create_topic(&self, name: &str) -> Result<TopicSummary, AppError> {
        let resp = self
            .client
            .create_topic()
            .name(name)
            .send()
            .await
            .map_err(|e| sdk_error("CreateTopic", e))?;

        let topic_arn = resp.topic_arn().unwrap_or_default().to_string();
        tracing::info!("Created topic {}", topic_arn);
        Ok(TopicSummary { topic_arn })
    }

    #[tracing::instrument(name = "SNS delete topic", skip(self))]
    pub async fn delete_topic(&self, topic_arn: &str) -> Result<(), AppError> {
        self.client
            .delete_topic()
            .topic_arn(topic_arn)
            .send()
            .await
            .map_err(|e| sdk_error("DeleteTopic", e))?;
        tracing::info!("Deleted topic {}", topic_arn);
        Ok(())
    }

    #[tracing::instrument(name = "SNS publish", skip(self, message))]
    pub async fn publish(
        &self,
        topic_arn: &str,
        message: &str,
        subject: Option<String>,
    ) -> Result<PublishOutcome, AppError> {
        let resp = self
            .client
            .publish()
            .topic_arn(topic_arn)
            .message(message)
            .set_subject(subject)
            .send()
            .await
            .map_err(|e| sdk_error("Publish", e))?;

        Ok(PublishOutcome {
            message_id: resp.message_id().map(str::to_string),
        })
    }

    #[tracing::instrument(name = "SNS subscribe", skip(self, endpoint))]
    pub async fn subscribe(
        &self,
        topic_arn: &str,
        protocol: &str,
        endpoint: &str,
    ) -> Result<SubscribeOutcome, AppError> {
        let resp = self
            .client
            .subscribe()
            .topic_arn(topic_arn)
            .protocol(protocol)
            .endpoint(endpoint)
            .send()
            .await
            .map_err(|e| sdk_error("Subscribe", e))?;

        Ok(SubscribeOutcome {
            subscription_arn: resp.subscription_arn().map(str::to_string),
        })
    }
}
