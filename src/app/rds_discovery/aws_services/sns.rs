use super::super::sinks::{notification_body, notification_subject, NotificationSink};
use super::super::state::DiscoveryRun;
use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_sdk_sns as sns;

// SNS rejects longer subjects
const MAX_SUBJECT_LEN: usize = 100;

/// Publishes run alerts to an SNS topic
#[derive(Debug, Clone)]
pub struct SnsNotifier {
    client: sns::Client,
    topic_arn: String,
}

impl SnsNotifier {
    pub fn new(base_config: &aws_config::SdkConfig, topic_arn: impl Into<String>) -> Self {
        Self {
            client: sns::Client::new(base_config),
            topic_arn: topic_arn.into(),
        }
    }
}

fn clamp_subject(subject: String) -> String {
    if subject.chars().count() <= MAX_SUBJECT_LEN {
        subject
    } else {
        subject.chars().take(MAX_SUBJECT_LEN).collect()
    }
}

#[async_trait]
impl NotificationSink for SnsNotifier {
    async fn notify(&self, run: &DiscoveryRun) -> Result<()> {
        self.client
            .publish()
            .topic_arn(&self.topic_arn)
            .subject(clamp_subject(notification_subject(run)))
            .message(notification_body(run))
            .send()
            .await
            .with_context(|| format!("Failed to publish to {}", self.topic_arn))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_subject() {
        assert_eq!(clamp_subject("short".to_string()), "short");
        assert_eq!(clamp_subject("x".repeat(150)).len(), MAX_SUBJECT_LEN);
    }
}
