use super::super::sinks::MetricsSink;
use super::super::state::RunMetrics;
use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_sdk_cloudwatch as cloudwatch;
use cloudwatch::types::{MetricDatum, StandardUnit};

/// Publishes run counters with `PutMetricData`
#[derive(Debug, Clone)]
pub struct CloudWatchMetrics {
    client: cloudwatch::Client,
    namespace: String,
}

impl CloudWatchMetrics {
    pub fn new(base_config: &aws_config::SdkConfig, namespace: impl Into<String>) -> Self {
        Self {
            client: cloudwatch::Client::new(base_config),
            namespace: namespace.into(),
        }
    }
}

/// Metric name and value pairs published for every run
pub fn metric_values(metrics: &RunMetrics) -> [(&'static str, f64); 4] {
    [
        ("InstancesDiscovered", metrics.instances_discovered as f64),
        ("AccountsScanned", metrics.accounts_scanned as f64),
        ("AccountsFailed", metrics.accounts_failed as f64),
        ("ErrorCount", metrics.error_count as f64),
    ]
}

#[async_trait]
impl MetricsSink for CloudWatchMetrics {
    async fn publish(&self, metrics: &RunMetrics) -> Result<()> {
        let data: Vec<MetricDatum> = metric_values(metrics)
            .into_iter()
            .map(|(name, value)| {
                MetricDatum::builder()
                    .metric_name(name)
                    .value(value)
                    .unit(StandardUnit::Count)
                    .build()
            })
            .collect();

        self.client
            .put_metric_data()
            .namespace(&self.namespace)
            .set_metric_data(Some(data))
            .send()
            .await
            .with_context(|| format!("Failed to publish metrics to {}", self.namespace))?;
        Ok(())
    }
}
