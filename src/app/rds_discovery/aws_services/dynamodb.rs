use super::super::sinks::PersistenceSink;
use super::super::state::DiscoveredInstance;
use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_sdk_dynamodb as dynamodb;
use dynamodb::types::AttributeValue;
use std::collections::HashMap;

/// Upserts instances into a DynamoDB table keyed by `instance_id`
#[derive(Debug, Clone)]
pub struct DynamoDbPersistence {
    client: dynamodb::Client,
    table_name: String,
}

impl DynamoDbPersistence {
    pub fn new(base_config: &aws_config::SdkConfig, table_name: impl Into<String>) -> Self {
        Self {
            client: dynamodb::Client::new(base_config),
            table_name: table_name.into(),
        }
    }
}

fn string_attr(item: &mut HashMap<String, AttributeValue>, key: &str, value: Option<&str>) {
    if let Some(value) = value.filter(|v| !v.is_empty()) {
        item.insert(key.to_string(), AttributeValue::S(value.to_string()));
    }
}

/// Flatten one instance into a DynamoDB item
pub fn instance_item(instance: &DiscoveredInstance) -> Result<HashMap<String, AttributeValue>> {
    let mut item = HashMap::new();

    string_attr(&mut item, "instance_id", Some(&instance.instance_id));
    string_attr(&mut item, "account_id", Some(&instance.account_id));
    string_attr(&mut item, "region", Some(&instance.region));
    string_attr(&mut item, "engine", Some(&instance.engine));
    string_attr(&mut item, "status", Some(&instance.status));
    string_attr(&mut item, "instance_class", Some(&instance.instance_class));
    string_attr(&mut item, "arn", instance.arn.as_deref());
    string_attr(&mut item, "vpc_id", instance.vpc_id.as_deref());
    item.insert(
        "storage_encrypted".to_string(),
        AttributeValue::Bool(instance.storage_encrypted),
    );
    item.insert(
        "publicly_accessible".to_string(),
        AttributeValue::Bool(instance.publicly_accessible),
    );

    // Full record for readers that want every field
    let document = serde_json::to_string(instance).context("Failed to serialize instance")?;
    item.insert("document".to_string(), AttributeValue::S(document));

    Ok(item)
}

#[async_trait]
impl PersistenceSink for DynamoDbPersistence {
    async fn upsert(&self, instance: &DiscoveredInstance) -> Result<()> {
        let item = instance_item(instance)?;
        self.client
            .put_item()
            .table_name(&self.table_name)
            .set_item(Some(item))
            .send()
            .await
            .with_context(|| {
                format!(
                    "Failed to put {} into table {}",
                    instance.instance_id, self.table_name
                )
            })?;
        Ok(())
    }
}
