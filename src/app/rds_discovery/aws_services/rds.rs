use super::super::credentials::AccountCredentials;
use super::super::region_lister::{InstancePage, InstanceSource, InstanceSourceFactory};
use super::super::sdk_errors::ScanFailure;
use async_trait::async_trait;
use aws_sdk_rds as rds;
use aws_smithy_types::date_time::Format;
use aws_types::region::Region;
use serde_json::{Map, Value};

const PAGE_SIZE: i32 = 100;

/// Builds one RDS client per region task from a shared base config
#[derive(Debug, Clone)]
pub struct RdsSourceFactory {
    base_config: aws_config::SdkConfig,
}

impl RdsSourceFactory {
    pub fn new(base_config: aws_config::SdkConfig) -> Self {
        Self { base_config }
    }
}

impl InstanceSourceFactory for RdsSourceFactory {
    fn source_for(&self, credentials: &AccountCredentials, region: &str) -> Box<dyn InstanceSource> {
        let config = rds::config::Builder::from(&self.base_config)
            .region(Region::new(region.to_string()))
            .credentials_provider(credentials.to_aws_credentials())
            .build();

        Box::new(RdsInstanceSource {
            client: rds::Client::from_conf(config),
        })
    }
}

/// `DescribeDBInstances` pager for one account and region
#[derive(Debug, Clone)]
pub struct RdsInstanceSource {
    client: rds::Client,
}

impl RdsInstanceSource {
    pub fn new(client: rds::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl InstanceSource for RdsInstanceSource {
    async fn list_page(&self, marker: Option<String>) -> Result<InstancePage, ScanFailure> {
        let output = self
            .client
            .describe_db_instances()
            .set_marker(marker)
            .max_records(PAGE_SIZE)
            .send()
            .await
            .map_err(ScanFailure::from_sdk)?;

        let records = output
            .db_instances
            .unwrap_or_default()
            .iter()
            .map(db_instance_to_json)
            .collect();

        Ok(InstancePage {
            records,
            marker: output.marker,
        })
    }
}

fn insert_string(map: &mut Map<String, Value>, key: &str, value: Option<&String>) {
    if let Some(value) = value {
        map.insert(key.to_string(), Value::String(value.clone()));
    }
}

fn insert_bool(map: &mut Map<String, Value>, key: &str, value: Option<bool>) {
    if let Some(value) = value {
        map.insert(key.to_string(), Value::Bool(value));
    }
}

/// Convert DB instance to the raw record layout of the RDS API
pub fn db_instance_to_json(instance: &rds::types::DbInstance) -> Value {
    let mut instance_map = Map::new();

    insert_string(
        &mut instance_map,
        "DBInstanceIdentifier",
        instance.db_instance_identifier.as_ref(),
    );
    insert_string(&mut instance_map, "DBInstanceArn", instance.db_instance_arn.as_ref());
    insert_string(&mut instance_map, "DbiResourceId", instance.dbi_resource_id.as_ref());
    insert_string(&mut instance_map, "DBInstanceClass", instance.db_instance_class.as_ref());
    insert_string(&mut instance_map, "Engine", instance.engine.as_ref());
    insert_string(&mut instance_map, "EngineVersion", instance.engine_version.as_ref());
    insert_string(&mut instance_map, "DBInstanceStatus", instance.db_instance_status.as_ref());
    insert_string(&mut instance_map, "StorageType", instance.storage_type.as_ref());
    insert_string(&mut instance_map, "AvailabilityZone", instance.availability_zone.as_ref());

    if let Some(allocated_storage) = instance.allocated_storage {
        instance_map.insert(
            "AllocatedStorage".to_string(),
            Value::Number(allocated_storage.into()),
        );
    }

    insert_bool(&mut instance_map, "MultiAZ", instance.multi_az);
    insert_bool(&mut instance_map, "PubliclyAccessible", instance.publicly_accessible);
    insert_bool(&mut instance_map, "StorageEncrypted", instance.storage_encrypted);

    if let Some(creation_time) = instance.instance_create_time {
        if let Ok(formatted) = creation_time.fmt(Format::DateTime) {
            instance_map.insert("InstanceCreateTime".to_string(), Value::String(formatted));
        }
    }

    if let Some(endpoint) = &instance.endpoint {
        let mut endpoint_map = Map::new();
        insert_string(&mut endpoint_map, "Address", endpoint.address.as_ref());
        if let Some(port) = endpoint.port {
            endpoint_map.insert("Port".to_string(), Value::Number(port.into()));
        }
        instance_map.insert("Endpoint".to_string(), Value::Object(endpoint_map));
    }

    if let Some(vpc_id) = instance
        .db_subnet_group
        .as_ref()
        .and_then(|group| group.vpc_id.as_ref())
    {
        let mut group_map = Map::new();
        group_map.insert("VpcId".to_string(), Value::String(vpc_id.clone()));
        instance_map.insert("DBSubnetGroup".to_string(), Value::Object(group_map));
    }

    if let Some(tags) = &instance.tag_list {
        let tags_json: Vec<Value> = tags
            .iter()
            .map(|tag| {
                let mut tag_json = Map::new();
                insert_string(&mut tag_json, "Key", tag.key.as_ref());
                insert_string(&mut tag_json, "Value", tag.value.as_ref());
                Value::Object(tag_json)
            })
            .collect();
        instance_map.insert("TagList".to_string(), Value::Array(tags_json));
    }

    Value::Object(instance_map)
}
