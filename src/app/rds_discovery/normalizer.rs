//! Metadata extraction for raw `DescribeDBInstances` records.
//!
//! Each field comes from its own small extractor that returns a default when the
//! field is missing or has an unexpected shape, so one odd attribute never costs
//! the rest of the record. Records are plain JSON in the RDS API key layout
//! (`DBInstanceIdentifier`, `Endpoint.Address`, `TagList`, ...).

use super::state::{DiscoveredInstance, InstanceEndpoint, InstanceTags};
use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;
use tracing::debug;

#[derive(Debug, Default, Clone, Copy)]
pub struct MetadataExtractor;

impl MetadataExtractor {
    pub fn new() -> Self {
        Self
    }

    /// Build an instance from one raw record.
    ///
    /// Returns `None` only when no instance identifier can be salvaged at all.
    pub fn extract(
        &self,
        raw: &Value,
        account_id: &str,
        region: &str,
    ) -> Option<DiscoveredInstance> {
        let instance_id = salvage_instance_id(raw)?;
        let mut instance = DiscoveredInstance::bare(&instance_id, account_id, region);

        if !raw.is_object() {
            debug!(
                "Record for {} in {}/{} is not an object, keeping identifier only",
                instance_id, account_id, region
            );
            return Some(instance);
        }

        instance.arn = extract_string(raw, "DBInstanceArn");
        instance.engine = extract_string(raw, "Engine").unwrap_or_default();
        instance.engine_version = extract_string(raw, "EngineVersion").unwrap_or_default();
        instance.instance_class = extract_string(raw, "DBInstanceClass").unwrap_or_default();
        instance.status = extract_string(raw, "DBInstanceStatus")
            .or_else(|| extract_string(raw, "Status"))
            .unwrap_or_default();
        instance.availability_zone = extract_string(raw, "AvailabilityZone");

        let storage = extract_storage(raw);
        instance.storage_type = storage.storage_type;
        instance.allocated_storage = storage.allocated_storage;
        instance.storage_encrypted = storage.encrypted;

        instance.multi_az = extract_bool(raw, "MultiAZ");
        instance.publicly_accessible = extract_bool(raw, "PubliclyAccessible");
        instance.endpoint = extract_endpoint(raw);
        instance.vpc_id = extract_vpc_id(raw);
        instance.tags = extract_tags(raw);
        instance.created_at = extract_created_at(raw);

        Some(instance)
    }
}

/// Identifier fallbacks: identifier, resource id, last ARN segment
fn salvage_instance_id(raw: &Value) -> Option<String> {
    if let Some(id) = raw.as_str() {
        let id = id.trim();
        return (!id.is_empty()).then(|| id.to_string());
    }

    extract_string(raw, "DBInstanceIdentifier")
        .or_else(|| extract_string(raw, "DbiResourceId"))
        .or_else(|| {
            extract_string(raw, "DBInstanceArn")
                .and_then(|arn| arn.rsplit(':').next().map(str::to_string))
                .filter(|id| !id.is_empty())
        })
}

fn extract_string(raw: &Value, key: &str) -> Option<String> {
    match raw.get(key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn extract_bool(raw: &Value, key: &str) -> bool {
    match raw.get(key) {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
        _ => false,
    }
}

fn extract_i32(value: &Value) -> Option<i32> {
    match value {
        Value::Number(n) => n.as_i64().and_then(|v| i32::try_from(v).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

struct StorageAttributes {
    storage_type: String,
    allocated_storage: i32,
    encrypted: bool,
}

fn extract_storage(raw: &Value) -> StorageAttributes {
    StorageAttributes {
        storage_type: extract_string(raw, "StorageType").unwrap_or_default(),
        allocated_storage: raw
            .get("AllocatedStorage")
            .and_then(extract_i32)
            .filter(|gib| *gib >= 0)
            .unwrap_or(0),
        encrypted: extract_bool(raw, "StorageEncrypted"),
    }
}

fn extract_endpoint(raw: &Value) -> Option<InstanceEndpoint> {
    let endpoint = raw.get("Endpoint")?;
    let address = match endpoint {
        Value::String(s) => s.trim().to_string(),
        _ => extract_string(endpoint, "Address")?,
    };
    if address.is_empty() {
        return None;
    }

    Some(InstanceEndpoint {
        address,
        port: endpoint
            .get("Port")
            .and_then(extract_i32)
            .or_else(|| raw.get("DbInstancePort").and_then(extract_i32))
            .filter(|port| *port > 0),
    })
}

fn extract_vpc_id(raw: &Value) -> Option<String> {
    raw.get("DBSubnetGroup")
        .and_then(|group| extract_string(group, "VpcId"))
        .or_else(|| extract_string(raw, "VpcId"))
}

/// Tags arrive as `TagList`/`Tags` arrays of Key/Value pairs or as a plain object
fn extract_tags(raw: &Value) -> InstanceTags {
    let mut tags = InstanceTags::default();

    let Some(source) = raw.get("TagList").or_else(|| raw.get("Tags")) else {
        return tags;
    };

    match source {
        Value::Array(entries) => {
            for tag in entries {
                let key = tag.get("Key").and_then(|k| k.as_str());
                let value = tag.get("Value").and_then(|v| v.as_str()).unwrap_or("");
                match key {
                    Some(key) if !key.is_empty() => tags.insert(key, value),
                    _ => debug!("Skipping tag without key: {}", tag),
                }
            }
        }
        Value::Object(map) => {
            for (key, value) in map {
                if let Some(value) = value.as_str() {
                    tags.insert(key, value);
                }
            }
        }
        _ => {}
    }

    tags
}

fn extract_created_at(raw: &Value) -> Option<DateTime<Utc>> {
    match raw.get("InstanceCreateTime")? {
        Value::String(s) => DateTime::parse_from_rfc3339(s.trim())
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        Value::Number(n) => {
            let secs = n.as_f64()?;
            Utc.timestamp_opt(secs.trunc() as i64, 0).single()
        }
        _ => None,
    }
}
