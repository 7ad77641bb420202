use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single RDS DB instance as seen by one discovery run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveredInstance {
    pub instance_id: String,
    pub account_id: String,
    pub region: String,
    pub arn: Option<String>,
    pub engine: String,
    pub engine_version: String,
    pub instance_class: String,
    pub status: String,
    pub storage_type: String,
    pub allocated_storage: i32, // GiB
    pub storage_encrypted: bool,
    pub multi_az: bool,
    pub publicly_accessible: bool,
    pub availability_zone: Option<String>,
    pub endpoint: Option<InstanceEndpoint>,
    pub vpc_id: Option<String>,
    pub tags: InstanceTags,
    pub created_at: Option<DateTime<Utc>>,
}

impl DiscoveredInstance {
    /// Minimal record carrying only the identity of the instance
    pub fn bare(instance_id: &str, account_id: &str, region: &str) -> Self {
        Self {
            instance_id: instance_id.to_string(),
            account_id: account_id.to_string(),
            region: region.to_string(),
            arn: None,
            engine: String::new(),
            engine_version: String::new(),
            instance_class: String::new(),
            status: String::new(),
            storage_type: String::new(),
            allocated_storage: 0,
            storage_encrypted: false,
            multi_az: false,
            publicly_accessible: false,
            availability_zone: None,
            endpoint: None,
            vpc_id: None,
            tags: InstanceTags::default(),
            created_at: None,
        }
    }

    /// Key used to compare instance sets across runs
    pub fn identity_key(&self) -> (String, String, String) {
        (
            self.account_id.clone(),
            self.region.clone(),
            self.instance_id.clone(),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceEndpoint {
    pub address: String,
    pub port: Option<i32>,
}

impl std::fmt::Display for InstanceEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.port {
            Some(port) => write!(f, "{}:{}", self.address, port),
            None => write!(f, "{}", self.address),
        }
    }
}

/// Instance tags: the keys the inventory reports on are typed, everything else
/// lands in `additional`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceTags {
    pub name: Option<String>,
    pub environment: Option<String>,
    pub owner: Option<String>,
    pub application: Option<String>,
    pub cost_center: Option<String>,
    pub additional: BTreeMap<String, String>,
}

impl InstanceTags {
    pub fn insert(&mut self, key: &str, value: &str) {
        let value = value.to_string();
        match key {
            "Name" => self.name = Some(value),
            "Environment" => self.environment = Some(value),
            "Owner" => self.owner = Some(value),
            "Application" => self.application = Some(value),
            "CostCenter" => self.cost_center = Some(value),
            _ => {
                self.additional.insert(key.to_string(), value);
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        match key {
            "Name" => self.name.as_deref(),
            "Environment" => self.environment.as_deref(),
            "Owner" => self.owner.as_deref(),
            "Application" => self.application.as_deref(),
            "CostCenter" => self.cost_center.as_deref(),
            _ => self.additional.get(key).map(String::as_str),
        }
    }

    pub fn len(&self) -> usize {
        [
            &self.name,
            &self.environment,
            &self.owner,
            &self.application,
            &self.cost_center,
        ]
        .iter()
        .filter(|v| v.is_some())
        .count()
            + self.additional.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    CrossAccountAccess,
    RegionNotEnabled,
    InvalidCredentials,
    RateLimited,
    Timeout,
    NetworkError,
    MalformedRecord,
    PersistenceFailure,
    NotificationFailure,
    CatastrophicIdentityFailure,
    Unclassified,
}

impl ErrorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorType::CrossAccountAccess => "cross_account_access",
            ErrorType::RegionNotEnabled => "region_not_enabled",
            ErrorType::InvalidCredentials => "invalid_credentials",
            ErrorType::RateLimited => "rate_limited",
            ErrorType::Timeout => "timeout",
            ErrorType::NetworkError => "network_error",
            ErrorType::MalformedRecord => "malformed_record",
            ErrorType::PersistenceFailure => "persistence_failure",
            ErrorType::NotificationFailure => "notification_failure",
            ErrorType::CatastrophicIdentityFailure => "catastrophic_identity_failure",
            ErrorType::Unclassified => "unclassified",
        }
    }
}

impl std::fmt::Display for ErrorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// Classified failure attached to a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryError {
    pub account_id: String,
    /// Absent for account-level errors
    pub region: Option<String>,
    #[serde(rename = "type")]
    pub error_type: ErrorType,
    pub severity: Severity,
    pub message: String,
    pub remediation: String,
    pub timestamp: DateTime<Utc>,
}

impl DiscoveryError {
    pub fn is_account_level(&self) -> bool {
        self.region.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    Success,
    PartialSuccess,
    Degraded,
    Failed,
}

impl ExecutionStatus {
    /// Terminal state of a run that got past identity resolution.
    ///
    /// `Failed` is never produced here; only the run coordinator assigns it.
    pub fn derive(accounts_attempted: usize, accounts_scanned: usize, error_count: usize) -> Self {
        if error_count == 0 {
            ExecutionStatus::Success
        } else if accounts_scanned == 0 && accounts_attempted > 0 {
            ExecutionStatus::Degraded
        } else {
            ExecutionStatus::PartialSuccess
        }
    }

    /// DEGRADED and FAILED runs page a human
    pub fn needs_attention(&self) -> bool {
        matches!(self, ExecutionStatus::Degraded | ExecutionStatus::Failed)
    }
}

/// Output envelope of one discovery run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryRun {
    pub run_id: String,
    #[serde(rename = "timestamp")]
    pub run_timestamp: DateTime<Utc>,
    pub caller_identity: Option<String>,
    pub total_instances: usize,
    pub accounts_attempted: usize,
    pub accounts_scanned: usize,
    pub regions_scanned: usize,
    /// Regions whose listing stopped at the page cap or on a repeated marker
    #[serde(default)]
    pub regions_truncated: usize,
    pub records_skipped: usize,
    pub instances: Vec<DiscoveredInstance>,
    pub errors: Vec<DiscoveryError>,
    pub execution_status: ExecutionStatus,
    pub success_rate: f64,
    pub duration_ms: u64,
}

impl DiscoveryRun {
    /// HTTP-equivalent status for callers that front the engine with an API
    pub fn http_status(&self) -> u16 {
        if self.execution_status == ExecutionStatus::Failed {
            500
        } else {
            200
        }
    }

    pub fn accounts_failed(&self) -> usize {
        self.accounts_attempted.saturating_sub(self.accounts_scanned)
    }

    pub fn errors_of_type(&self, error_type: ErrorType) -> impl Iterator<Item = &DiscoveryError> {
        self.errors.iter().filter(move |e| e.error_type == error_type)
    }
}

pub fn success_rate(accounts_scanned: usize, accounts_attempted: usize) -> f64 {
    if accounts_attempted == 0 {
        1.0
    } else {
        accounts_scanned as f64 / accounts_attempted as f64
    }
}

/// Counters handed to the metrics sink
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RunMetrics {
    pub instances_discovered: usize,
    pub accounts_scanned: usize,
    pub accounts_failed: usize,
    pub error_count: usize,
}

impl From<&DiscoveryRun> for RunMetrics {
    fn from(run: &DiscoveryRun) -> Self {
        Self {
            instances_discovered: run.total_instances,
            accounts_scanned: run.accounts_scanned,
            accounts_failed: run.accounts_failed(),
            error_count: run.errors.len(),
        }
    }
}
