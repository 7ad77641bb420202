//! Collaborators that receive the results of a run.
//!
//! The run coordinator treats every sink as best-effort: failures are logged and
//! never change the envelope handed back to the caller.

use super::state::{DiscoveredInstance, DiscoveryRun, ErrorType, RunMetrics};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{info, warn};

#[async_trait]
pub trait PersistenceSink: Send + Sync {
    /// Insert or replace the stored record for `instance.instance_id`
    async fn upsert(&self, instance: &DiscoveredInstance) -> Result<()>;
}

#[async_trait]
pub trait MetricsSink: Send + Sync {
    async fn publish(&self, metrics: &RunMetrics) -> Result<()>;
}

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, run: &DiscoveryRun) -> Result<()>;
}

/// Discards everything; used when no store is configured
#[derive(Debug, Default)]
pub struct NoopPersistence;

#[async_trait]
impl PersistenceSink for NoopPersistence {
    async fn upsert(&self, _instance: &DiscoveredInstance) -> Result<()> {
        Ok(())
    }
}

/// Keeps the latest record per instance id in memory
#[derive(Debug, Default)]
pub struct MemoryPersistence {
    records: Mutex<HashMap<String, DiscoveredInstance>>,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, instance_id: &str) -> Option<DiscoveredInstance> {
        self.records
            .lock()
            .ok()
            .and_then(|r| r.get(instance_id).cloned())
    }
}

#[async_trait]
impl PersistenceSink for MemoryPersistence {
    async fn upsert(&self, instance: &DiscoveredInstance) -> Result<()> {
        let mut records = self
            .records
            .lock()
            .map_err(|e| anyhow::anyhow!("Failed to acquire lock on memory store: {}", e))?;
        records.insert(instance.instance_id.clone(), instance.clone());
        Ok(())
    }
}

/// Appends one JSON document per instance to a file
#[derive(Debug)]
pub struct JsonLinesPersistence {
    path: PathBuf,
    file: Mutex<std::fs::File>,
}

impl JsonLinesPersistence {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {:?}", parent))?;
        }
        let file = std::fs::OpenOptions::new()
            .append(true)
            .create(true)
            .open(&path)
            .with_context(|| format!("Failed to open inventory file {:?}", path))?;

        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl PersistenceSink for JsonLinesPersistence {
    async fn upsert(&self, instance: &DiscoveredInstance) -> Result<()> {
        let mut line = serde_json::to_vec(instance).context("Failed to serialize instance")?;
        line.push(b'\n');

        let mut file = self
            .file
            .lock()
            .map_err(|e| anyhow::anyhow!("Failed to acquire lock on inventory file: {}", e))?;
        file.write_all(&line)
            .with_context(|| format!("Failed to write to {:?}", self.path))?;
        Ok(())
    }
}

/// Emits counters as a structured log line
#[derive(Debug, Default)]
pub struct LogMetrics;

#[async_trait]
impl MetricsSink for LogMetrics {
    async fn publish(&self, metrics: &RunMetrics) -> Result<()> {
        info!(
            instances_discovered = metrics.instances_discovered,
            accounts_scanned = metrics.accounts_scanned,
            accounts_failed = metrics.accounts_failed,
            error_count = metrics.error_count,
            "Discovery metrics"
        );
        Ok(())
    }
}

/// Writes the alert to the log instead of paging anyone
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl NotificationSink for LogNotifier {
    async fn notify(&self, run: &DiscoveryRun) -> Result<()> {
        warn!("{}\n{}", notification_subject(run), notification_body(run));
        Ok(())
    }
}

pub fn notification_subject(run: &DiscoveryRun) -> String {
    let status = serde_json::to_value(run.execution_status)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_else(|| format!("{:?}", run.execution_status));
    format!(
        "RDS inventory run {}: {}/{} accounts scanned",
        status, run.accounts_scanned, run.accounts_attempted
    )
}

/// Plain-text summary grouped by error type, worst first
pub fn notification_body(run: &DiscoveryRun) -> String {
    let mut body = format!(
        "Run {} at {}\nInstances discovered: {}\nAccounts scanned: {}/{}\nRegions scanned: {}\nErrors: {}\n",
        run.run_id,
        run.run_timestamp.to_rfc3339(),
        run.total_instances,
        run.accounts_scanned,
        run.accounts_attempted,
        run.regions_scanned,
        run.errors.len()
    );
    if run.regions_truncated > 0 {
        body.push_str(&format!(
            "Regions with incomplete listings: {}\n",
            run.regions_truncated
        ));
    }

    let mut by_type: BTreeMap<ErrorType, Vec<String>> = BTreeMap::new();
    for error in &run.errors {
        let scope = match &error.region {
            Some(region) => format!("{}/{}", error.account_id, region),
            None => error.account_id.clone(),
        };
        by_type.entry(error.error_type).or_default().push(scope);
    }

    let mut groups: Vec<_> = by_type.into_iter().collect();
    groups.sort_by_key(|(error_type, _)| {
        std::cmp::Reverse(
            run.errors
                .iter()
                .filter(|e| e.error_type == *error_type)
                .map(|e| e.severity)
                .max(),
        )
    });

    for (error_type, scopes) in groups {
        let remediation = run
            .errors
            .iter()
            .find(|e| e.error_type == error_type)
            .map(|e| e.remediation.as_str())
            .unwrap_or_default();
        body.push_str(&format!(
            "\n{} ({}): {}\n  -> {}\n",
            error_type,
            scopes.len(),
            scopes.join(", "),
            remediation
        ));
    }

    body
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::rds_discovery::state::{DiscoveryError, ExecutionStatus, Severity};
    use chrono::Utc;

    fn run_with_errors() -> DiscoveryRun {
        let error = |account: &str, region: Option<&str>, error_type, severity| DiscoveryError {
            account_id: account.to_string(),
            region: region.map(str::to_string),
            error_type,
            severity,
            message: "boom".to_string(),
            remediation: "fix it".to_string(),
            timestamp: Utc::now(),
        };
        DiscoveryRun {
            run_id: "run-1".to_string(),
            run_timestamp: Utc::now(),
            caller_identity: None,
            total_instances: 0,
            accounts_attempted: 2,
            accounts_scanned: 0,
            regions_scanned: 0,
            regions_truncated: 0,
            records_skipped: 0,
            instances: Vec::new(),
            errors: vec![
                error("111111111111", Some("us-east-1"), ErrorType::RateLimited, Severity::Low),
                error("222222222222", None, ErrorType::CrossAccountAccess, Severity::High),
            ],
            execution_status: ExecutionStatus::Degraded,
            success_rate: 0.0,
            duration_ms: 5,
        }
    }

    #[test]
    fn test_notification_text() {
        let run = run_with_errors();
        assert_eq!(
            notification_subject(&run),
            "RDS inventory run DEGRADED: 0/2 accounts scanned"
        );

        let body = notification_body(&run);
        let cross = body.find("cross_account_access (1): 222222222222").unwrap();
        let throttled = body.find("rate_limited (1): 111111111111/us-east-1").unwrap();
        assert!(cross < throttled, "high severity groups come first");
    }

    #[tokio::test]
    async fn test_memory_persistence_upserts_by_id() {
        let store = MemoryPersistence::new();
        let mut instance = DiscoveredInstance::bare("db-1", "111111111111", "us-east-1");
        store.upsert(&instance).await.unwrap();
        instance.status = "stopped".to_string();
        store.upsert(&instance).await.unwrap();

        assert_eq!(store.len(), 1);
        assert_eq!(store.get("db-1").unwrap().status, "stopped");
    }

    #[tokio::test]
    async fn test_json_lines_persistence() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("inventory.jsonl");
        let sink = JsonLinesPersistence::open(&path).unwrap();

        sink.upsert(&DiscoveredInstance::bare("db-1", "111111111111", "us-east-1"))
            .await
            .unwrap();
        sink.upsert(&DiscoveredInstance::bare("db-2", "111111111111", "us-east-1"))
            .await
            .unwrap();

        let contents = std::fs::read_to_string(sink.path()).unwrap();
        let ids: Vec<String> = contents
            .lines()
            .map(|line| serde_json::from_str::<DiscoveredInstance>(line).unwrap().instance_id)
            .collect();
        assert_eq!(ids, vec!["db-1", "db-2"]);
    }
}
