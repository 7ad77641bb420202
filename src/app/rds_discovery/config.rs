//! Run configuration.
//!
//! Loaded from a TOML, YAML or JSON file (picked by extension), then overridden
//! by `RDS_INVENTORY_*` environment variables and finally by CLI flags.
//!
//! ```toml
//! target_accounts = ["111111111111", "222222222222"]
//! target_regions = ["us-east-1", "eu-west-1"]
//! role_name = "RdsInventoryRole"
//! external_id = "inventory-7f3a"
//! concurrency_limit = 4
//! per_region_timeout_seconds = 60
//!
//! [sinks.persistence]
//! kind = "dynamodb"
//! table = "rds-inventory"
//! ```

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

pub const ENV_PREFIX: &str = "RDS_INVENTORY_";

fn default_concurrency_limit() -> usize {
    4
}

fn default_per_region_timeout_seconds() -> u64 {
    60
}

fn default_account_concurrency() -> usize {
    1
}

fn default_max_pages() -> usize {
    1000
}

fn default_sink_timeout_seconds() -> u64 {
    10
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunConfig {
    #[serde(default)]
    pub target_accounts: Vec<String>,
    #[serde(default)]
    pub target_regions: Vec<String>,
    #[serde(default)]
    pub role_name: String,
    #[serde(default)]
    pub external_id: Option<String>,
    /// Region tasks in flight per account
    #[serde(default = "default_concurrency_limit")]
    pub concurrency_limit: usize,
    #[serde(default = "default_per_region_timeout_seconds")]
    pub per_region_timeout_seconds: u64,
    /// Accounts scanned at once; 1 keeps strict input order
    #[serde(default = "default_account_concurrency")]
    pub account_concurrency: usize,
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,
    #[serde(default = "default_sink_timeout_seconds")]
    pub sink_timeout_seconds: u64,
    #[serde(default)]
    pub sinks: SinkConfig,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            target_accounts: Vec::new(),
            target_regions: Vec::new(),
            role_name: String::new(),
            external_id: None,
            concurrency_limit: default_concurrency_limit(),
            per_region_timeout_seconds: default_per_region_timeout_seconds(),
            account_concurrency: default_account_concurrency(),
            max_pages: default_max_pages(),
            sink_timeout_seconds: default_sink_timeout_seconds(),
            sinks: SinkConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SinkConfig {
    #[serde(default)]
    pub persistence: PersistenceConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub notification: NotificationConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PersistenceConfig {
    #[default]
    None,
    Jsonl {
        path: PathBuf,
    },
    Dynamodb {
        table: String,
    },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MetricsConfig {
    #[default]
    Log,
    Cloudwatch {
        namespace: String,
    },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NotificationConfig {
    #[default]
    Log,
    Sns {
        topic_arn: String,
    },
}

impl RunConfig {
    /// Load configuration from a file, format picked by extension
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {:?}", path))?;

        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();

        let config: RunConfig = match extension.as_str() {
            "toml" => toml::from_str(&contents)
                .with_context(|| format!("Failed to parse TOML config {:?}", path))?,
            "yaml" | "yml" => serde_yaml::from_str(&contents)
                .with_context(|| format!("Failed to parse YAML config {:?}", path))?,
            "json" => serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse JSON config {:?}", path))?,
            other => bail!("Unsupported config format '{}' for {:?}", other, path),
        };

        debug!(
            "Loaded config from {:?}: {} accounts, {} regions",
            path,
            config.target_accounts.len(),
            config.target_regions.len()
        );
        Ok(config)
    }

    /// Default config location in the platform config directory
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "", "rds-inventory")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply `RDS_INVENTORY_*` overrides from an arbitrary lookup
    pub fn apply_overrides_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(&format!("{}{}", ENV_PREFIX, name));

        if let Some(accounts) = var("ACCOUNTS") {
            self.target_accounts = split_list(&accounts);
        }
        if let Some(regions) = var("REGIONS") {
            self.target_regions = split_list(&regions);
        }
        if let Some(role) = var("ROLE_NAME") {
            self.role_name = role.trim().to_string();
        }
        if let Some(external_id) = var("EXTERNAL_ID") {
            let external_id = external_id.trim().to_string();
            self.external_id = (!external_id.is_empty()).then_some(external_id);
        }
        if let Some(limit) = var("CONCURRENCY") {
            self.concurrency_limit = limit
                .trim()
                .parse()
                .with_context(|| format!("Invalid {}CONCURRENCY '{}'", ENV_PREFIX, limit))?;
        }
        if let Some(timeout) = var("REGION_TIMEOUT") {
            self.per_region_timeout_seconds = timeout
                .trim()
                .parse()
                .with_context(|| format!("Invalid {}REGION_TIMEOUT '{}'", ENV_PREFIX, timeout))?;
        }

        Ok(())
    }

    /// Check the configuration and drop duplicate accounts/regions
    pub fn validate(&mut self) -> Result<()> {
        if self.role_name.trim().is_empty() {
            bail!("role_name must not be empty");
        }
        if self.concurrency_limit == 0 {
            bail!("concurrency_limit must be at least 1");
        }
        if self.concurrency_limit > tokio::sync::Semaphore::MAX_PERMITS {
            bail!(
                "concurrency_limit must be at most {}",
                tokio::sync::Semaphore::MAX_PERMITS
            );
        }
        if self.account_concurrency == 0 {
            bail!("account_concurrency must be at least 1");
        }
        if self.per_region_timeout_seconds == 0 {
            bail!("per_region_timeout_seconds must be greater than 0");
        }
        if self.sink_timeout_seconds == 0 {
            bail!("sink_timeout_seconds must be greater than 0");
        }
        if self.max_pages == 0 {
            bail!("max_pages must be at least 1");
        }

        for account in &self.target_accounts {
            if account.len() != 12 || !account.chars().all(|c| c.is_ascii_digit()) {
                bail!("'{}' is not a 12-digit AWS account id", account);
            }
        }
        if let Some(region) = self.target_regions.iter().find(|r| r.trim().is_empty()) {
            bail!("empty region name in target_regions: {:?}", region);
        }

        dedupe("account", &mut self.target_accounts);
        dedupe("region", &mut self.target_regions);
        Ok(())
    }

    pub fn per_region_timeout(&self) -> Duration {
        Duration::from_secs(self.per_region_timeout_seconds)
    }

    pub fn sink_timeout(&self) -> Duration {
        Duration::from_secs(self.sink_timeout_seconds)
    }
}

pub fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

/// Keep first occurrence, preserve order
fn dedupe(label: &str, items: &mut Vec<String>) {
    let mut seen = HashSet::new();
    let before = items.len();
    items.retain(|item| seen.insert(item.clone()));
    if items.len() != before {
        warn!("Dropped {} duplicate {} entries", before - items.len(), label);
    }
}
