//! In-memory stand-in for STS and RDS shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use rds_inventory::app::rds_discovery::{
    AccountCredentials, CallerIdentity, CredentialProvider, IdentityResolver, InstancePage,
    InstanceSource, InstanceSourceFactory, RunConfig, ScanFailure,
};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Clone)]
pub enum RegionBehaviour {
    Records(Vec<Value>),
    Fail(ScanFailure),
    Hang,
    /// Answers the first page with a marker, then never answers again
    HangAfterFirstPage(Vec<Value>),
}

/// Accounts, regions and what each (account, region) answers
#[derive(Default)]
pub struct FakeAws {
    pub identity_failure: Option<ScanFailure>,
    pub denied_accounts: HashSet<String>,
    pub regions: HashMap<(String, String), RegionBehaviour>,
    pub assume_calls: AtomicUsize,
}

impl FakeAws {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deny(mut self, account_id: &str) -> Self {
        self.denied_accounts.insert(account_id.to_string());
        self
    }

    pub fn region(mut self, account_id: &str, region: &str, behaviour: RegionBehaviour) -> Self {
        self.regions
            .insert((account_id.to_string(), region.to_string()), behaviour);
        self
    }

    pub fn instances(self, account_id: &str, region: &str, ids: &[&str]) -> Self {
        let records = ids.iter().map(|id| record(id)).collect();
        self.region(account_id, region, RegionBehaviour::Records(records))
    }

    pub fn identity_fails(mut self, failure: ScanFailure) -> Self {
        self.identity_failure = Some(failure);
        self
    }
}

pub fn record(id: &str) -> Value {
    json!({
        "DBInstanceIdentifier": id,
        "Engine": "postgres",
        "EngineVersion": "16.1",
        "DBInstanceClass": "db.t4g.medium",
        "DBInstanceStatus": "available",
        "AllocatedStorage": 20,
        "Endpoint": {"Address": format!("{}.internal", id), "Port": 5432},
        "TagList": [{"Key": "Environment", "Value": "prod"}]
    })
}

#[async_trait]
impl IdentityResolver for FakeAws {
    async fn resolve(&self) -> Result<CallerIdentity, ScanFailure> {
        match &self.identity_failure {
            Some(failure) => Err(failure.clone()),
            None => Ok(CallerIdentity {
                account_id: "999999999999".to_string(),
                arn: "arn:aws:sts::999999999999:assumed-role/Inventory/test".to_string(),
            }),
        }
    }
}

#[async_trait]
impl CredentialProvider for FakeAws {
    async fn assume(
        &self,
        account_id: &str,
        role_name: &str,
        _external_id: Option<&str>,
    ) -> Result<AccountCredentials, ScanFailure> {
        self.assume_calls.fetch_add(1, Ordering::SeqCst);
        if self.denied_accounts.contains(account_id) {
            return Err(ScanFailure::service(
                "AccessDenied",
                format!("not authorized to perform sts:AssumeRole on {}", role_name),
            ));
        }
        Ok(AccountCredentials {
            account_id: account_id.to_string(),
            role_name: role_name.to_string(),
            access_key_id: "ASIATEST".to_string(),
            secret_access_key: "secret".to_string(),
            session_token: "token".to_string(),
            expiration: None,
        })
    }
}

struct FakeSource(RegionBehaviour);

#[async_trait]
impl InstanceSource for FakeSource {
    async fn list_page(&self, marker: Option<String>) -> Result<InstancePage, ScanFailure> {
        match &self.0 {
            RegionBehaviour::Records(records) => Ok(InstancePage {
                records: records.clone(),
                marker: None,
            }),
            RegionBehaviour::Fail(failure) => Err(failure.clone()),
            RegionBehaviour::Hang => {
                std::future::pending::<()>().await;
                unreachable!()
            }
            RegionBehaviour::HangAfterFirstPage(records) => match marker {
                None => Ok(InstancePage {
                    records: records.clone(),
                    marker: Some("page-2".to_string()),
                }),
                Some(_) => {
                    std::future::pending::<()>().await;
                    unreachable!()
                }
            },
        }
    }
}

impl InstanceSourceFactory for FakeAws {
    fn source_for(&self, credentials: &AccountCredentials, region: &str) -> Box<dyn InstanceSource> {
        let behaviour = self
            .regions
            .get(&(credentials.account_id.clone(), region.to_string()))
            .cloned()
            .unwrap_or(RegionBehaviour::Records(Vec::new()));
        Box::new(FakeSource(behaviour))
    }
}

pub fn config(accounts: &[&str], regions: &[&str]) -> RunConfig {
    RunConfig {
        target_accounts: accounts.iter().map(|a| a.to_string()).collect(),
        target_regions: regions.iter().map(|r| r.to_string()).collect(),
        role_name: "RdsInventoryRole".to_string(),
        per_region_timeout_seconds: 5,
        ..Default::default()
    }
}

pub const ACCOUNT_A: &str = "111111111111";
pub const ACCOUNT_B: &str = "222222222222";
pub const ACCOUNT_C: &str = "333333333333";
pub const ACCOUNT_D: &str = "444444444444";

/// Shares one fake as identity, credentials and instance source
pub fn coordinator(
    fake: Arc<FakeAws>,
) -> rds_inventory::app::rds_discovery::RunCoordinator {
    let credentials = fake.clone();
    rds_inventory::app::rds_discovery::RunCoordinator::new(
        fake.clone(),
        move |_run_id: &str| -> Arc<dyn CredentialProvider> { credentials.clone() },
        fake,
    )
}
