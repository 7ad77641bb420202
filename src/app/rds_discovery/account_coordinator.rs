use super::credentials::CredentialProvider;
use super::region_pool::{RegionScanOutcome, RegionScannerPool};
use super::sdk_errors::{classify, ErrorContext, Phase, ScanFailure};
use super::state::{DiscoveredInstance, DiscoveryError};
use futures::stream::{self, StreamExt};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{info, warn};

/// Result of one account
#[derive(Debug)]
pub struct AccountScan {
    pub account_id: String,
    pub credentials_assumed: bool,
    pub regions: RegionScanOutcome,
}

impl AccountScan {
    /// Credentials worked and at least one region answered (or none were asked)
    pub fn is_scanned(&self, regions_targeted: usize) -> bool {
        self.credentials_assumed && (regions_targeted == 0 || self.regions.regions_succeeded > 0)
    }
}

/// Aggregate over all accounts
#[derive(Debug, Default)]
pub struct AccountsOutcome {
    pub instances: Vec<DiscoveredInstance>,
    pub errors: Vec<DiscoveryError>,
    pub accounts_attempted: usize,
    pub accounts_scanned: usize,
    pub regions_scanned: usize,
    pub regions_truncated: usize,
    pub records_skipped: usize,
}

pub struct AccountCoordinator {
    credentials: Arc<dyn CredentialProvider>,
    pool: RegionScannerPool,
    role_name: String,
    external_id: Option<String>,
    regions: Vec<String>,
    account_concurrency: usize,
}

impl AccountCoordinator {
    pub fn new(
        credentials: Arc<dyn CredentialProvider>,
        pool: RegionScannerPool,
        role_name: String,
        external_id: Option<String>,
        regions: Vec<String>,
    ) -> Self {
        Self {
            credentials,
            pool,
            role_name,
            external_id,
            regions,
            account_concurrency: 1,
        }
    }

    pub fn with_account_concurrency(mut self, account_concurrency: usize) -> Self {
        self.account_concurrency = account_concurrency.max(1);
        self
    }

    /// Assume into one account and scan its regions; never fails
    pub async fn scan_account(&self, account_id: &str) -> AccountScan {
        info!("Assuming role {} in account {}", self.role_name, account_id);

        let assumed = AssertUnwindSafe(self.credentials.assume(
            account_id,
            &self.role_name,
            self.external_id.as_deref(),
        ))
        .catch_unwind()
        .await
        .unwrap_or_else(|_| {
            Err(ScanFailure::Credentials {
                message: "credential provider panicked while assuming the role".to_string(),
            })
        });

        let credentials = match assumed {
            Ok(credentials) => credentials,
            Err(failure) => {
                let error = classify(&failure, &ErrorContext::account(account_id, Phase::AssumeRole));
                warn!(
                    "Skipping account {} ({}): {}",
                    account_id, error.error_type, error.message
                );
                return AccountScan {
                    account_id: account_id.to_string(),
                    credentials_assumed: false,
                    regions: RegionScanOutcome {
                        errors: vec![error],
                        ..Default::default()
                    },
                };
            }
        };

        let regions = self.pool.scan_regions(&credentials, &self.regions).await;
        AccountScan {
            account_id: account_id.to_string(),
            credentials_assumed: true,
            regions,
        }
    }

    /// Scan accounts in input order and merge their results
    pub async fn scan_accounts(&self, account_ids: &[String]) -> AccountsOutcome {
        let scans: Vec<AccountScan> = stream::iter(account_ids)
            .map(|account_id| self.scan_account(account_id))
            .buffered(self.account_concurrency)
            .collect()
            .await;

        let mut outcome = AccountsOutcome {
            accounts_attempted: account_ids.len(),
            ..Default::default()
        };

        for scan in scans {
            if scan.is_scanned(self.regions.len()) {
                outcome.accounts_scanned += 1;
            }
            outcome.regions_scanned += scan.regions.regions_succeeded;
            outcome.regions_truncated += scan.regions.regions_truncated;
            outcome.records_skipped += scan.regions.records_skipped;
            outcome.instances.extend(scan.regions.instances);
            outcome.errors.extend(scan.regions.errors);
        }

        info!(
            "Accounts scanned: {}/{}, instances: {}, errors: {}",
            outcome.accounts_scanned,
            outcome.accounts_attempted,
            outcome.instances.len(),
            outcome.errors.len()
        );
        outcome
    }
}
