//! Bounded fan-out of region scans for one account.
//!
//! One future per region, at most `concurrency` of them past the semaphore at a
//! time, each with its own client and its own deadline. Nothing is shared
//! between the futures; results are merged only after every future has finished.

use super::credentials::AccountCredentials;
use super::region_lister::{InstanceSourceFactory, RegionLister, RegionListing};
use super::sdk_errors::{classify, ErrorContext, Phase, ScanFailure};
use super::state::{DiscoveredInstance, DiscoveryError};
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

/// Merged result of all region tasks of one account
#[derive(Debug, Default)]
pub struct RegionScanOutcome {
    pub instances: Vec<DiscoveredInstance>,
    pub errors: Vec<DiscoveryError>,
    pub regions_succeeded: usize,
    pub records_skipped: usize,
    /// Succeeded regions whose paging stopped early
    pub regions_truncated: usize,
}

pub struct RegionScannerPool {
    factory: Arc<dyn InstanceSourceFactory>,
    lister: RegionLister,
    concurrency: usize,
    per_region_timeout: Duration,
}

impl RegionScannerPool {
    pub fn new(
        factory: Arc<dyn InstanceSourceFactory>,
        concurrency: usize,
        per_region_timeout: Duration,
        max_pages: usize,
    ) -> Self {
        Self {
            factory,
            lister: RegionLister::new(max_pages),
            // tokio panics above MAX_PERMITS
            concurrency: concurrency.clamp(1, Semaphore::MAX_PERMITS),
            per_region_timeout,
        }
    }

    /// Scan every region with the account's credentials
    pub async fn scan_regions(
        &self,
        credentials: &AccountCredentials,
        regions: &[String],
    ) -> RegionScanOutcome {
        let account_id = credentials.account_id.as_str();
        info!(
            "Scanning {} regions in account {} with concurrency {}",
            regions.len(),
            account_id,
            self.concurrency
        );

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut futures: FuturesUnordered<BoxFuture<'_, (String, Result<RegionListing, ScanFailure>)>> =
            FuturesUnordered::new();

        for region in regions {
            let semaphore = semaphore.clone();
            let region = region.clone();

            futures.push(Box::pin(async move {
                let _permit = match semaphore.acquire().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        return (
                            region,
                            Err(ScanFailure::service("PoolClosed", "region pool shut down")),
                        )
                    }
                };

                let result = AssertUnwindSafe(self.scan_one(credentials, &region))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|_| {
                        Err(ScanFailure::service(
                            "TaskPanicked",
                            "region task panicked while listing instances",
                        ))
                    });
                (region, result)
            }));
        }

        let mut completed = Vec::with_capacity(regions.len());
        while let Some(result) = futures.next().await {
            completed.push(result);
        }

        // Join done; merge
        let mut outcome = RegionScanOutcome::default();
        for (region, result) in completed {
            match result {
                Ok(listing) => {
                    outcome.regions_succeeded += 1;
                    outcome.records_skipped += listing.records_skipped;
                    if listing.truncated {
                        outcome.regions_truncated += 1;
                    }
                    outcome.instances.extend(listing.instances);
                }
                Err(failure) => {
                    let error = classify(
                        &failure,
                        &ErrorContext::region(account_id, &region, Phase::ListInstances),
                    );
                    warn!(
                        "Region {} in account {} failed ({}): {}",
                        region, account_id, error.error_type, error.message
                    );
                    outcome.errors.push(error);
                }
            }
        }

        info!(
            "Account {}: {}/{} regions scanned, {} instances, {} region errors",
            account_id,
            outcome.regions_succeeded,
            regions.len(),
            outcome.instances.len(),
            outcome.errors.len()
        );
        outcome
    }

    /// One region under its own deadline; partial results are dropped on expiry
    async fn scan_one(
        &self,
        credentials: &AccountCredentials,
        region: &str,
    ) -> Result<RegionListing, ScanFailure> {
        let account_id = credentials.account_id.as_str();
        let started = Instant::now();
        let source = self.factory.source_for(credentials, region);

        let result = tokio::time::timeout(
            self.per_region_timeout,
            self.lister.list_region(source.as_ref(), account_id, region),
        )
        .await;

        match result {
            Ok(listing) => {
                debug!(
                    "Region {}/{} finished in {:?}",
                    account_id,
                    region,
                    started.elapsed()
                );
                listing
            }
            Err(_) => Err(ScanFailure::Timeout {
                after: self.per_region_timeout,
            }),
        }
    }
}
