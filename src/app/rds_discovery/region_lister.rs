use super::credentials::AccountCredentials;
use super::normalizer::MetadataExtractor;
use super::sdk_errors::ScanFailure;
use super::state::DiscoveredInstance;
use async_trait::async_trait;
use std::collections::HashSet;
use tracing::{debug, warn};

/// One page of raw instance records
#[derive(Debug, Clone, Default)]
pub struct InstancePage {
    pub records: Vec<serde_json::Value>,
    /// Marker for the next page, `None` on the last page
    pub marker: Option<String>,
}

/// Region-scoped listing API
#[async_trait]
pub trait InstanceSource: Send + Sync {
    async fn list_page(&self, marker: Option<String>) -> Result<InstancePage, ScanFailure>;
}

/// Builds a fresh region-scoped client for one region task
pub trait InstanceSourceFactory: Send + Sync {
    fn source_for(&self, credentials: &AccountCredentials, region: &str) -> Box<dyn InstanceSource>;
}

/// Everything one region produced
#[derive(Debug, Clone, Default)]
pub struct RegionListing {
    pub instances: Vec<DiscoveredInstance>,
    pub records_skipped: usize,
    pub pages: usize,
    /// Paging stopped before the source ran out of markers
    pub truncated: bool,
}

/// Pages one region to completion
pub struct RegionLister {
    extractor: MetadataExtractor,
    max_pages: usize,
}

impl RegionLister {
    pub fn new(max_pages: usize) -> Self {
        Self {
            extractor: MetadataExtractor::new(),
            max_pages: max_pages.max(1),
        }
    }

    /// List every instance in the region.
    ///
    /// A page-level failure aborts the listing and is returned to the caller;
    /// a record that cannot be extracted is skipped.
    pub async fn list_region(
        &self,
        source: &dyn InstanceSource,
        account_id: &str,
        region: &str,
    ) -> Result<RegionListing, ScanFailure> {
        let mut listing = RegionListing::default();
        let mut marker: Option<String> = None;
        let mut seen_markers = HashSet::new();

        loop {
            let page = source.list_page(marker.take()).await?;
            listing.pages += 1;
            debug!(
                "Page {} for {}/{}: {} records",
                listing.pages,
                account_id,
                region,
                page.records.len()
            );

            for (index, record) in page.records.iter().enumerate() {
                match self.extractor.extract(record, account_id, region) {
                    Some(instance) => listing.instances.push(instance),
                    None => {
                        listing.records_skipped += 1;
                        warn!(
                            "Skipping malformed record {} on page {} in {}/{}: no instance identifier",
                            index, listing.pages, account_id, region
                        );
                    }
                }
            }

            match page.marker.filter(|m| !m.is_empty()) {
                None => break,
                Some(next) => {
                    if !seen_markers.insert(next.clone()) {
                        warn!(
                            "Listing in {}/{} returned marker {} twice, stopping pagination",
                            account_id, region, next
                        );
                        listing.truncated = true;
                        break;
                    }
                    if listing.pages >= self.max_pages {
                        warn!(
                            "Listing in {}/{} reached the {} page limit, stopping pagination",
                            account_id, region, self.max_pages
                        );
                        listing.truncated = true;
                        break;
                    }
                    marker = Some(next);
                }
            }
        }

        Ok(listing)
    }
}
