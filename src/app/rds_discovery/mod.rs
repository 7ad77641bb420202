//! # RDS Inventory Discovery
//!
//! Enumerates RDS DB instances across many AWS accounts and regions in one run
//! and reports them in a single [`DiscoveryRun`] envelope.
//!
//! ## Layers
//!
//! - [`run_coordinator`]: identity check, run status, side effects
//! - [`account_coordinator`]: per-account role assumption
//! - [`region_pool`]: bounded, time-limited fan-out over regions
//! - [`region_lister`]: paging through one region
//! - [`normalizer`]: raw record to [`DiscoveredInstance`]
//!
//! A failure in one region never affects its siblings, and a failure in one
//! account never affects the next. Every failure ends up as a classified
//! [`DiscoveryError`] in the envelope (see [`sdk_errors`]).

pub mod account_coordinator;
pub mod aws_services;
pub mod config;
pub mod credentials;
pub mod normalizer;
pub mod region_lister;
pub mod region_pool;
pub mod run_coordinator;
pub mod sdk_errors;
pub mod sinks;
pub mod state;

pub use account_coordinator::{AccountCoordinator, AccountScan, AccountsOutcome};
pub use config::{MetricsConfig, NotificationConfig, PersistenceConfig, RunConfig, SinkConfig};
pub use credentials::{AccountCredentials, CallerIdentity, CredentialProvider, IdentityResolver};
pub use normalizer::MetadataExtractor;
pub use region_lister::{InstancePage, InstanceSource, InstanceSourceFactory, RegionLister};
pub use region_pool::{RegionScanOutcome, RegionScannerPool};
pub use run_coordinator::RunCoordinator;
pub use sdk_errors::{classify, classify_kind, ErrorContext, Phase, ScanFailure};
pub use sinks::{MetricsSink, NotificationSink, PersistenceSink};
pub use state::{
    DiscoveredInstance, DiscoveryError, DiscoveryRun, ErrorType, ExecutionStatus, InstanceTags,
    RunMetrics, Severity,
};
