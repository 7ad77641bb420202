//! RDS Inventory - multi-account discovery of Amazon RDS instances
//!
//! One invocation assumes a role in every target account, lists the DB instances
//! of every target region under a bounded level of parallelism, and returns a
//! single [`DiscoveryRun`](app::rds_discovery::DiscoveryRun) describing what was
//! found and what went wrong.
//!
//! # Fault isolation
//!
//! - A region that times out or errors adds one error entry and nothing else
//! - An account whose role cannot be assumed adds one account-level error entry
//! - Only a failure to resolve the execution identity fails the whole run
//!
//! Persistence, metrics and alerting are best-effort and never change the
//! returned envelope.
//!
//! # Getting Started
//!
//! ```no_run
//! use rds_inventory::app::rds_discovery::aws_services::{
//!     session_name, RdsSourceFactory, StsCredentialProvider, StsIdentityResolver,
//! };
//! use rds_inventory::app::rds_discovery::{CredentialProvider, RunConfig, RunCoordinator};
//! use std::sync::Arc;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let sdk_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
//!     .load()
//!     .await;
//! let mut config = RunConfig::load_from_path("inventory.toml")?;
//! config.validate()?;
//!
//! let base = sdk_config.clone();
//! let coordinator = RunCoordinator::new(
//!     Arc::new(StsIdentityResolver::new(&sdk_config)),
//!     move |run_id: &str| -> Arc<dyn CredentialProvider> {
//!         Arc::new(StsCredentialProvider::new(&base, session_name(run_id)))
//!     },
//!     Arc::new(RdsSourceFactory::new(sdk_config.clone())),
//! );
//!
//! let run = coordinator.run(&config).await;
//! println!("{}", serde_json::to_string_pretty(&run)?);
//! # Ok(())
//! # }
//! ```

pub mod app;
