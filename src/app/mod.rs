//! Core modules for RDS inventory discovery.
//!
//! # Module Organization
//!
//! - [`rds_discovery`] - Fan-out discovery of RDS instances across accounts and regions,
//!   plus the AWS adapters (STS, RDS, DynamoDB, CloudWatch, SNS) it runs against

pub mod rds_discovery;
