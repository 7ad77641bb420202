//! AWS implementations of the discovery collaborators.

pub mod cloudwatch;
pub mod dynamodb;
pub mod rds;
pub mod sns;
pub mod sts;

pub use cloudwatch::CloudWatchMetrics;
pub use dynamodb::DynamoDbPersistence;
pub use rds::{RdsInstanceSource, RdsSourceFactory};
pub use sns::SnsNotifier;
pub use sts::{session_name, StsCredentialProvider, StsIdentityResolver};
