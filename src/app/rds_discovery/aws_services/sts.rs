use super::super::credentials::{
    role_arn, AccountCredentials, CallerIdentity, CredentialProvider, IdentityResolver,
};
use super::super::sdk_errors::ScanFailure;
use async_trait::async_trait;
use aws_sdk_sts as sts;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Assumes the discovery role in each target account through STS.
///
/// Credentials are cached per account for the lifetime of this value only,
/// so a fresh provider per run never leaks sessions between runs.
#[derive(Debug)]
pub struct StsCredentialProvider {
    client: sts::Client,
    session_name: String,
    credential_cache: Arc<RwLock<HashMap<String, AccountCredentials>>>,
}

impl StsCredentialProvider {
    pub fn new(base_config: &aws_config::SdkConfig, session_name: impl Into<String>) -> Self {
        Self {
            client: sts::Client::new(base_config),
            session_name: session_name.into(),
            credential_cache: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    async fn get_cached_credentials(&self, cache_key: &str) -> Option<AccountCredentials> {
        let cache = self.credential_cache.read().await;
        cache
            .get(cache_key)
            .filter(|creds| !creds.is_expired())
            .cloned()
    }

    async fn cache_credentials(&self, cache_key: String, credentials: &AccountCredentials) {
        let mut cache = self.credential_cache.write().await;
        cache.insert(cache_key, credentials.clone());
    }
}

/// STS session name for one run; the run id prefix ties CloudTrail entries to the run
pub fn session_name(run_id: &str) -> String {
    let prefix: String = run_id.chars().filter(|c| *c != '-').take(8).collect();
    format!("rds-inventory-{}", prefix)
}

fn to_chrono(value: &aws_smithy_types::DateTime) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(value.secs(), value.subsec_nanos())
}

#[async_trait]
impl CredentialProvider for StsCredentialProvider {
    async fn assume(
        &self,
        account_id: &str,
        role_name: &str,
        external_id: Option<&str>,
    ) -> Result<AccountCredentials, ScanFailure> {
        let cache_key = format!("{}:{}", account_id, role_name);
        if let Some(cached) = self.get_cached_credentials(&cache_key).await {
            debug!("Using cached credentials for account {}", account_id);
            return Ok(cached);
        }

        let arn = role_arn(account_id, role_name);
        debug!("Assuming {} as session {}", arn, self.session_name);

        let output = self
            .client
            .assume_role()
            .role_arn(&arn)
            .role_session_name(&self.session_name)
            .set_external_id(external_id.map(str::to_string))
            .send()
            .await
            .map_err(ScanFailure::from_sdk)?;

        let creds = output.credentials().ok_or_else(|| ScanFailure::Credentials {
            message: format!("AssumeRole for {} returned no credentials", arn),
        })?;

        let account_credentials = AccountCredentials {
            account_id: account_id.to_string(),
            role_name: role_name.to_string(),
            access_key_id: creds.access_key_id().to_string(),
            secret_access_key: creds.secret_access_key().to_string(),
            session_token: creds.session_token().to_string(),
            expiration: to_chrono(creds.expiration()),
        };

        self.cache_credentials(cache_key, &account_credentials).await;
        Ok(account_credentials)
    }
}

/// Resolves the caller identity with `GetCallerIdentity`
#[derive(Debug, Clone)]
pub struct StsIdentityResolver {
    client: sts::Client,
}

impl StsIdentityResolver {
    pub fn new(base_config: &aws_config::SdkConfig) -> Self {
        Self {
            client: sts::Client::new(base_config),
        }
    }
}

#[async_trait]
impl IdentityResolver for StsIdentityResolver {
    async fn resolve(&self) -> Result<CallerIdentity, ScanFailure> {
        let output = self
            .client
            .get_caller_identity()
            .send()
            .await
            .map_err(ScanFailure::from_sdk)?;

        let identity = CallerIdentity {
            account_id: output.account().unwrap_or_default().to_string(),
            arn: output.arn().unwrap_or_default().to_string(),
        };

        if identity.arn.is_empty() {
            return Err(ScanFailure::Credentials {
                message: "GetCallerIdentity returned no ARN".to_string(),
            });
        }

        info!("Running as {}", identity.arn);
        Ok(identity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_name() {
        assert_eq!(
            session_name("3f2a9c1e-77aa-4b5c-9d1e-000000000000"),
            "rds-inventory-3f2a9c1e"
        );
    }

    #[test]
    fn test_expiration_conversion() {
        let smithy = aws_smithy_types::DateTime::from_secs_and_nanos(1_700_000_000, 500);
        let converted = to_chrono(&smithy).unwrap();
        assert_eq!(converted.timestamp(), 1_700_000_000);
        assert_eq!(converted.timestamp_subsec_nanos(), 500);
    }
}
