use super::sdk_errors::ScanFailure;
use async_trait::async_trait;
use aws_credential_types::Credentials;
use chrono::{DateTime, Utc};

/// Temporary credentials assumed into one target account
#[derive(Clone)]
pub struct AccountCredentials {
    pub account_id: String,
    pub role_name: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: String,
    pub expiration: Option<DateTime<Utc>>,
}

impl AccountCredentials {
    /// Check if credentials are expired or will expire within the next 5 minutes
    pub fn is_expired(&self) -> bool {
        match self.expiration {
            Some(expiration) => Utc::now() + chrono::Duration::minutes(5) >= expiration,
            None => false,
        }
    }

    /// Create AWS SDK Credentials from this account's credentials
    pub fn to_aws_credentials(&self) -> Credentials {
        Credentials::new(
            &self.access_key_id,
            &self.secret_access_key,
            Some(self.session_token.clone()),
            self.expiration.map(std::time::SystemTime::from),
            "rds-inventory-assume-role",
        )
    }
}

// Secrets stay out of logs
impl std::fmt::Debug for AccountCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountCredentials")
            .field("account_id", &self.account_id)
            .field("role_name", &self.role_name)
            .field("access_key_id", &self.access_key_id)
            .field("expiration", &self.expiration)
            .finish_non_exhaustive()
    }
}

/// Identity the engine itself runs as
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerIdentity {
    pub account_id: String,
    pub arn: String,
}

/// Issues credentials for a target account.
///
/// One instance lives for exactly one run and is handed down explicitly; any
/// caching stays inside the instance.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn assume(
        &self,
        account_id: &str,
        role_name: &str,
        external_id: Option<&str>,
    ) -> Result<AccountCredentials, ScanFailure>;
}

/// Resolves the execution identity before a run starts
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    async fn resolve(&self) -> Result<CallerIdentity, ScanFailure>;
}

pub fn role_arn(account_id: &str, role_name: &str) -> String {
    format!("arn:aws:iam::{}:role/{}", account_id, role_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn creds(expiration: Option<DateTime<Utc>>) -> AccountCredentials {
        AccountCredentials {
            account_id: "123456789012".to_string(),
            role_name: "RdsInventoryRole".to_string(),
            access_key_id: "ASIA...".to_string(),
            secret_access_key: "secret".to_string(),
            session_token: "token".to_string(),
            expiration,
        }
    }

    #[test]
    fn test_account_credentials_expiration() {
        assert!(!creds(Some(Utc::now() + chrono::Duration::hours(1))).is_expired());
        assert!(creds(Some(Utc::now() - chrono::Duration::hours(1))).is_expired());
        // Within 5-minute buffer
        assert!(creds(Some(Utc::now() + chrono::Duration::minutes(2))).is_expired());
        assert!(!creds(None).is_expired());
    }

    #[test]
    fn test_debug_hides_secrets() {
        let rendered = format!("{:?}", creds(None));
        assert!(rendered.contains("123456789012"));
        assert!(!rendered.contains("secret"));
        assert!(!rendered.contains("token"));
    }

    #[test]
    fn test_role_arn() {
        assert_eq!(
            role_arn("123456789012", "RdsInventoryRole"),
            "arn:aws:iam::123456789012:role/RdsInventoryRole"
        );
    }
}
