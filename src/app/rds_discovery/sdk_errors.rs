//! Failure classification for discovery runs.
//!
//! Every failure that crosses a fault-isolation boundary (region task, account,
//! side effect, identity check) travels as a [`ScanFailure`] and is turned into a
//! [`DiscoveryError`] by [`classify`]. The {type, severity, remediation} triple
//! depends only on the failure kind/code and the [`Phase`], so the mapping is
//! testable on its own through [`classify_kind`].
//!
//! SDK errors are reduced to a [`ScanFailure`] by looking at the error code the
//! service returned when one is available and falling back to the string patterns
//! seen in AWS SDK error output otherwise.

use super::state::{DiscoveryError, ErrorType, Severity};
use aws_smithy_runtime_api::client::result::SdkError;
use aws_smithy_types::error::metadata::ProvideErrorMetadata;
use chrono::Utc;
use std::fmt::Debug;
use std::time::Duration;
use thiserror::Error;

/// Failure raised inside one scope of a discovery run
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ScanFailure {
    /// The remote service answered with an error code
    #[error("{code}: {message}")]
    Service { code: String, message: String },

    /// Our own per-task deadline expired
    #[error("operation did not complete within {}s", after.as_secs())]
    Timeout { after: Duration },

    /// Request never reached the service or the connection broke
    #[error("network failure: {message}")]
    Network { message: String },

    /// Credentials could not be loaded or were rejected locally
    #[error("credentials unavailable: {message}")]
    Credentials { message: String },

    /// A raw record could not be turned into an instance
    #[error("malformed record: {message}")]
    Malformed { message: String },

    /// Persistence/metrics/notification collaborator failed
    #[error("sink failure: {message}")]
    Sink { message: String },
}

impl ScanFailure {
    pub fn service(code: impl Into<String>, message: impl Into<String>) -> Self {
        ScanFailure::Service {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Reduce an AWS SDK error to a failure kind
    pub fn from_sdk<E, R>(error: SdkError<E, R>) -> Self
    where
        E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
        R: Debug,
    {
        match &error {
            SdkError::TimeoutError(_) => ScanFailure::Network {
                message: format!("request timed out: {}", error_chain(&error)),
            },
            SdkError::DispatchFailure(dispatch) => {
                if dispatch.is_timeout() {
                    ScanFailure::Network {
                        message: format!("request timed out: {}", error_chain(&error)),
                    }
                } else {
                    ScanFailure::Network {
                        message: error_chain(&error),
                    }
                }
            }
            SdkError::ServiceError(service_error) => {
                let err = service_error.err();
                match err.code() {
                    Some(code) => ScanFailure::service(
                        code,
                        err.message().unwrap_or("no message returned").to_string(),
                    ),
                    None => categorize_error_string(&format!("{:?}", error)),
                }
            }
            SdkError::ConstructionFailure(_) => {
                let detail = error_chain(&error);
                if detail.contains("credentials") || detail.contains("Credentials") {
                    ScanFailure::Credentials { message: detail }
                } else {
                    categorize_error_string(&detail)
                }
            }
            _ => categorize_error_string(&format!("{:?}", error)),
        }
    }

    /// Error code used for classification; non-service failures use a synthetic code
    pub fn code(&self) -> &str {
        match self {
            ScanFailure::Service { code, .. } => code,
            ScanFailure::Timeout { .. } => "TaskTimeout",
            ScanFailure::Network { .. } => "NetworkFailure",
            ScanFailure::Credentials { .. } => "CredentialsNotLoaded",
            ScanFailure::Malformed { .. } => "MalformedRecord",
            ScanFailure::Sink { .. } => "SinkFailure",
        }
    }
}

/// Where in the run the failure happened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Identity,
    AssumeRole,
    ListInstances,
    ExtractRecord,
    Persist,
    Notify,
}

#[derive(Debug, Clone)]
pub struct ErrorContext {
    pub account_id: String,
    pub region: Option<String>,
    pub phase: Phase,
}

impl ErrorContext {
    pub fn account(account_id: &str, phase: Phase) -> Self {
        Self {
            account_id: account_id.to_string(),
            region: None,
            phase,
        }
    }

    pub fn region(account_id: &str, region: &str, phase: Phase) -> Self {
        Self {
            account_id: account_id.to_string(),
            region: Some(region.to_string()),
            phase,
        }
    }
}

/// Classification result without per-occurrence data
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub error_type: ErrorType,
    pub severity: Severity,
    pub remediation: &'static str,
}

const THROTTLING_CODES: &[&str] = &[
    "Throttling",
    "ThrottlingException",
    "ThrottledException",
    "TooManyRequestsException",
    "RequestLimitExceeded",
    "RequestThrottled",
    "RequestThrottledException",
    "RateExceeded",
    "SlowDown",
];

const ACCESS_DENIED_CODES: &[&str] = &[
    "AccessDenied",
    "AccessDeniedException",
    "UnauthorizedOperation",
    "UnauthorizedAccess",
    "AuthorizationError",
];

const INVALID_CREDENTIAL_CODES: &[&str] = &[
    "InvalidClientTokenId",
    "ExpiredToken",
    "ExpiredTokenException",
    "SignatureDoesNotMatch",
    "IncompleteSignature",
    "MissingAuthenticationToken",
    "CredentialsNotLoaded",
];

// A disabled opt-in region rejects otherwise valid STS session tokens, so the
// token errors mean "region not enabled" once credentials were already assumed.
const REGION_DISABLED_CODES: &[&str] = &[
    "OptInRequired",
    "RegionDisabledException",
    "AuthFailure",
    "UnrecognizedClientException",
    "InvalidClientTokenId",
    "InvalidToken",
    "EndpointResolutionError",
];

fn code_in(code: &str, codes: &[&str]) -> bool {
    codes.iter().any(|c| *c == code)
}

fn classification(
    error_type: ErrorType,
    severity: Severity,
    remediation: &'static str,
) -> Classification {
    Classification {
        error_type,
        severity,
        remediation,
    }
}

/// Deterministic {type, severity, remediation} for a failure in a phase
pub fn classify_kind(failure: &ScanFailure, phase: Phase) -> Classification {
    use ErrorType::*;
    use Severity::*;

    match phase {
        Phase::Identity => {
            return classification(
                CatastrophicIdentityFailure,
                Critical,
                "verify the execution role credentials and that sts:GetCallerIdentity is reachable",
            )
        }
        Phase::Persist => {
            return classification(
                PersistenceFailure,
                Low,
                "check the inventory store is reachable and writable; results will be upserted on the next run",
            )
        }
        Phase::Notify => {
            return classification(
                NotificationFailure,
                Low,
                "check the notification topic exists and the execution role may publish to it",
            )
        }
        Phase::ExtractRecord => {
            return classification(
                MalformedRecord,
                Low,
                "inspect the raw DescribeDBInstances record; the instance was skipped for this run",
            )
        }
        Phase::AssumeRole | Phase::ListInstances => {}
    }

    let code = failure.code();

    match failure {
        ScanFailure::Timeout { .. } => {
            return classification(
                Timeout,
                Medium,
                "increase per-region timeout or investigate network path",
            )
        }
        ScanFailure::Network { .. } => {
            return classification(
                NetworkError,
                Medium,
                "investigate network path to the regional endpoint (VPC endpoints, proxy, DNS)",
            )
        }
        _ => {}
    }

    if code_in(code, THROTTLING_CODES) {
        return classification(RateLimited, Low, "will retry on next scheduled run");
    }

    if phase == Phase::AssumeRole {
        if code_in(code, INVALID_CREDENTIAL_CODES) {
            return classification(
                InvalidCredentials,
                High,
                "refresh the discovery principal's credentials; they were rejected by STS",
            );
        }
        if code == "RegionDisabledException" {
            return classification(
                RegionNotEnabled,
                Medium,
                "enable region or remove from target list",
            );
        }
        // Any other refusal to hand out credentials is a trust problem
        return classification(
            CrossAccountAccess,
            High,
            "verify trust policy and ExternalId",
        );
    }

    if code_in(code, REGION_DISABLED_CODES) {
        return classification(
            RegionNotEnabled,
            Medium,
            "enable region or remove from target list",
        );
    }
    if code_in(code, ACCESS_DENIED_CODES) {
        return classification(
            CrossAccountAccess,
            High,
            "grant rds:DescribeDBInstances to the discovery role in this account",
        );
    }
    if code_in(code, INVALID_CREDENTIAL_CODES) {
        return classification(
            InvalidCredentials,
            High,
            "assumed credentials expired or were rejected; shorten the run or raise the role session duration",
        );
    }

    classification(
        Unclassified,
        Medium,
        "inspect the error message; the scope will be retried on the next scheduled run",
    )
}

/// Turn a failure plus its context into a run error entry
pub fn classify(failure: &ScanFailure, ctx: &ErrorContext) -> DiscoveryError {
    let Classification {
        error_type,
        severity,
        remediation,
    } = classify_kind(failure, ctx.phase);

    DiscoveryError {
        account_id: ctx.account_id.clone(),
        region: ctx.region.clone(),
        error_type,
        severity,
        message: truncate_message(&failure.to_string(), 500),
        remediation: remediation.to_string(),
        timestamp: Utc::now(),
    }
}

/// Categorize an error based on its string representation
///
/// Used when the SDK did not expose a structured error code.
pub fn categorize_error_string(error_str: &str) -> ScanFailure {
    if let Some(code) = extract_error_code(error_str) {
        if code_in(&code, THROTTLING_CODES)
            || code_in(&code, ACCESS_DENIED_CODES)
            || code_in(&code, INVALID_CREDENTIAL_CODES)
            || code_in(&code, REGION_DISABLED_CODES)
        {
            return ScanFailure::service(code, truncate_message(error_str, 200));
        }
    }

    if error_str.contains("ThrottlingException")
        || error_str.contains("Throttling")
        || error_str.contains("TooManyRequestsException")
        || error_str.contains("RequestLimitExceeded")
        || error_str.contains("RateExceeded")
    {
        return ScanFailure::service("Throttling", truncate_message(error_str, 200));
    }

    if error_str.contains("OptInRequired") {
        return ScanFailure::service("OptInRequired", truncate_message(error_str, 200));
    }

    if error_str.contains("AccessDenied") || error_str.contains("UnauthorizedOperation") {
        return ScanFailure::service("AccessDenied", truncate_message(error_str, 200));
    }

    if error_str.contains("CredentialsNotLoaded") || error_str.contains("NoCredentialsError") {
        return ScanFailure::Credentials {
            message: truncate_message(error_str, 200),
        };
    }

    if error_str.contains("TimeoutError")
        || error_str.contains("timed out")
        || error_str.contains("DispatchFailure")
        || error_str.contains("connection")
        || error_str.contains("Connection")
        || error_str.contains("dns error")
    {
        return ScanFailure::Network {
            message: truncate_message(error_str, 200),
        };
    }

    ScanFailure::service(
        extract_error_code(error_str).unwrap_or_else(|| "Unknown".to_string()),
        truncate_message(error_str, 200),
    )
}

/// Extract AWS error code from error message if present
fn extract_error_code(error_str: &str) -> Option<String> {
    // Pattern 1: code: "ErrorName" in debug output
    if let Some(start) = error_str.find("code:") {
        let after_code = &error_str[start + 5..];
        if let Some(quote_start) = after_code.find('"') {
            let after_quote = &after_code[quote_start + 1..];
            if let Some(quote_end) = after_quote.find('"') {
                let code = &after_quote[..quote_end];
                if !code.is_empty() && code.len() < 50 {
                    return Some(code.to_string());
                }
            }
        }
    }

    // Pattern 2: ErrorName: message
    if let Some(pos) = error_str.find(':') {
        let prefix = error_str[..pos].trim();
        if (prefix.ends_with("Exception") || prefix.ends_with("Error"))
            && !prefix.contains(' ')
        {
            let code = prefix.rsplit("::").next().unwrap_or(prefix);
            if !code.is_empty() && code.len() < 50 {
                return Some(code.to_string());
            }
        }
    }

    None
}

fn error_chain(error: &dyn std::error::Error) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

/// Truncate a message to max length, adding ellipsis if truncated
fn truncate_message(msg: &str, max_len: usize) -> String {
    if msg.chars().count() <= max_len {
        msg.to_string()
    } else {
        let truncated: String = msg.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", truncated)
    }
}
