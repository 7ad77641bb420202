//! Top-level orchestration of a discovery run.
//!
//! Resolves who we are running as, fans the target accounts out through the
//! [`AccountCoordinator`], derives the run status and assembles the
//! [`DiscoveryRun`] envelope. Side effects (persistence, metrics, alerts) run
//! after the envelope is final and can only add log lines.

use super::account_coordinator::AccountCoordinator;
use super::config::RunConfig;
use super::credentials::{CredentialProvider, IdentityResolver};
use super::region_lister::InstanceSourceFactory;
use super::region_pool::RegionScannerPool;
use super::sdk_errors::{classify, ErrorContext, Phase, ScanFailure};
use super::sinks::{
    LogMetrics, LogNotifier, MetricsSink, NoopPersistence, NotificationSink, PersistenceSink,
};
use super::state::{success_rate, DiscoveryRun, ExecutionStatus, RunMetrics};
use chrono::Utc;
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Account id recorded on errors that happen before any account is touched
pub const UNKNOWN_ACCOUNT: &str = "unknown";

/// Builds the credential provider for one run from that run's id
pub type CredentialProviderFn = dyn Fn(&str) -> Arc<dyn CredentialProvider> + Send + Sync;

pub struct RunCoordinator {
    identity: Arc<dyn IdentityResolver>,
    credentials: Arc<CredentialProviderFn>,
    sources: Arc<dyn InstanceSourceFactory>,
    persistence: Arc<dyn PersistenceSink>,
    metrics: Arc<dyn MetricsSink>,
    notifier: Arc<dyn NotificationSink>,
}

impl RunCoordinator {
    /// Coordinator with log-only sinks.
    ///
    /// `credentials` is called once per run; the provider it returns (and any
    /// credential cache inside it) is dropped when the run ends.
    pub fn new<F>(
        identity: Arc<dyn IdentityResolver>,
        credentials: F,
        sources: Arc<dyn InstanceSourceFactory>,
    ) -> Self
    where
        F: Fn(&str) -> Arc<dyn CredentialProvider> + Send + Sync + 'static,
    {
        Self {
            identity,
            credentials: Arc::new(credentials),
            sources,
            persistence: Arc::new(NoopPersistence),
            metrics: Arc::new(LogMetrics),
            notifier: Arc::new(LogNotifier),
        }
    }

    pub fn with_persistence(mut self, persistence: Arc<dyn PersistenceSink>) -> Self {
        self.persistence = persistence;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn NotificationSink>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Execute one discovery run. Always returns a well-formed envelope.
    pub async fn run(&self, config: &RunConfig) -> DiscoveryRun {
        let run_id = uuid::Uuid::new_v4().to_string();
        let run_timestamp = Utc::now();
        let started = Instant::now();

        info!(
            "Starting discovery run {} over {} accounts x {} regions",
            run_id,
            config.target_accounts.len(),
            config.target_regions.len()
        );

        let identity = AssertUnwindSafe(self.identity.resolve())
            .catch_unwind()
            .await
            .unwrap_or_else(|_| {
                Err(ScanFailure::Credentials {
                    message: "identity resolver panicked".to_string(),
                })
            });

        let mut run = match identity {
            Ok(identity) => {
                let provider = (self.credentials)(&run_id);
                let pool = RegionScannerPool::new(
                    self.sources.clone(),
                    config.concurrency_limit,
                    config.per_region_timeout(),
                    config.max_pages,
                );
                let coordinator = AccountCoordinator::new(
                    provider,
                    pool,
                    config.role_name.clone(),
                    config.external_id.clone(),
                    config.target_regions.clone(),
                )
                .with_account_concurrency(config.account_concurrency);

                let outcome = coordinator.scan_accounts(&config.target_accounts).await;
                let execution_status = ExecutionStatus::derive(
                    outcome.accounts_attempted,
                    outcome.accounts_scanned,
                    outcome.errors.len(),
                );

                DiscoveryRun {
                    run_id,
                    run_timestamp,
                    caller_identity: Some(identity.arn),
                    total_instances: outcome.instances.len(),
                    accounts_attempted: outcome.accounts_attempted,
                    accounts_scanned: outcome.accounts_scanned,
                    regions_scanned: outcome.regions_scanned,
                    regions_truncated: outcome.regions_truncated,
                    records_skipped: outcome.records_skipped,
                    instances: outcome.instances,
                    errors: outcome.errors,
                    execution_status,
                    success_rate: success_rate(outcome.accounts_scanned, outcome.accounts_attempted),
                    duration_ms: 0,
                }
            }
            Err(failure) => {
                let identity_error =
                    classify(&failure, &ErrorContext::account(UNKNOWN_ACCOUNT, Phase::Identity));
                error!("Cannot resolve execution identity: {}", identity_error.message);

                DiscoveryRun {
                    run_id,
                    run_timestamp,
                    caller_identity: None,
                    total_instances: 0,
                    accounts_attempted: 0,
                    accounts_scanned: 0,
                    regions_scanned: 0,
                    regions_truncated: 0,
                    records_skipped: 0,
                    instances: Vec::new(),
                    errors: vec![identity_error],
                    execution_status: ExecutionStatus::Failed,
                    // No account was attempted
                    success_rate: success_rate(0, 0),
                    duration_ms: 0,
                }
            }
        };

        run.duration_ms = started.elapsed().as_millis() as u64;

        info!(
            "Run {} finished {:?}: {} instances, {}/{} accounts, {} errors in {}ms",
            run.run_id,
            run.execution_status,
            run.total_instances,
            run.accounts_scanned,
            run.accounts_attempted,
            run.errors.len(),
            run.duration_ms
        );

        self.publish_side_effects(&run, config.sink_timeout()).await;
        run
    }

    async fn publish_side_effects(&self, run: &DiscoveryRun, sink_timeout: Duration) {
        for instance in &run.instances {
            let outcome =
                with_deadline(sink_timeout, self.persistence.upsert(instance)).await;
            if let Err(failure) = outcome {
                let ctx = ErrorContext::region(&instance.account_id, &instance.region, Phase::Persist);
                log_side_effect_failure(&failure, &ctx, &instance.instance_id);
            }
        }

        let metrics = RunMetrics::from(run);
        if let Err(failure) = with_deadline(sink_timeout, self.metrics.publish(&metrics)).await {
            warn!("Failed to publish run metrics: {}", failure);
        }

        if run.execution_status.needs_attention() {
            if let Err(failure) = with_deadline(sink_timeout, self.notifier.notify(run)).await {
                let ctx = ErrorContext::account(UNKNOWN_ACCOUNT, Phase::Notify);
                log_side_effect_failure(&failure, &ctx, &run.run_id);
            }
        }
    }
}

/// Run a sink call under the sink deadline; errors, panics and expiry all become a failure
async fn with_deadline<F>(deadline: Duration, call: F) -> Result<(), ScanFailure>
where
    F: Future<Output = anyhow::Result<()>>,
{
    let guarded = AssertUnwindSafe(call).catch_unwind();
    match tokio::time::timeout(deadline, guarded).await {
        Ok(Ok(Ok(()))) => Ok(()),
        Ok(Ok(Err(e))) => Err(ScanFailure::Sink {
            message: format!("{:#}", e),
        }),
        Ok(Err(_)) => Err(ScanFailure::Sink {
            message: "sink panicked".to_string(),
        }),
        Err(_) => Err(ScanFailure::Timeout { after: deadline }),
    }
}

fn log_side_effect_failure(failure: &ScanFailure, ctx: &ErrorContext, subject: &str) {
    let record = classify(failure, ctx);
    warn!(
        error_type = %record.error_type,
        severity = ?record.severity,
        remediation = %record.remediation,
        "Side effect failed for {}: {}",
        subject,
        record.message
    );
}
