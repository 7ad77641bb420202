mod common;

use common::*;
use pretty_assertions::assert_eq;
use rds_inventory::app::rds_discovery::sinks::MemoryPersistence;
use rds_inventory::app::rds_discovery::{
    DiscoveryRun, ErrorType, ExecutionStatus, NotificationSink, PersistenceSink, ScanFailure,
    Severity,
};
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn instance_keys(run: &DiscoveryRun) -> BTreeSet<(String, String, String)> {
    run.instances.iter().map(|i| i.identity_key()).collect()
}

#[derive(Default)]
struct CountingNotifier {
    sent: AtomicUsize,
}

#[async_trait::async_trait]
impl NotificationSink for CountingNotifier {
    async fn notify(&self, _run: &DiscoveryRun) -> anyhow::Result<()> {
        self.sent.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct BrokenStore;

#[async_trait::async_trait]
impl PersistenceSink for BrokenStore {
    async fn upsert(
        &self,
        _instance: &rds_inventory::app::rds_discovery::DiscoveredInstance,
    ) -> anyhow::Result<()> {
        anyhow::bail!("ProvisionedThroughputExceededException")
    }
}

#[tokio::test]
async fn test_one_denied_account_is_partial_success() {
    let fake = Arc::new(
        FakeAws::new()
            .instances(ACCOUNT_A, "us-east-1", &["orders-db", "billing-db"])
            .deny(ACCOUNT_B),
    );

    // us-west-2 answers with a clean, empty page for A
    let run = coordinator(fake)
        .run(&config(&[ACCOUNT_A, ACCOUNT_B], &["us-east-1", "us-west-2"]))
        .await;

    assert_eq!(run.total_instances, 2);
    assert_eq!(run.regions_scanned, 2);
    assert_eq!(run.accounts_attempted, 2);
    assert_eq!(run.accounts_scanned, 1);
    assert_eq!(run.execution_status, ExecutionStatus::PartialSuccess);
    assert_eq!(run.success_rate, 0.5);
    assert_eq!(run.errors.len(), 1);

    let error = &run.errors[0];
    assert_eq!(error.account_id, ACCOUNT_B);
    assert_eq!(error.region, None);
    assert_eq!(error.error_type, ErrorType::CrossAccountAccess);
    assert_eq!(error.severity, Severity::High);
    assert!(!error.remediation.is_empty());
    assert_eq!(run.http_status(), 200);
}

#[tokio::test]
async fn test_each_denied_account_yields_one_error() {
    let fake = Arc::new(
        FakeAws::new()
            .instances(ACCOUNT_A, "us-east-1", &["a-1"])
            .deny(ACCOUNT_B)
            .deny(ACCOUNT_C)
            .deny(ACCOUNT_D),
    );

    let run = coordinator(fake)
        .run(&config(
            &[ACCOUNT_A, ACCOUNT_B, ACCOUNT_C, ACCOUNT_D],
            &["us-east-1", "eu-west-1"],
        ))
        .await;

    let denied: Vec<&str> = run
        .errors_of_type(ErrorType::CrossAccountAccess)
        .map(|e| e.account_id.as_str())
        .collect();
    assert_eq!(denied, vec![ACCOUNT_B, ACCOUNT_C, ACCOUNT_D]);
    assert!(run.errors.iter().all(|e| e.is_account_level()));
    assert_eq!(run.accounts_scanned, 1);
    assert_eq!(run.accounts_failed(), 3);
    assert_eq!(run.success_rate, 0.25);
}

#[tokio::test(start_paused = true)]
async fn test_hanging_region_only_costs_that_region() {
    let fake = Arc::new(
        FakeAws::new()
            .instances(ACCOUNT_A, "us-east-1", &["east-db"])
            .region(ACCOUNT_A, "eu-west-1", RegionBehaviour::Hang)
            .instances(ACCOUNT_A, "ap-south-1", &["south-db"]),
    );

    let run = coordinator(fake)
        .run(&config(&[ACCOUNT_A], &["us-east-1", "eu-west-1", "ap-south-1"]))
        .await;

    let ids: BTreeSet<&str> = run.instances.iter().map(|i| i.instance_id.as_str()).collect();
    assert_eq!(ids, BTreeSet::from(["east-db", "south-db"]));
    assert_eq!(run.errors.len(), 1);
    assert_eq!(run.errors[0].error_type, ErrorType::Timeout);
    assert_eq!(run.errors[0].region.as_deref(), Some("eu-west-1"));
    assert_eq!(run.regions_scanned, 2);
    assert_eq!(run.accounts_scanned, 1);
    assert_eq!(run.execution_status, ExecutionStatus::PartialSuccess);
}

#[tokio::test(start_paused = true)]
async fn test_timed_out_region_drops_pages_already_listed() {
    let fake = Arc::new(
        FakeAws::new()
            .instances(ACCOUNT_A, "us-east-1", &["east-db"])
            .region(
                ACCOUNT_A,
                "eu-west-1",
                RegionBehaviour::HangAfterFirstPage(vec![record("west-1"), record("west-2")]),
            ),
    );

    let run = coordinator(fake)
        .run(&config(&[ACCOUNT_A], &["us-east-1", "eu-west-1"]))
        .await;

    let ids: Vec<&str> = run.instances.iter().map(|i| i.instance_id.as_str()).collect();
    assert_eq!(ids, vec!["east-db"]);
    assert_eq!(run.errors.len(), 1);
    assert_eq!(run.errors[0].error_type, ErrorType::Timeout);
    assert_eq!(run.errors[0].account_id, ACCOUNT_A);
    assert_eq!(run.errors[0].region.as_deref(), Some("eu-west-1"));
    assert_eq!(run.execution_status, ExecutionStatus::PartialSuccess);
}

#[tokio::test]
async fn test_region_failures_are_classified_per_region() {
    let fake = Arc::new(
        FakeAws::new()
            .region(
                ACCOUNT_A,
                "us-east-1",
                RegionBehaviour::Fail(ScanFailure::service("ThrottlingException", "Rate exceeded")),
            )
            .region(
                ACCOUNT_A,
                "me-south-1",
                RegionBehaviour::Fail(ScanFailure::service(
                    "InvalidClientTokenId",
                    "The security token included in the request is invalid",
                )),
            )
            .instances(ACCOUNT_A, "eu-west-1", &["eu-db"]),
    );

    let run = coordinator(fake)
        .run(&config(&[ACCOUNT_A], &["us-east-1", "me-south-1", "eu-west-1"]))
        .await;

    let mut types: Vec<(String, ErrorType)> = run
        .errors
        .iter()
        .map(|e| (e.region.clone().unwrap_or_default(), e.error_type))
        .collect();
    types.sort();
    assert_eq!(
        types,
        vec![
            ("me-south-1".to_string(), ErrorType::RegionNotEnabled),
            ("us-east-1".to_string(), ErrorType::RateLimited),
        ]
    );
    assert_eq!(run.total_instances, 1);
    assert_eq!(run.execution_status, ExecutionStatus::PartialSuccess);
}

#[tokio::test]
async fn test_malformed_record_is_skipped_not_reported() {
    let fake = Arc::new(FakeAws::new().region(
        ACCOUNT_A,
        "us-east-1",
        RegionBehaviour::Records(vec![
            record("db-1"),
            json!({"Engine": "mysql", "DBInstanceStatus": "available"}),
            record("db-3"),
            record("db-4"),
        ]),
    ));

    let run = coordinator(fake)
        .run(&config(&[ACCOUNT_A], &["us-east-1"]))
        .await;

    assert_eq!(run.total_instances, 3);
    assert_eq!(run.records_skipped, 1);
    assert!(run.errors.is_empty());
    assert_eq!(run.execution_status, ExecutionStatus::Success);
}

#[tokio::test]
async fn test_all_accounts_denied_is_degraded_and_alerts() {
    let fake = Arc::new(FakeAws::new().deny(ACCOUNT_A).deny(ACCOUNT_B));
    let notifier = Arc::new(CountingNotifier::default());

    let run = coordinator(fake)
        .with_notifier(notifier.clone())
        .run(&config(&[ACCOUNT_A, ACCOUNT_B], &["us-east-1"]))
        .await;

    assert_eq!(run.execution_status, ExecutionStatus::Degraded);
    assert_eq!(run.success_rate, 0.0);
    assert_eq!(run.total_instances, 0);
    assert_eq!(run.http_status(), 200);
    assert_eq!(notifier.sent.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_identity_failure_fails_without_touching_accounts() {
    let fake = Arc::new(FakeAws::new().identity_fails(ScanFailure::service(
        "ExpiredToken",
        "The security token included in the request is expired",
    )));
    let notifier = Arc::new(CountingNotifier::default());

    let run = coordinator(fake.clone())
        .with_notifier(notifier.clone())
        .run(&config(&[ACCOUNT_A], &["us-east-1"]))
        .await;

    assert_eq!(run.execution_status, ExecutionStatus::Failed);
    assert_eq!(run.http_status(), 500);
    assert_eq!(run.errors.len(), 1);
    assert_eq!(run.errors[0].error_type, ErrorType::CatastrophicIdentityFailure);
    assert_eq!(run.accounts_attempted, 0);
    assert_eq!(run.success_rate, 1.0);
    assert_eq!(fake.assume_calls.load(Ordering::SeqCst), 0);
    assert_eq!(notifier.sent.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_successful_runs_do_not_alert() {
    let fake = Arc::new(FakeAws::new().instances(ACCOUNT_A, "us-east-1", &["db-1"]));
    let notifier = Arc::new(CountingNotifier::default());

    let run = coordinator(fake)
        .with_notifier(notifier.clone())
        .run(&config(&[ACCOUNT_A], &["us-east-1"]))
        .await;

    assert_eq!(run.execution_status, ExecutionStatus::Success);
    assert_eq!(notifier.sent.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_no_accounts_is_trivial_success() {
    let run = coordinator(Arc::new(FakeAws::new()))
        .run(&config(&[], &["us-east-1"]))
        .await;

    assert_eq!(run.execution_status, ExecutionStatus::Success);
    assert_eq!(run.accounts_attempted, 0);
    assert_eq!(run.success_rate, 1.0);
    assert!(run.instances.is_empty());
}

#[tokio::test]
async fn test_repeated_runs_find_the_same_instances() {
    let fake = Arc::new(
        FakeAws::new()
            .instances(ACCOUNT_A, "us-east-1", &["a-east"])
            .instances(ACCOUNT_A, "eu-west-1", &["a-west-1", "a-west-2"])
            .instances(ACCOUNT_B, "us-east-1", &["b-east"]),
    );
    let mut config = config(&[ACCOUNT_A, ACCOUNT_B], &["us-east-1", "eu-west-1"]);
    config.account_concurrency = 2;
    let coordinator = coordinator(fake);

    let first = coordinator.run(&config).await;
    let second = coordinator.run(&config).await;

    assert_eq!(instance_keys(&first), instance_keys(&second));
    assert_eq!(first.total_instances, 4);
    assert_ne!(first.run_id, second.run_id);
}

#[tokio::test]
async fn test_sink_failures_leave_envelope_untouched() {
    let fake = Arc::new(
        FakeAws::new()
            .instances(ACCOUNT_A, "us-east-1", &["db-1", "db-2"])
            .deny(ACCOUNT_B),
    );
    let config = config(&[ACCOUNT_A, ACCOUNT_B], &["us-east-1"]);

    let store = Arc::new(MemoryPersistence::new());
    let healthy = coordinator(fake.clone())
        .with_persistence(store.clone())
        .run(&config)
        .await;
    let broken = coordinator(fake)
        .with_persistence(Arc::new(BrokenStore))
        .run(&config)
        .await;

    assert_eq!(store.len(), 2);
    assert!(store.get("db-1").is_some());
    assert_eq!(healthy.execution_status, broken.execution_status);
    assert_eq!(healthy.errors.len(), broken.errors.len());
    assert_eq!(instance_keys(&healthy), instance_keys(&broken));
    assert!(broken
        .errors
        .iter()
        .all(|e| e.error_type != ErrorType::PersistenceFailure));
}
