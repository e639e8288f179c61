use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use maplit::btreemap;
use tokio::sync::mpsc;

use super::reconciler::needs_update;
use super::*;
use crate::error::AppError;
use crate::fixtures::{test_spec, FleetCall, MemoryFleet, MemoryRecordStore};
use crate::fleet::Fleet;
use crate::reporter::{ErrorReporter, ReportedError};
use opsflow_core::crd::{NodeResourceInfo, ResourceInfo};

fn new_reconciler(store: Arc<MemoryRecordStore>, fleet: Arc<MemoryFleet>) -> (Reconciler, mpsc::UnboundedReceiver<ReportedError>) {
    let (reporter, errors) = ErrorReporter::new();
    let retry = RetryPolicy {
        attempts: 3,
        delay: Duration::from_millis(0),
    };
    (Reconciler::new(store, Fleet::new(fleet, "test-cluster".into()), retry, reporter), errors)
}

#[tokio::test]
async fn reconcile_twice_creates_once() -> Result<()> {
    let (store, fleet) = (Arc::new(MemoryRecordStore::default()), Arc::new(MemoryFleet::default()));
    let (reconciler, _errors) = new_reconciler(store.clone(), fleet.clone());

    let first = reconciler.reconcile(test_spec("n1", "500m")).await?;
    let second = reconciler.reconcile(test_spec("n1", "500m")).await?;

    assert_eq!(first, Outcome::Created, "expected first pass to create, got {:?}", first);
    assert_eq!(second, Outcome::Unchanged, "expected second pass to be a no-op, got {:?}", second);
    let (creates, updates) = (store.creates.load(Ordering::SeqCst), store.updates.load(Ordering::SeqCst));
    assert_eq!(creates, 1, "expected exactly 1 create, got {}", creates);
    assert_eq!(updates, 0, "expected 0 updates, got {}", updates);
    assert_eq!(fleet.added(), vec!["n1".to_string()], "expected one AddNode call for n1, got {:?}", fleet.calls());
    Ok(())
}

#[tokio::test]
async fn reconcile_matching_record_issues_no_writes() -> Result<()> {
    let store = Arc::new(MemoryRecordStore::with_records(vec![test_spec("n1", "500m")]));
    let fleet = Arc::new(MemoryFleet::default());
    let (reconciler, _errors) = new_reconciler(store.clone(), fleet.clone());

    let outcome = reconciler.reconcile(test_spec("n1", "500m")).await?;

    assert_eq!(outcome, Outcome::Unchanged, "expected no-op, got {:?}", outcome);
    assert_eq!(store.creates.load(Ordering::SeqCst), 0, "expected no creates");
    assert_eq!(store.updates.load(Ordering::SeqCst), 0, "expected no updates");
    assert!(fleet.calls().is_empty(), "expected no fleet calls, got {:?}", fleet.calls());
    Ok(())
}

#[tokio::test]
async fn reconcile_changed_usage_updates_record_and_fleet() -> Result<()> {
    let store = Arc::new(MemoryRecordStore::with_records(vec![test_spec("n1", "500m")]));
    let fleet = Arc::new(MemoryFleet::default());
    let (reconciler, _errors) = new_reconciler(store.clone(), fleet.clone());

    let outcome = reconciler.reconcile(test_spec("n1", "1500m")).await?;

    assert_eq!(outcome, Outcome::Updated, "expected an update, got {:?}", outcome);
    let stored = store.record("n1").map(|record| record.spec.resources["cpu"].used.clone());
    assert_eq!(stored.as_deref(), Some("1500m"), "expected stored usage to be updated, got {:?}", stored);
    assert_eq!(fleet.updated(), vec!["n1".to_string()], "expected one UpdateNode call, got {:?}", fleet.calls());
    Ok(())
}

#[tokio::test]
async fn reconcile_gives_up_after_three_conflicting_updates() -> Result<()> {
    let store = Arc::new(MemoryRecordStore::with_records(vec![test_spec("n1", "500m")]));
    store.always_conflict.store(true, Ordering::SeqCst);
    let fleet = Arc::new(MemoryFleet::default());
    let (reconciler, _errors) = new_reconciler(store.clone(), fleet.clone());

    let res = reconciler.reconcile(test_spec("n1", "1500m")).await;

    let err = match res {
        Ok(outcome) => anyhow::bail!("expected reconcile to fail, got {:?}", outcome),
        Err(err) => err,
    };
    assert!(AppError::is_conflict(&err), "expected a conflict error, got {:#}", err);
    let updates = store.updates.load(Ordering::SeqCst);
    assert_eq!(updates, 3, "expected exactly 3 update attempts, got {}", updates);
    assert!(fleet.calls().is_empty(), "expected no fleet calls, got {:?}", fleet.calls());
    Ok(())
}

#[tokio::test]
async fn create_with_existing_record_registers_stored_data() -> Result<()> {
    let mut stored = test_spec("n1", "500m");
    stored.status = "Ready,SchedulingDisabled".into();
    let store = Arc::new(MemoryRecordStore::with_records(vec![stored]));
    let fleet = Arc::new(MemoryFleet::default());
    let (reconciler, _errors) = new_reconciler(store.clone(), fleet.clone());

    let outcome = reconciler.create(test_spec("n1", "900m")).await?;

    assert_eq!(outcome, Outcome::AlreadyPresent, "expected record to be found, got {:?}", outcome);
    assert_eq!(store.creates.load(Ordering::SeqCst), 0, "expected no local create");
    let calls = fleet.calls();
    let req = match calls.as_slice() {
        [FleetCall::Add(req)] => req,
        other => anyhow::bail!("expected a single AddNode call, got {:?}", other),
    };
    assert_eq!(req.node_status, "Ready,SchedulingDisabled", "expected stored status to be registered, got {}", req.node_status);
    assert_eq!(req.cluster_id, "test-cluster", "unexpected cluster id {}", req.cluster_id);
    let cpu = req.resources.iter().find(|res| res.resource_name == "cpu");
    let (capacity, unit) = cpu.map(|res| (res.capacity.as_str(), res.unit.as_str())).unwrap_or_default();
    assert_eq!((capacity, unit), ("4000", "m"), "expected unit suffix to be split out, got {:?}", cpu);
    Ok(())
}

#[tokio::test]
async fn fleet_failure_is_reported_without_rolling_back() -> Result<()> {
    let (store, fleet) = (Arc::new(MemoryRecordStore::default()), Arc::new(MemoryFleet::default()));
    fleet.fail.store(true, Ordering::SeqCst);
    let (reconciler, mut errors) = new_reconciler(store.clone(), fleet.clone());

    let outcome = reconciler.reconcile(test_spec("n1", "500m")).await?;

    assert_eq!(outcome, Outcome::Created, "expected create to succeed, got {:?}", outcome);
    assert!(store.record("n1").is_some(), "expected record to remain after fleet failure");
    let reported = errors.try_recv()?;
    assert_eq!(reported.source, "reconciler", "unexpected error source {}", reported.source);
    assert_eq!(reported.subject, "n1", "unexpected error subject {}", reported.subject);
    Ok(())
}

#[test]
fn needs_update_detects_replaced_resource_names() {
    let stored = test_spec("n1", "500m");
    let mut snapshot = stored.clone();
    assert!(!needs_update(&stored, &snapshot), "expected identical specs to match");

    snapshot.resources.clear();
    snapshot.resources.insert("memory".into(), ResourceInfo::default());
    assert!(needs_update(&stored, &snapshot), "expected a replaced resource name to require an update");

    let mut described = stored.clone();
    described.kernel_version = "6.1.0".into();
    assert!(!needs_update(&stored, &described), "expected descriptive fields alone not to require an update");
}

#[tokio::test]
async fn update_preserves_stored_metadata() -> Result<()> {
    let store = Arc::new(MemoryRecordStore::default());
    let mut record = NodeResourceInfo::from_spec(test_spec("n1", "500m"));
    record.metadata.labels = Some(btreemap! {"team".to_string() => "infra".to_string()});
    record.metadata.annotations = Some(btreemap! {"note".to_string() => "keep".to_string()});
    record.metadata.finalizers = Some(vec!["opsflow.io/cleanup".into()]);
    store.insert_record(record);
    let fleet = Arc::new(MemoryFleet::default());
    let (reconciler, _errors) = new_reconciler(store.clone(), fleet.clone());

    let outcome = reconciler.reconcile(test_spec("n1", "1500m")).await?;

    assert_eq!(outcome, Outcome::Updated, "expected an update, got {:?}", outcome);
    let stored = store.record("n1").context("expected n1 to be stored")?;
    let team = stored.metadata.labels.as_ref().and_then(|labels| labels.get("team"));
    assert_eq!(team.map(String::as_str), Some("infra"), "expected stored labels to survive the update, got {:?}", stored.metadata.labels);
    let note = stored.metadata.annotations.as_ref().and_then(|annotations| annotations.get("note"));
    assert_eq!(note.map(String::as_str), Some("keep"), "expected stored annotations to survive the update, got {:?}", stored.metadata.annotations);
    assert_eq!(
        stored.metadata.finalizers,
        Some(vec!["opsflow.io/cleanup".to_string()]),
        "expected stored finalizers to survive the update, got {:?}",
        stored.metadata.finalizers
    );
    let used = &stored.spec.resources["cpu"].used;
    assert_eq!(used, "1500m", "expected the new usage to be written, got {}", used);
    Ok(())
}
