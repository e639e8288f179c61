//! Reconciliation of NodeResourceInfo records against live node snapshots.
//!
//! A record is only written when its status or resource accounting has changed. Updates carry the
//! resource version of the read which preceded them; when another writer got there first the
//! compare-and-write is retried from a fresh read, a bounded number of times.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::error::AppError;
use crate::fleet::Fleet;
use crate::k8s::RecordStore;
use crate::metrics::{METRIC_RECORDS_CREATED, METRIC_RECORDS_UPDATED, METRIC_UPDATE_CONFLICTS};
use crate::reporter::ErrorReporter;
use opsflow_core::crd::{NodeResourceInfo, NodeResourceInfoSpec};

const REPORT_SOURCE: &str = "reconciler";

/// The retry policy applied to conflicting updates.
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    /// The maximum number of update attempts.
    pub attempts: u32,
    /// The delay between attempts.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay: Duration::from_secs(1),
        }
    }
}

/// The result of a reconciliation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// The record did not exist and was created.
    Created,
    /// The record was found to exist when creation was attempted.
    AlreadyPresent,
    /// The record was updated.
    Updated,
    /// The record already matched the snapshot.
    Unchanged,
}

/// The phases of a single reconciliation.
enum Phase {
    /// Read the stored record.
    Fetch,
    /// Compare the stored record with the snapshot, writing if needed.
    CompareAndWrite(Box<NodeResourceInfo>),
    /// An update lost a race with another writer.
    ConflictRetry(anyhow::Error),
    Done(Outcome),
}

/// Reconciles records with live snapshots & mirrors changes to the fleet service.
pub struct Reconciler {
    store: Arc<dyn RecordStore>,
    fleet: Fleet,
    retry: RetryPolicy,
    reporter: ErrorReporter,
}

impl Reconciler {
    /// Create a new instance.
    pub fn new(store: Arc<dyn RecordStore>, fleet: Fleet, retry: RetryPolicy, reporter: ErrorReporter) -> Self {
        Self { store, fleet, retry, reporter }
    }

    /// Bring the stored record of the snapshot's node in line with the snapshot.
    #[tracing::instrument(level = "debug", skip(self, snapshot), fields(node = %snapshot.node_name))]
    pub async fn reconcile(&self, snapshot: NodeResourceInfoSpec) -> Result<Outcome> {
        let name = snapshot.node_name.clone();
        let (mut phase, mut attempts) = (Phase::Fetch, 0);
        loop {
            phase = match phase {
                Phase::Fetch => match self.store.get(&name).await.context("error fetching NodeResourceInfo")? {
                    Some(existing) => Phase::CompareAndWrite(Box::new(existing)),
                    None => return self.create(snapshot).await,
                },
                Phase::CompareAndWrite(existing) => {
                    if !needs_update(&existing.spec, &snapshot) {
                        tracing::debug!("NodeResourceInfo unchanged, no update needed");
                        Phase::Done(Outcome::Unchanged)
                    } else {
                        let version = existing
                            .metadata
                            .resource_version
                            .as_deref()
                            .with_context(|| format!("stored NodeResourceInfo {} has no resource version", name))?;
                        attempts += 1;
                        // Only the spec is replaced, the stored metadata is carried over.
                        let mut desired = (*existing).clone();
                        desired.spec = snapshot.clone();
                        match self.store.update(&desired, version).await {
                            Ok(_) => {
                                metrics::counter!(METRIC_RECORDS_UPDATED).increment(1);
                                tracing::debug!("NodeResourceInfo updated");
                                if let Err(err) = self.fleet.update_node(&snapshot).await {
                                    self.reporter.report(REPORT_SOURCE, &name, &err);
                                }
                                Phase::Done(Outcome::Updated)
                            }
                            Err(err) if AppError::is_conflict(&err) => Phase::ConflictRetry(err),
                            Err(err) => return Err(err.context(format!("error updating NodeResourceInfo {}", name))),
                        }
                    }
                }
                Phase::ConflictRetry(err) => {
                    metrics::counter!(METRIC_UPDATE_CONFLICTS).increment(1);
                    if attempts >= self.retry.attempts {
                        return Err(err.context(format!("giving up updating NodeResourceInfo {} after {} attempts", name, attempts)));
                    }
                    tracing::debug!(attempts, max = self.retry.attempts, "conflict updating NodeResourceInfo, retrying");
                    tokio::time::sleep(self.retry.delay).await;
                    Phase::Fetch
                }
                Phase::Done(outcome) => return Ok(outcome),
            };
        }
    }

    /// Ensure a record exists for the snapshot's node & register the node with the fleet service.
    ///
    /// When the record already exists it is left untouched, and the fleet service is given the
    /// stored record's data.
    #[tracing::instrument(level = "debug", skip(self, snapshot), fields(node = %snapshot.node_name))]
    pub async fn create(&self, snapshot: NodeResourceInfoSpec) -> Result<Outcome> {
        let name = snapshot.node_name.clone();
        let (registered, outcome) = match self.store.get(&name).await.context("error fetching NodeResourceInfo")? {
            Some(existing) => {
                tracing::debug!("NodeResourceInfo already exists, skipping creation");
                (existing.spec, Outcome::AlreadyPresent)
            }
            None => match self.store.create(&NodeResourceInfo::from_spec(snapshot.clone())).await {
                Ok(_) => {
                    metrics::counter!(METRIC_RECORDS_CREATED).increment(1);
                    tracing::debug!("NodeResourceInfo created");
                    (snapshot, Outcome::Created)
                }
                Err(err) if AppError::is_already_exists(&err) => {
                    tracing::debug!("NodeResourceInfo created concurrently");
                    (snapshot, Outcome::AlreadyPresent)
                }
                Err(err) => return Err(err.context(format!("error creating NodeResourceInfo {}", name))),
            },
        };
        if let Err(err) = self.fleet.add_node(&registered).await {
            self.reporter.report(REPORT_SOURCE, &name, &err);
        }
        Ok(outcome)
    }
}

/// Check if the stored spec differs from the snapshot in status or resource accounting.
pub fn needs_update(stored: &NodeResourceInfoSpec, snapshot: &NodeResourceInfoSpec) -> bool {
    if stored.status != snapshot.status || stored.resources.len() != snapshot.resources.len() {
        return true;
    }
    snapshot.resources.iter().any(|(name, info)| stored.resources.get(name) != Some(info))
}
