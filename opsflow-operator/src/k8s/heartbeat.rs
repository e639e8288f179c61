//! Fleet heartbeats & self-healing.
//!
//! The fleet service is asked about every stored record. Nodes it does not know are registered
//! again from the stored record; the fleet's view is never used to change the records.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;

use crate::error::JoinedError;
use crate::fleet::{Fleet, CODE_NOT_FOUND};
use crate::k8s::store::list_all_names;
use crate::k8s::{Reconciler, RecordStore};
use crate::metrics::METRIC_SELF_HEALS;
use crate::scheduler::Job;
use crate::utils::run_bounded;

/// Sends heartbeats for all stored records, re-registering nodes unknown to the fleet service.
pub struct HeartbeatSynchronizer {
    store: Arc<dyn RecordStore>,
    fleet: Fleet,
    reconciler: Arc<Reconciler>,
    page_size: u32,
    parallelism: i64,
}

impl HeartbeatSynchronizer {
    /// Create a new instance.
    pub fn new(store: Arc<dyn RecordStore>, fleet: Fleet, reconciler: Arc<Reconciler>, page_size: u32, parallelism: i64) -> Self {
        Self {
            store,
            fleet,
            reconciler,
            page_size,
            parallelism,
        }
    }

    /// Send a heartbeat for every stored record.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn beat(&self) -> Result<()> {
        let names = list_all_names(&*self.store, self.page_size).await?;
        let tasks = names.into_iter().map(|name| {
            let (store, fleet, reconciler) = (self.store.clone(), self.fleet.clone(), self.reconciler.clone());
            async move {
                let code = fleet.heartbeat(&name).await.with_context(|| format!("error sending heartbeat for {}", name))?;
                if code != CODE_NOT_FOUND {
                    return Ok(());
                }
                let record = match store.get(&name).await.context("error fetching NodeResourceInfo")? {
                    Some(record) => record,
                    // Deleted since listing, nothing to heal.
                    None => return Ok(()),
                };
                metrics::counter!(METRIC_SELF_HEALS).increment(1);
                tracing::info!(node = %name, "node unknown to fleet service, registering again");
                reconciler.create(record.spec).await.map(|_| ())
            }
        });
        JoinedError::from_results(run_bounded(self.parallelism, tasks).await)
    }
}

#[async_trait]
impl Job for HeartbeatSynchronizer {
    async fn run(&self) -> Result<()> {
        self.beat().await
    }
}
