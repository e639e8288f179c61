use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use futures::stream::StreamExt;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::{BroadcastStream, SignalStream};
use tokio_stream::StreamMap;

use crate::config::Config;
use crate::coordination::{CoordinationStore, DistributedLock, RedisCoordinator};
use crate::fleet::{Fleet, GrpcFleetClient};
use crate::k8s::{ClusterView, GarbageCollector, HeartbeatSynchronizer, KubeCluster, KubeRecordStore, Reconciler, RecordStore, RetryPolicy, SnapshotBuilder};
use crate::queue::{HandlerTable, NodeBatchHandler, NodeEnumerator, TaskKind, WorkerPool};
use crate::reporter::{spawn_error_logger, ErrorReporter};
use crate::scheduler::{JobConfig, Scheduler};

/// The name of the node enumeration job.
const JOB_SYNC: &str = "add_update_node_info";
/// The name of the garbage collection job.
const JOB_GC: &str = "del_node_info";
/// The name of the fleet heartbeat job.
const JOB_HEARTBEAT: &str = "node_heartbeat";

/// The application object of the operator.
pub struct App {
    /// A channel used for triggering graceful shutdown.
    shutdown_tx: broadcast::Sender<()>,
    /// A channel used for triggering graceful shutdown.
    shutdown_rx: BroadcastStream<()>,

    /// The join handle of the queue worker pool.
    workers: JoinHandle<Result<()>>,
    /// The join handle of the job scheduler.
    scheduler: JoinHandle<Result<()>>,
    /// The join handle of the error logger.
    error_logger: JoinHandle<()>,
}

impl App {
    /// Create a new instance.
    pub async fn new(config: Arc<Config>) -> Result<Self> {
        // App shutdown channel.
        let (shutdown_tx, shutdown_rx) = broadcast::channel(10);

        // Initialize K8s client & establish the cluster's identity.
        let client = kube::Client::try_default().await.context("error initializing K8s client")?;
        let kube_cluster = KubeCluster::new(client.clone());
        let cluster_id = match &config.cluster_id {
            Some(id) => id.clone(),
            None => kube_cluster.cluster_uid().await.context("error discovering cluster ID")?,
        };
        let cluster: Arc<dyn ClusterView> = Arc::new(kube_cluster);
        let store: Arc<dyn RecordStore> = Arc::new(KubeRecordStore::new(client));

        // Initialize external collaborators.
        let coordination: Arc<dyn CoordinationStore> = Arc::new(RedisCoordinator::new(&config.redis_url).await.context("error connecting to redis")?);
        let fleet_client = GrpcFleetClient::new(&config.fleet_endpoint, config.rpc_timeout()).context("error building fleet client")?;
        let fleet = Fleet::new(Arc::new(fleet_client), cluster_id.clone());
        let (reporter, reported) = ErrorReporter::new();
        let error_logger = spawn_error_logger(reported);

        // Build the reconciliation pipeline.
        let retry = RetryPolicy {
            attempts: config.retry_attempts,
            delay: config.retry_delay(),
        };
        let reconciler = Arc::new(Reconciler::new(store.clone(), fleet.clone(), retry, reporter.clone()));
        let gc = Arc::new(GarbageCollector::new(
            store.clone(),
            cluster.clone(),
            fleet.clone(),
            reporter.clone(),
            config.record_page_size,
            config.parallelism,
        ));
        let heartbeat = Arc::new(HeartbeatSynchronizer::new(store, fleet, reconciler.clone(), config.record_page_size, config.parallelism));
        let snapshots = SnapshotBuilder::new(cluster.clone(), config.tracked_resources.clone());
        let node_batches = NodeBatchHandler::new(cluster.clone(), snapshots, reconciler, gc.clone(), config.parallelism);

        // Spawn various core tasks.
        let handlers = HandlerTable::default().register(TaskKind::NodeBatch, Arc::new(node_batches));
        let workers = WorkerPool::new(
            coordination.clone(),
            config.queue_name.clone(),
            handlers,
            reporter.clone(),
            config.worker_count,
            shutdown_tx.clone(),
        )
        .spawn();

        let enumerator = NodeEnumerator::new(cluster, coordination.clone(), config.queue_name.clone(), config.node_page_size);
        let lock = Arc::new(DistributedLock::new(coordination, config.pod_name.clone(), config.lock_ttl()));
        let jobs = vec![
            JobConfig::new(JOB_SYNC, Duration::from_secs(config.sync_period_seconds), true, Arc::new(enumerator)),
            JobConfig::new(JOB_GC, Duration::from_secs(config.gc_period_seconds), true, gc),
            JobConfig::new(JOB_HEARTBEAT, Duration::from_secs(config.heartbeat_period_seconds), true, heartbeat),
        ];
        let scheduler = Scheduler::new(jobs, lock, reporter, shutdown_tx.clone()).spawn();

        tracing::info!(cluster_id = %cluster_id, workers = config.worker_count, "operator components started");
        Ok(Self {
            shutdown_rx: BroadcastStream::new(shutdown_rx),
            shutdown_tx,
            workers,
            scheduler,
            error_logger,
        })
    }

    pub fn spawn(self) -> JoinHandle<Result<()>> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) -> Result<()> {
        let mut signals = StreamMap::new();
        signals.insert("sigterm", SignalStream::new(signal(SignalKind::terminate()).context("error building signal stream")?));
        signals.insert("sigint", SignalStream::new(signal(SignalKind::interrupt()).context("error building signal stream")?));

        loop {
            tokio::select! {
                Some((_, sig)) = signals.next() => {
                    tracing::debug!(signal = ?sig, "signal received, beginning graceful shutdown");
                    let _ = self.shutdown_tx.send(());
                    break;
                }
                _ = self.shutdown_rx.next() => break,
            }
        }

        // Begin shutdown routine.
        tracing::debug!("OpsFlow Operator is shutting down");
        if let Err(err) = self.workers.await.context("error joining worker pool handle").and_then(|res| res) {
            tracing::error!(error = ?err, "error shutting down worker pool");
        }
        if let Err(err) = self.scheduler.await.context("error joining scheduler handle").and_then(|res| res) {
            tracing::error!(error = ?err, "error shutting down scheduler");
        }
        // Completes once every component holding a reporter has stopped.
        if let Err(err) = self.error_logger.await {
            tracing::error!(error = ?err, "error joining error logger task");
        }

        tracing::debug!("OpsFlow Operator shutdown complete");
        Ok(())
    }
}
