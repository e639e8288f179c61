//! Runtime configuration.

use std::time::Duration;

use anyhow::{ensure, Context, Result};
use serde::Deserialize;

/// Runtime configuration data.
#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    /// The server's logging config, which uses Rust's `env_logger` directives.
    pub rust_log: String,
    /// The name of the pod on which this instance is running.
    ///
    /// This is used as the owner value of any job locks held by this instance.
    pub pod_name: String,

    /// The URL of the Redis server used for job locks & the task queue.
    pub redis_url: String,
    /// The gRPC endpoint of the fleet management service.
    pub fleet_endpoint: String,
    /// The timeout applied to each fleet call, in milliseconds.
    #[serde(default = "Config::default_rpc_timeout_millis")]
    pub rpc_timeout_millis: u64,
    /// The cluster identifier reported to the fleet service.
    ///
    /// Defaults to the UID of the `kube-system` namespace.
    #[serde(default)]
    pub cluster_id: Option<String>,

    /// The name of the Redis list used as the task queue.
    #[serde(default = "Config::default_queue_name")]
    pub queue_name: String,
    /// The number of queue workers to spawn.
    #[serde(default = "Config::default_worker_count")]
    pub worker_count: usize,
    /// The resource names tracked on each node, comma separated.
    #[serde(default = "Config::default_tracked_resources")]
    pub tracked_resources: Vec<String>,
    /// The page size used when enumerating live nodes.
    #[serde(default = "Config::default_page_size")]
    pub node_page_size: u32,
    /// The page size used when listing stored records.
    #[serde(default = "Config::default_page_size")]
    pub record_page_size: u32,
    /// The bound on concurrent per-node operations; values `<= 0` disable the bound.
    #[serde(default = "Config::default_parallelism")]
    pub parallelism: i64,

    /// The TTL of job locks in seconds, renewed at half this interval while a job runs.
    #[serde(default = "Config::default_lock_ttl_seconds")]
    pub lock_ttl_seconds: u64,
    /// The period of the node enumeration job.
    #[serde(default = "Config::default_sync_period_seconds")]
    pub sync_period_seconds: u64,
    /// The period of the garbage collection job.
    #[serde(default = "Config::default_gc_period_seconds")]
    pub gc_period_seconds: u64,
    /// The period of the fleet heartbeat job.
    #[serde(default = "Config::default_heartbeat_period_seconds")]
    pub heartbeat_period_seconds: u64,

    /// The number of update attempts made for a record before giving up on a conflict.
    #[serde(default = "Config::default_retry_attempts")]
    pub retry_attempts: u32,
    /// The delay between update attempts, in milliseconds.
    #[serde(default = "Config::default_retry_delay_millis")]
    pub retry_delay_millis: u64,

    /// The port of the Prometheus metrics endpoint.
    #[serde(default = "Config::default_metrics_port")]
    pub metrics_port: u16,
}

impl Config {
    /// Create a new config instance.
    ///
    /// Currently this routing just parses the runtime environment and builds the application
    /// config from that.
    #[allow(clippy::new_without_default)]
    pub fn new() -> Result<Self> {
        let config: Self = envy::from_env().context("error building config from env")?;
        config.validated().context("invalid config")
    }

    /// Check the values which the operator can not run with.
    pub fn validated(self) -> Result<Self> {
        ensure!(self.worker_count > 0, "WORKER_COUNT must be greater than 0");
        ensure!(self.node_page_size > 0, "NODE_PAGE_SIZE must be greater than 0");
        ensure!(self.record_page_size > 0, "RECORD_PAGE_SIZE must be greater than 0");
        ensure!(self.lock_ttl_seconds > 0, "LOCK_TTL_SECONDS must be greater than 0");
        ensure!(self.sync_period_seconds > 0, "SYNC_PERIOD_SECONDS must be greater than 0");
        ensure!(self.gc_period_seconds > 0, "GC_PERIOD_SECONDS must be greater than 0");
        ensure!(self.heartbeat_period_seconds > 0, "HEARTBEAT_PERIOD_SECONDS must be greater than 0");
        ensure!(self.retry_attempts > 0, "RETRY_ATTEMPTS must be greater than 0");
        ensure!(!self.tracked_resources.is_empty(), "TRACKED_RESOURCES must name at least one resource");
        Ok(self)
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_millis)
    }

    pub fn lock_ttl(&self) -> Duration {
        Duration::from_secs(self.lock_ttl_seconds)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_millis)
    }

    fn default_rpc_timeout_millis() -> u64 {
        1_000
    }

    fn default_queue_name() -> String {
        "task_queue".into()
    }

    fn default_worker_count() -> usize {
        3
    }

    fn default_parallelism() -> i64 {
        3
    }

    fn default_tracked_resources() -> Vec<String> {
        vec!["cpu".into(), "memory".into(), "nvidia.com/gpu".into()]
    }

    fn default_page_size() -> u32 {
        50
    }

    fn default_lock_ttl_seconds() -> u64 {
        60
    }

    fn default_sync_period_seconds() -> u64 {
        30
    }

    fn default_gc_period_seconds() -> u64 {
        40
    }

    fn default_heartbeat_period_seconds() -> u64 {
        60
    }

    fn default_retry_attempts() -> u32 {
        3
    }

    fn default_retry_delay_millis() -> u64 {
        1_000
    }

    fn default_metrics_port() -> u16 {
        9090
    }
}
