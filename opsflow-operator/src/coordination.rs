//! Cross-instance coordination built around Redis.
//!
//! Redis serves two purposes here: the task queue (a list consumed with `BLPOP`) and job locks.
//! A job lock is a key set with `SET NX PX`, owned by the instance which set it. The owner
//! renews the key's TTL at half the TTL interval while the job runs, and deletes it once the job
//! returns. An owner which dies simply lets the key expire.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, timeout, Instant};

/// The prefix of all job lock keys.
const LOCK_KEY_PREFIX: &str = "job_lock:";
/// The timeout used for non-blocking Redis commands.
const COMMAND_TIMEOUT: Duration = Duration::from_secs(5);

/// The Redis primitives used by the operator.
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// Set the key if it does not exist, returning `true` if it was set.
    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool>;

    /// Reset the TTL of the key, returning `false` if the key does not exist.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool>;

    /// Delete the key.
    async fn del(&self, key: &str) -> Result<()>;

    /// Append a value to the tail of the given list.
    async fn rpush(&self, list: &str, value: &str) -> Result<()>;

    /// Pop a value from the head of the given list, waiting indefinitely for one to arrive.
    async fn blpop(&self, list: &str) -> Result<String>;
}

/// A `CoordinationStore` backed by Redis.
pub struct RedisCoordinator {
    client: redis::Client,
    /// The connection shared by all non-blocking commands.
    conn: MultiplexedConnection,
    /// Idle connections reserved for blocking pops.
    ///
    /// A blocking command stalls every other command of its connection, so each pop takes a
    /// connection of its own. A pop which is cancelled drops its connection.
    blocking: Mutex<Vec<MultiplexedConnection>>,
}

impl RedisCoordinator {
    /// Connect to the given Redis URL, verifying connectivity with `PING`.
    pub async fn new(url: &str) -> Result<Self> {
        let client = redis::Client::open(url).context("invalid redis url")?;
        let mut conn = timeout(COMMAND_TIMEOUT, client.get_multiplexed_tokio_connection())
            .await
            .context("timeout connecting to redis")?
            .context("error connecting to redis")?;
        let _pong: String = timeout(COMMAND_TIMEOUT, redis::cmd("PING").query_async(&mut conn))
            .await
            .context("timeout pinging redis")?
            .context("error pinging redis")?;
        Ok(Self {
            client,
            conn,
            blocking: Mutex::new(vec![]),
        })
    }

    async fn blocking_conn(&self) -> Result<MultiplexedConnection> {
        let idle = self.blocking.lock().ok().and_then(|mut idle| idle.pop());
        match idle {
            Some(conn) => Ok(conn),
            None => self.client.get_multiplexed_tokio_connection().await.context("error opening redis connection for blocking pop"),
        }
    }
}

#[async_trait]
impl CoordinationStore for RedisCoordinator {
    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.conn.clone();
        let cmd = redis::cmd("SET").arg(key).arg(value).arg("NX").arg("PX").arg(ttl.as_millis() as u64).to_owned();
        let res: Option<String> = timeout(COMMAND_TIMEOUT, cmd.query_async(&mut conn))
            .await
            .context("timeout setting redis key")?
            .context("error setting redis key")?;
        Ok(res.is_some())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.conn.clone();
        let cmd = redis::cmd("PEXPIRE").arg(key).arg(ttl.as_millis() as u64).to_owned();
        let res: i64 = timeout(COMMAND_TIMEOUT, cmd.query_async(&mut conn))
            .await
            .context("timeout renewing redis key ttl")?
            .context("error renewing redis key ttl")?;
        Ok(res == 1)
    }

    async fn del(&self, key: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let cmd = redis::cmd("DEL").arg(key).to_owned();
        let _: i64 = timeout(COMMAND_TIMEOUT, cmd.query_async(&mut conn))
            .await
            .context("timeout deleting redis key")?
            .context("error deleting redis key")?;
        Ok(())
    }

    async fn rpush(&self, list: &str, value: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let cmd = redis::cmd("RPUSH").arg(list).arg(value).to_owned();
        let _: i64 = timeout(COMMAND_TIMEOUT, cmd.query_async(&mut conn))
            .await
            .context("timeout pushing to redis list")?
            .context("error pushing to redis list")?;
        Ok(())
    }

    async fn blpop(&self, list: &str) -> Result<String> {
        let mut conn = self.blocking_conn().await?;
        loop {
            let res: Option<(String, String)> = redis::cmd("BLPOP").arg(list).arg(0).query_async(&mut conn).await.context("error popping from redis list")?;
            if let Some((_, value)) = res {
                if let Ok(mut idle) = self.blocking.lock() {
                    idle.push(conn);
                }
                return Ok(value);
            }
        }
    }
}

/// Exclusive, renewable locks guarding job runs across instances.
pub struct DistributedLock {
    store: Arc<dyn CoordinationStore>,
    /// The identity of this instance, stored as the lock value.
    owner: String,
    ttl: Duration,
}

impl DistributedLock {
    /// Create a new instance.
    pub fn new(store: Arc<dyn CoordinationStore>, owner: String, ttl: Duration) -> Self {
        Self { store, owner, ttl }
    }

    /// The lock key of the given job.
    pub fn key(job: &str) -> String {
        format!("{}{}", LOCK_KEY_PREFIX, job)
    }

    /// Attempt to acquire the lock of the given job, `None` if it is held elsewhere.
    ///
    /// While the returned guard is alive the lock's TTL is renewed in the background.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn try_acquire(&self, job: &str) -> Result<Option<LockGuard>> {
        let key = Self::key(job);
        if !self.store.set_nx(&key, &self.owner, self.ttl).await.context("error acquiring job lock")? {
            return Ok(None);
        }
        let (stop_tx, stop_rx) = oneshot::channel();
        let renewal = tokio::spawn(Self::renew(self.store.clone(), key.clone(), self.ttl, stop_rx));
        Ok(Some(LockGuard {
            store: self.store.clone(),
            key,
            stop_tx: Some(stop_tx),
            renewal: Some(renewal),
        }))
    }

    /// Renew the lock's TTL at half the TTL interval until stopped.
    async fn renew(store: Arc<dyn CoordinationStore>, key: String, ttl: Duration, mut stop: oneshot::Receiver<()>) {
        let period = (ttl / 2).max(Duration::from_millis(1));
        let mut ticker = interval_at(Instant::now() + period, period);
        loop {
            tokio::select! {
                _ = ticker.tick() => match store.expire(&key, ttl).await {
                    Ok(true) => tracing::debug!(key = %key, "job lock renewed"),
                    Ok(false) => tracing::warn!(key = %key, "job lock expired before renewal"),
                    Err(err) => tracing::error!(error = ?err, key = %key, "error renewing job lock"),
                },
                _ = &mut stop => break,
            }
        }
    }
}

/// A held job lock.
///
/// Dropping the guard without calling `release` stops renewal and leaves the key to expire.
pub struct LockGuard {
    store: Arc<dyn CoordinationStore>,
    key: String,
    stop_tx: Option<oneshot::Sender<()>>,
    renewal: Option<JoinHandle<()>>,
}

impl LockGuard {
    /// Stop renewal & delete the lock key.
    pub async fn release(mut self) -> Result<()> {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(renewal) = self.renewal.take() {
            if let Err(err) = renewal.await {
                tracing::error!(error = ?err, key = %self.key, "error joining job lock renewal task");
            }
        }
        self.store.del(&self.key).await.context("error releasing job lock")
    }
}
