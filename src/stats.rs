//! Queue-depth sampling.
//!
//! Every broker runs one sampler task that walks the queue pool every three
//! seconds and hands each queue's depth to a [`StatSink`]. The mo-broker
//! publishes depths into the Redis hash `mo.queue` (clearing stale state
//! from a previous run first); the scheduler only logs them.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use tracing::{debug, warn};

use crate::config::MoConfig;
use crate::defaults;
use crate::pool::QueuePool;

/// Receiver of periodic queue-depth samples.
#[async_trait]
pub trait StatSink: Send + Sync {
    /// Called once before the first sample to clear state left over from a
    /// previous process.
    async fn reset(&self) -> Result<()> {
        Ok(())
    }

    async fn record(&self, queue: u32, depth: usize) -> Result<()>;
}

/// Debug-log sink used by the scheduler.
pub struct LogStatSink;

#[async_trait]
impl StatSink for LogStatSink {
    async fn record(&self, queue: u32, depth: usize) -> Result<()> {
        debug!("queue: {queue}, len: {depth}");
        Ok(())
    }
}

/// Redis-backed sink used by the mo-broker.
pub struct RedisStatSink {
    connection: ConnectionManager,
}

impl RedisStatSink {
    const HASH_KEY: &'static str = "mo.queue";

    pub async fn connect(config: &MoConfig) -> Result<Self> {
        let client = redis::Client::open(config.redis_url())?;
        let connection = client.get_connection_manager().await?;
        Ok(Self { connection })
    }
}

#[async_trait]
impl StatSink for RedisStatSink {
    async fn reset(&self) -> Result<()> {
        let mut connection = self.connection.clone();
        let _: () = redis::cmd("DEL")
            .arg(Self::HASH_KEY)
            .query_async(&mut connection)
            .await?;
        Ok(())
    }

    async fn record(&self, queue: u32, depth: usize) -> Result<()> {
        let mut connection = self.connection.clone();
        let _: () = redis::cmd("HSET")
            .arg(Self::HASH_KEY)
            .arg(queue)
            .arg(depth as u64)
            .query_async(&mut connection)
            .await?;
        Ok(())
    }
}

/// Sampler task body: reset once, then publish every pool queue's depth on
/// each tick. Sink failures are logged and retried on the next tick; the
/// sampler itself never exits.
pub async fn sample_loop(pool: Arc<QueuePool>, sink: Arc<dyn StatSink>) {
    if let Err(e) = sink.reset().await {
        warn!("stats reset failed: {e}");
    }

    let mut tick = tokio::time::interval(defaults::STATS_INTERVAL);
    loop {
        tick.tick().await;
        for queue in pool.snapshot() {
            if let Err(e) = sink.record(queue.id(), queue.len()).await {
                warn!("stats update for queue {} failed: {e}", queue.id());
            }
        }
    }
}
