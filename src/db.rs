//! Routing-channel storage for the scheduler.
//!
//! Channel descriptors live in the platform database and are loaded once at
//! producer-session start, in table order (that order is the routing
//! tie-break). The lookup sits behind [`ChannelSource`] so the dispatch path
//! never knows whether descriptors came from Postgres or a test fixture.

use anyhow::Result;
use async_trait::async_trait;
use tokio_postgres::NoTls;
use tracing::error;

use crate::config::SchedulerConfig;
use crate::routing::{Channel, OperatorSet};

/// Where a producer session's channel list comes from.
#[async_trait]
pub trait ChannelSource: Send + Sync {
    /// The ordered channel list configured for `account`. An account with
    /// no rows gets an empty list (which routes as `NOROUTE`).
    async fn channels_for(&self, account: u32) -> Result<Vec<Channel>>;
}

/// Channel source backed by the platform's Postgres database.
pub struct PgChannelSource {
    client: tokio_postgres::Client,
}

impl PgChannelSource {
    /// Connect using the scheduler configuration. The connection driver is
    /// spawned onto the runtime; a dropped connection surfaces as query
    /// errors on the affected sessions, not as a broker crash.
    pub async fn connect(config: &SchedulerConfig) -> Result<Self> {
        let mut pg = tokio_postgres::Config::new();
        pg.host(&config.db_host)
            .port(config.db_port)
            .user(&config.db_user)
            .password(&config.db_password)
            .dbname(&config.db_name);

        let (client, connection) = pg.connect(NoTls).await?;
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!("database connection error: {e}");
            }
        });

        Ok(Self { client })
    }
}

#[async_trait]
impl ChannelSource for PgChannelSource {
    async fn channels_for(&self, account: u32) -> Result<Vec<Channel>> {
        let rows = self
            .client
            .query(
                "SELECT id, acc, weight, operator, province \
                 FROM channels WHERE acc = $1 ORDER BY id",
                &[&(account as i32)],
            )
            .await?;

        Ok(rows
            .iter()
            .map(|row| Channel {
                id: row.get::<_, i32>(0) as u32,
                acc: row.get::<_, i32>(1) as u32,
                weight: row.get::<_, i32>(2) as u32,
                operator: OperatorSet::from_bits_truncate(row.get::<_, i32>(3) as u32),
                province: row.get::<_, i32>(4) as u32,
            })
            .collect())
    }
}
