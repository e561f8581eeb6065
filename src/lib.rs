//! # smsgate
//!
//! Core dispatch fabric of an SMS gateway platform. Two broker services
//! mediate between customer clients and carrier gateway links:
//!
//! - the **scheduler** accepts submitted short messages (MT), routes each to
//!   a carrier gateway queue according to the submitter's channel set, and
//!   lets gateway workers pull queued messages for transmission;
//! - the **mo broker** accepts delivery receipts and mobile-originated
//!   messages from gateway workers and lets customer clients pull the items
//!   addressed to them.
//!
//! Both share one pattern: a control endpoint takes handshake requests,
//! spawns a per-session worker on a dynamically scanned port, and the
//! workers move items through a shared in-memory queue pool. Everything is
//! volatile — queues live and die with the process.

pub mod cli;
pub mod config;
pub mod daemon;
pub mod db;
pub mod lock;
pub mod logging;
pub mod mo;
pub mod net;
pub mod pool;
pub mod proto;
pub mod routing;
pub mod scheduler;
pub mod session;
pub mod stats;

pub use config::{MoConfig, SchedulerConfig};
pub use mo::MoContext;
pub use pool::{Queue, QueueItem, QueuePool};
pub use proto::{Command, Deliver, Frame, Report, SessionKind, SessionRequest, Submit};
pub use routing::{Channel, OperatorSet};
pub use scheduler::SchedulerContext;

/// Crate version, surfaced by the binaries' `--version`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Fabric-wide constants.
pub mod defaults {
    use std::time::Duration;

    /// Backpressure threshold: a gateway queue at this depth stops
    /// accepting routed submissions.
    pub const QUEUE_DEPTH_LIMIT: usize = 128;

    /// How long the control loop waits for a session worker to bind its
    /// port before suppressing the handshake reply.
    pub const HANDSHAKE_DEADLINE: Duration = Duration::from_secs(3);

    /// Queue-depth sampling period.
    pub const STATS_INTERVAL: Duration = Duration::from_secs(3);

    /// Buffered frames per endpoint between the reader tasks and the
    /// session loop.
    pub const FRAME_CHANNEL_DEPTH: usize = 1000;

    /// Scheduler instance lock.
    pub const SCHEDULER_LOCK_FILE: &str = "/tmp/scheduler.lock";

    /// MO broker instance lock.
    pub const MO_LOCK_FILE: &str = "/tmp/mo.lock";
}
