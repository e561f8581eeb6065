//! MT scheduler broker binary.

use anyhow::{bail, Result};
use clap::Parser;
use tracing::error;

use smsgate::cli::SchedulerArgs;
use smsgate::config::SchedulerConfig;
use smsgate::lock::PidLock;
use smsgate::{daemon, defaults, logging, scheduler};

fn main() -> Result<()> {
    let args = SchedulerArgs::parse();

    let config = SchedulerConfig::load(&args.config)?;

    // Detach before anything owns threads or file descriptors we care about.
    if args.daemon {
        daemon::daemonize()?;
    }

    let _log_guard = logging::init(&config.log_file, config.debug, args.quiet || args.daemon)?;

    let _lock = match PidLock::acquire(defaults::SCHEDULER_LOCK_FILE) {
        Ok(lock) => lock,
        Err(e) => {
            error!("already started, please do not repeat the start ({e})");
            bail!(e);
        }
    };

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    let outcome = runtime.block_on(scheduler::run(config));
    if let Err(ref e) = outcome {
        error!("scheduler exited with error: {e:#}");
    }
    outcome
}
