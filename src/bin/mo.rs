//! MO broker binary.

use anyhow::{bail, Result};
use clap::Parser;
use tracing::error;

use smsgate::cli::MoArgs;
use smsgate::config::MoConfig;
use smsgate::lock::PidLock;
use smsgate::{daemon, defaults, logging, mo};

fn main() -> Result<()> {
    let args = MoArgs::parse();

    let config = MoConfig::load(&args.config)?;

    if args.daemon {
        daemon::daemonize()?;
    }

    let _log_guard = logging::init(&config.log_file, config.debug, args.quiet || args.daemon)?;

    let _lock = match PidLock::acquire(defaults::MO_LOCK_FILE) {
        Ok(lock) => lock,
        Err(e) => {
            error!("already started, please do not repeat the start ({e})");
            bail!(e);
        }
    };

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    let outcome = runtime.block_on(mo::run(config));
    if let Err(ref e) = outcome {
        error!("mo broker exited with error: {e:#}");
    }
    outcome
}
