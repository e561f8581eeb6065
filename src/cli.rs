//! Command-line arguments for the two broker binaries.
//!
//! Both share the same tiny surface: `-c` names the configuration file and
//! `-d` detaches into the background. Everything else comes from the
//! configuration file, so operators interact with one place.

use clap::Parser;
use std::path::PathBuf;

/// MT scheduler broker.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "smsgate MT scheduler broker", long_about = None)]
pub struct SchedulerArgs {
    /// Configuration file
    #[arg(short = 'c', long = "config", default_value = "scheduler.conf")]
    pub config: PathBuf,

    /// Detach and run as a daemon
    #[arg(short = 'd', long = "daemon")]
    pub daemon: bool,

    /// Suppress log output on stdout (the log file is always written)
    #[arg(short = 'q', long = "quiet")]
    pub quiet: bool,
}

/// MO broker.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "smsgate MO broker", long_about = None)]
pub struct MoArgs {
    /// Configuration file
    #[arg(short = 'c', long = "config", default_value = "mo.conf")]
    pub config: PathBuf,

    /// Detach and run as a daemon
    #[arg(short = 'd', long = "daemon")]
    pub daemon: bool,

    /// Suppress log output on stdout (the log file is always written)
    #[arg(short = 'q', long = "quiet")]
    pub quiet: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_name_the_conventional_config_files() {
        let args = SchedulerArgs::parse_from(["smsgate-scheduler"]);
        assert_eq!(args.config, PathBuf::from("scheduler.conf"));
        assert!(!args.daemon);

        let args = MoArgs::parse_from(["smsgate-mo"]);
        assert_eq!(args.config, PathBuf::from("mo.conf"));
    }

    #[test]
    fn flags_parse() {
        let args = SchedulerArgs::parse_from(["smsgate-scheduler", "-c", "/etc/sched.conf", "-d"]);
        assert_eq!(args.config, PathBuf::from("/etc/sched.conf"));
        assert!(args.daemon);
    }
}
