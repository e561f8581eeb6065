//! Background detach for the `-d` flag.

use std::fs::OpenOptions;
use std::os::unix::io::AsRawFd;

use anyhow::Context;
use nix::unistd::{fork, setsid, ForkResult};

/// Detach from the controlling terminal: fork (parent exits), start a new
/// session, move to `/` and point stdio at `/dev/null`.
///
/// Must run before the async runtime is built — forking a process with live
/// runtime threads is not survivable.
pub fn daemonize() -> anyhow::Result<()> {
    match unsafe { fork() }.context("fork failed")? {
        ForkResult::Parent { .. } => std::process::exit(0),
        ForkResult::Child => {}
    }

    setsid().context("setsid failed")?;
    std::env::set_current_dir("/").context("chdir to / failed")?;

    let devnull = OpenOptions::new()
        .read(true)
        .write(true)
        .open("/dev/null")
        .context("open /dev/null failed")?;
    let null_fd = devnull.as_raw_fd();
    for stdio_fd in 0..3 {
        if unsafe { libc::dup2(null_fd, stdio_fd) } < 0 {
            return Err(std::io::Error::last_os_error()).context("dup2 stdio failed");
        }
    }

    Ok(())
}
