//! Platform-specific spawn options and signalling for the daemon process.
//!
//! The supervisor only needs three things from the OS layer: how to tell the
//! daemon which descriptors are its IPC pipes, how to make those descriptors
//! survive `exec`, and how to interrupt the daemon when the graceful path
//! fails. `ProcessShim` captures exactly that.

use std::io;
use std::os::fd::RawFd;
use tokio::process::{Child, Command};
use tracing::debug;

/// Descriptor numbers of the pipe ends the daemon inherits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChildPipes {
    /// End the daemon reads; EOF requests shutdown.
    pub shutdown_fd: RawFd,
    /// End the daemon writes bound-address events to.
    pub events_fd: RawFd,
}

/// OS-specific hooks used when building and signalling the daemon process.
pub trait ProcessShim: Send + Sync {
    /// Short platform name for log lines.
    fn name(&self) -> &'static str;

    /// Append the arguments that tell the daemon where its IPC pipes are.
    fn append_ipc_args(&self, pipes: &ChildPipes, args: &mut Vec<String>);

    /// Apply spawn options so the daemon inherits its IPC pipes.
    fn configure_command(&self, cmd: &mut Command, pipes: &ChildPipes);

    /// Ask the daemon to stop via an OS signal.
    ///
    /// Platforms without an interrupt signal fall back to killing the process.
    fn interrupt(&self, child: &mut Child) -> io::Result<()> {
        child.start_kill()
    }
}

/// Unix shim: pipes are passed as descriptor numbers, interrupt is SIGINT.
#[cfg(unix)]
#[derive(Debug, Clone, Copy, Default)]
pub struct UnixShim;

#[cfg(unix)]
impl ProcessShim for UnixShim {
    fn name(&self) -> &'static str {
        "unix"
    }

    fn append_ipc_args(&self, pipes: &ChildPipes, args: &mut Vec<String>) {
        // --piperx
        args.push(format!("--piperx={}", pipes.shutdown_fd));
        // --pipetx
        args.push(format!("--pipetx={}", pipes.events_fd));
    }

    #[allow(unsafe_code)]
    fn configure_command(&self, cmd: &mut Command, pipes: &ChildPipes) {
        let fds = [pipes.shutdown_fd, pipes.events_fd];
        // SAFETY: the closure runs in the forked child before exec and only
        // calls fcntl(2), which is async-signal-safe. It captures nothing but
        // two copied descriptor numbers.
        unsafe {
            cmd.pre_exec(move || {
                for fd in fds {
                    if libc::fcntl(fd, libc::F_SETFD, 0) == -1 {
                        return Err(io::Error::last_os_error());
                    }
                }
                Ok(())
            });
        }
    }

    fn interrupt(&self, child: &mut Child) -> io::Result<()> {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        let pid = child
            .id()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "process already reaped"))?;
        debug!("Sending SIGINT to process {}", pid);
        kill(Pid::from_raw(pid as i32), Signal::SIGINT).map_err(io::Error::from)
    }
}

/// The shim for the platform this crate was built for.
#[cfg(unix)]
pub fn process_shim() -> &'static dyn ProcessShim {
    &UnixShim
}
