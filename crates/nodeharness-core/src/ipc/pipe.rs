//! OS pipe pairs shared with the daemon process.
//!
//! Each pair is a single anonymous pipe. One end stays with the supervisor,
//! the other is handed to the child at spawn time. Both ends are created
//! close-on-exec; the platform shim clears the flag on the child's end only,
//! inside the forked child, so no other process ever inherits them.

use crate::error::{HarnessError, Result};
use std::os::fd::{AsRawFd, IntoRawFd, OwnedFd, RawFd};
use std::sync::{Mutex, MutexGuard};
use tokio::net::unix::pipe;
use tracing::debug;

/// Direction of a pipe pair, from the supervisor's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipeRole {
    /// The child writes bound-address events; the supervisor reads them.
    Receive,
    /// The supervisor holds the write end; the child reads it and treats
    /// EOF as a request to shut down.
    Transmit,
}

/// A pipe whose far end is inherited by the daemon process.
#[derive(Debug)]
pub struct IpcPipePair {
    role: PipeRole,
    child_fd: RawFd,
    local: Mutex<Option<OwnedFd>>,
    child: Mutex<Option<OwnedFd>>,
}

impl IpcPipePair {
    /// Create a new pipe pair for the given role.
    pub fn new(role: PipeRole) -> Result<Self> {
        let (read, write) = create_pipe()?;

        let (local, child) = match role {
            PipeRole::Receive => (read, write),
            PipeRole::Transmit => (write, read),
        };

        Ok(Self {
            role,
            child_fd: child.as_raw_fd(),
            local: Mutex::new(Some(local)),
            child: Mutex::new(Some(child)),
        })
    }

    pub fn role(&self) -> PipeRole {
        self.role
    }

    /// The descriptor number the child sees for its end of the pipe.
    ///
    /// Fixed at creation; only meaningful while the child end is still held.
    pub fn child_fd(&self) -> RawFd {
        self.child_fd
    }

    /// Move the supervisor's read end into a tokio pipe receiver.
    ///
    /// Only valid for `PipeRole::Receive`, and only once.
    pub fn take_reader(&self) -> Result<pipe::Receiver> {
        if self.role != PipeRole::Receive {
            return Err(HarnessError::Config {
                message: "transmit pipe has no reader end".to_string(),
            });
        }
        let fd = lock(&self.local).take().ok_or_else(|| HarnessError::Config {
            message: "IPC receive pipe already consumed".to_string(),
        })?;
        pipe::Receiver::from_owned_fd(fd)
            .map_err(|e| HarnessError::io_context("register IPC pipe reader", e))
    }

    /// Take ownership of the child's end, leaving the pair without it.
    pub fn take_child_end(&self) -> Option<OwnedFd> {
        lock(&self.child).take()
    }

    /// Close the supervisor's copy of the child's end.
    ///
    /// Called once the child has inherited it, so that EOF on the pipe
    /// tracks the child alone.
    pub fn release_child_end(&self) -> Result<()> {
        match self.take_child_end() {
            Some(fd) => close_fd(fd),
            None => Ok(()),
        }
    }

    /// Close the supervisor's end.
    ///
    /// Unlike `close`, an end that is already gone is reported as an error.
    pub fn close_local(&self) -> Result<()> {
        match lock(&self.local).take() {
            Some(fd) => close_fd(fd),
            None => Err(HarnessError::Config {
                message: "IPC pipe already closed".to_string(),
            }),
        }
    }

    /// Close every end still held by this pair.
    ///
    /// Safe to call repeatedly: ends already closed are skipped, so each OS
    /// descriptor is released at most once. Returns the first close error.
    pub fn close(&self) -> Result<()> {
        let local = lock(&self.local).take().map(close_fd).unwrap_or(Ok(()));
        let child = lock(&self.child).take().map(close_fd).unwrap_or(Ok(()));
        local.and(child)
    }

    /// Whether both ends have been closed or handed off.
    pub fn is_closed(&self) -> bool {
        lock(&self.local).is_none() && lock(&self.child).is_none()
    }
}

fn lock(slot: &Mutex<Option<OwnedFd>>) -> MutexGuard<'_, Option<OwnedFd>> {
    slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(any(target_os = "linux", target_os = "android", target_os = "freebsd"))]
fn create_pipe() -> Result<(OwnedFd, OwnedFd)> {
    nix::unistd::pipe2(nix::fcntl::OFlag::O_CLOEXEC)
        .map_err(|e| HarnessError::io_context("create IPC pipe", e.into()))
}

// No pipe2 here; a concurrent fork can briefly see the descriptors before
// the flag is set.
#[cfg(not(any(target_os = "linux", target_os = "android", target_os = "freebsd")))]
fn create_pipe() -> Result<(OwnedFd, OwnedFd)> {
    let (read, write) = nix::unistd::pipe()
        .map_err(|e| HarnessError::io_context("create IPC pipe", e.into()))?;
    set_cloexec(&read)?;
    set_cloexec(&write)?;
    Ok((read, write))
}

#[cfg(not(any(target_os = "linux", target_os = "android", target_os = "freebsd")))]
fn set_cloexec(fd: &OwnedFd) -> Result<()> {
    use nix::fcntl::{fcntl, FcntlArg, FdFlag};

    fcntl(fd.as_raw_fd(), FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC))
        .map_err(|e| HarnessError::io_context("set close-on-exec on IPC pipe", e.into()))?;
    Ok(())
}

fn close_fd(fd: OwnedFd) -> Result<()> {
    let raw = fd.into_raw_fd();
    nix::unistd::close(raw).map_err(|e| {
        debug!("close({}) failed: {}", raw, e);
        HarnessError::io_context(format!("close IPC pipe fd {}", raw), e.into())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::fcntl::{fcntl, FcntlArg, FdFlag};
    use std::io::Read;
    use std::time::Duration;
    use tokio::io::AsyncReadExt;

    #[test]
    fn test_close_is_idempotent() {
        let pair = IpcPipePair::new(PipeRole::Transmit).unwrap();
        assert!(!pair.is_closed());

        pair.close().unwrap();
        assert!(pair.is_closed());
        pair.close().unwrap();
    }

    #[test]
    fn test_close_local_reports_already_closed() {
        let pair = IpcPipePair::new(PipeRole::Transmit).unwrap();
        let mut child_end = std::fs::File::from(pair.take_child_end().unwrap());

        pair.close_local().unwrap();
        let mut buf = Vec::new();
        assert_eq!(child_end.read_to_end(&mut buf).unwrap(), 0);

        assert!(pair.close_local().is_err());
        pair.close().unwrap();
    }

    #[test]
    fn test_ends_are_close_on_exec() {
        let pair = IpcPipePair::new(PipeRole::Receive).unwrap();
        let flags = fcntl(pair.child_fd(), FcntlArg::F_GETFD).unwrap();
        assert!(FdFlag::from_bits_truncate(flags).contains(FdFlag::FD_CLOEXEC));
    }

    #[tokio::test]
    async fn test_reader_can_only_be_taken_once() {
        let pair = IpcPipePair::new(PipeRole::Receive).unwrap();
        assert!(pair.take_reader().is_ok());
        assert!(pair.take_reader().is_err());
    }

    #[tokio::test]
    async fn test_transmit_pair_has_no_reader() {
        let pair = IpcPipePair::new(PipeRole::Transmit).unwrap();
        assert!(pair.take_reader().is_err());
    }

    #[tokio::test]
    async fn test_blocked_reader_sees_eof_when_write_end_closes() {
        let pair = IpcPipePair::new(PipeRole::Receive).unwrap();
        let mut reader = pair.take_reader().unwrap();

        let read = tokio::spawn(async move {
            let mut buf = [0u8; 16];
            reader.read(&mut buf).await
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!read.is_finished());
        pair.close().unwrap();

        let n = tokio::time::timeout(Duration::from_secs(2), read)
            .await
            .expect("reader should observe EOF promptly")
            .unwrap()
            .unwrap();
        assert_eq!(n, 0);
    }

    #[test]
    fn test_closing_transmit_pair_signals_eof_to_child_end() {
        let pair = IpcPipePair::new(PipeRole::Transmit).unwrap();
        let mut child_end = std::fs::File::from(pair.take_child_end().unwrap());

        pair.close().unwrap();

        let mut buf = Vec::new();
        assert_eq!(child_end.read_to_end(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_release_child_end_keeps_local_end() {
        let pair = IpcPipePair::new(PipeRole::Transmit).unwrap();
        pair.release_child_end().unwrap();
        assert!(pair.take_child_end().is_none());
        assert!(!pair.is_closed());
        pair.close().unwrap();
        assert!(pair.is_closed());
    }
}
