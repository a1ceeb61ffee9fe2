//! Hand the downstream end of a pipe to a child process.
//!
//! The supervisor creates the pipe, attaches the downstream end to the
//! worker's command at a fixed descriptor number, spawns it, then calls
//! `close_downstream`. The worker opens the channel with
//! [`PipeTransport::open_inherited`].

use std::io;
use std::os::fd::{AsRawFd, BorrowedFd, RawFd};
use std::os::unix::process::CommandExt;
use std::process::Command;

use crate::error::{HandoffError, Result};
use crate::handle::HandleFactory;
use crate::pipe::PipeTransport;

/// The pre_exec hook that installs `source` as `target` in the child.
///
/// Runs between fork and exec, so it only makes async-signal-safe calls.
fn install_fd(source: RawFd, target: RawFd) -> io::Result<()> {
    if source == target {
        // dup2 would keep FD_CLOEXEC; clear it by hand.
        // SAFETY: fcntl on an inherited descriptor; no memory is passed.
        let flags = unsafe { libc::fcntl(target, libc::F_GETFD) };
        if flags < 0 {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: as above.
        if unsafe { libc::fcntl(target, libc::F_SETFD, flags & !libc::FD_CLOEXEC) } < 0 {
            return Err(io::Error::last_os_error());
        }
        return Ok(());
    }
    // SAFETY: `source` is open in the child until exec; dup2 replaces
    // whatever `target` held and the new descriptor has FD_CLOEXEC clear.
    if unsafe { libc::dup2(source, target) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Install `downstream` as descriptor `target_fd` in the child spawned by
/// `command`, and advertise it in `env_name`.
///
/// `downstream` must stay open until the child has been spawned.
pub fn attach_channel(
    command: &mut Command,
    downstream: BorrowedFd<'_>,
    target_fd: RawFd,
    env_name: &str,
) {
    let source = downstream.as_raw_fd();
    command.env(env_name, target_fd.to_string());
    // SAFETY: the hook captures two integers and only calls fcntl/dup2,
    // which are async-signal-safe.
    unsafe { command.pre_exec(move || install_fd(source, target_fd)) };
}

/// Async variant of [`attach_channel`] for `tokio::process::Command`.
pub fn attach_channel_async(
    command: &mut tokio::process::Command,
    downstream: BorrowedFd<'_>,
    target_fd: RawFd,
    env_name: &str,
) {
    let source = downstream.as_raw_fd();
    command.env(env_name, target_fd.to_string());
    // SAFETY: same hook as `attach_channel`.
    unsafe { command.pre_exec(move || install_fd(source, target_fd)) };
}

impl<F: HandleFactory> PipeTransport<F> {
    fn channel_parts(&self) -> Result<(BorrowedFd<'_>, RawFd)> {
        match (self.downstream(), self.downstream_target()) {
            (Some(fd), Some(target)) => Ok((fd, target)),
            _ => Err(HandoffError::NotOpen),
        }
    }

    /// Attach this pipe's downstream end to `command`.
    ///
    /// Requires `create` and must happen before `close_downstream`.
    pub fn attach_to(&self, command: &mut Command) -> Result<()> {
        let (fd, target) = self.channel_parts()?;
        attach_channel(command, fd, target, &self.config().channel_env);
        Ok(())
    }

    /// Async variant of [`PipeTransport::attach_to`].
    pub fn attach_to_async(&self, command: &mut tokio::process::Command) -> Result<()> {
        let (fd, target) = self.channel_parts()?;
        attach_channel_async(command, fd, target, &self.config().channel_env);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attach_requires_create() {
        let pipe = PipeTransport::new(true);
        let mut command = Command::new("true");
        assert!(matches!(
            pipe.attach_to(&mut command),
            Err(HandoffError::NotOpen)
        ));
    }

    #[tokio::test]
    async fn test_attach_fails_after_close_downstream() {
        let mut pipe = PipeTransport::new(true);
        pipe.create(3).unwrap();
        pipe.close_downstream();

        let mut command = Command::new("true");
        assert!(pipe.attach_to(&mut command).is_err());
    }

    #[tokio::test]
    async fn test_child_inherits_channel() {
        let mut pipe = PipeTransport::new(false);
        pipe.create(3).unwrap();

        // The child writes through descriptor 3 and exits.
        let mut command = tokio::process::Command::new("sh");
        command.arg("-c").arg("printf \"fd=$HANDOFF_CHANNEL_FD\" >&3");
        pipe.attach_to_async(&mut command).unwrap();

        let mut child = command.spawn().unwrap();
        pipe.close_downstream();
        assert!(child.wait().await.unwrap().success());

        let event = pipe.read().await.unwrap().unwrap();
        assert_eq!(event.data.as_deref(), Some(&b"fd=3"[..]));
        assert!(pipe.read().await.unwrap().is_none());
    }
}
