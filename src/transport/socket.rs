//! Packet-preserving Unix socket pairs.
//!
//! Every `sendmsg` on these sockets arrives as exactly one `recvmsg`, so a
//! control record never shares a read with the data written before it.
//! Linux and most Unixes use `SOCK_SEQPACKET`; Apple platforms lack it for
//! `AF_UNIX` and fall back to `SOCK_DGRAM`, which keeps boundaries too.

use std::io;
use std::mem::size_of;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

use crate::error::{HandoffError, Result};

#[cfg(not(any(target_os = "macos", target_os = "ios")))]
pub(crate) const PACKET_TYPE: libc::c_int = libc::SOCK_SEQPACKET;
#[cfg(any(target_os = "macos", target_os = "ios"))]
pub(crate) const PACKET_TYPE: libc::c_int = libc::SOCK_DGRAM;

/// Create a connected pair of packet sockets, both close-on-exec.
///
/// Either end can be handed to [`NativePipe::open`](super::NativePipe::open)
/// or passed down to a child process.
pub fn socket_pair() -> Result<(OwnedFd, OwnedFd)> {
    let mut fds: [RawFd; 2] = [-1; 2];

    #[cfg(any(target_os = "linux", target_os = "android"))]
    let sock_type = PACKET_TYPE | libc::SOCK_CLOEXEC;
    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    let sock_type = PACKET_TYPE;

    // SAFETY: `fds` has room for the two descriptors socketpair writes.
    if unsafe { libc::socketpair(libc::AF_UNIX, sock_type, 0, fds.as_mut_ptr()) } < 0 {
        return Err(io::Error::last_os_error().into());
    }
    // SAFETY: socketpair succeeded, both descriptors are fresh and ours.
    let pair = unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) };

    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    {
        set_cloexec(pair.0.as_raw_fd())?;
        set_cloexec(pair.1.as_raw_fd())?;
    }

    Ok(pair)
}

/// Reject descriptors that are not packet sockets.
///
/// A stream socket would merge plain bytes into the next descriptor-carrying
/// read.
pub(crate) fn ensure_packet_socket(fd: &OwnedFd) -> Result<()> {
    let mut kind: libc::c_int = 0;
    let mut len = size_of::<libc::c_int>() as libc::socklen_t;
    // SAFETY: `kind` and `len` describe a valid c_int out-buffer.
    let rc = unsafe {
        libc::getsockopt(
            fd.as_raw_fd(),
            libc::SOL_SOCKET,
            libc::SO_TYPE,
            (&mut kind as *mut libc::c_int).cast(),
            &mut len,
        )
    };
    if rc < 0 {
        return Err(io::Error::last_os_error().into());
    }
    if kind != PACKET_TYPE {
        return Err(HandoffError::Protocol(format!(
            "fd {} is not a packet socket (SO_TYPE {})",
            fd.as_raw_fd(),
            kind
        )));
    }
    Ok(())
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn set_cloexec(fd: RawFd) -> io::Result<()> {
    // SAFETY: fcntl on a descriptor we own; no memory is passed.
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFD) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: as above.
    if unsafe { libc::fcntl(fd, libc::F_SETFD, flags | libc::FD_CLOEXEC) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}
