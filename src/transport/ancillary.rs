//! `SCM_RIGHTS` send/receive over a Unix packet socket.
//!
//! Each call moves exactly one packet with `MSG_DONTWAIT`, so these run
//! inside `AsyncFd` readiness guards; `WouldBlock` is surfaced to the caller.

use std::io::{self, ErrorKind};
use std::mem::size_of;
use std::os::fd::{FromRawFd, OwnedFd, RawFd};

#[cfg(any(target_os = "linux", target_os = "android"))]
const SEND_FLAGS: libc::c_int = libc::MSG_NOSIGNAL | libc::MSG_DONTWAIT;
#[cfg(not(any(target_os = "linux", target_os = "android")))]
const SEND_FLAGS: libc::c_int = libc::MSG_DONTWAIT;

#[cfg(any(target_os = "linux", target_os = "android"))]
const RECV_FLAGS: libc::c_int = libc::MSG_CMSG_CLOEXEC | libc::MSG_DONTWAIT;
#[cfg(not(any(target_os = "linux", target_os = "android")))]
const RECV_FLAGS: libc::c_int = libc::MSG_DONTWAIT;

/// Result of one `recvmsg` call.
#[derive(Debug, Default)]
pub(crate) struct Received {
    /// Payload bytes written into the caller's buffer.
    pub len: usize,
    /// Descriptors that arrived with the payload, now owned by us.
    pub fds: Vec<OwnedFd>,
    /// The kernel dropped descriptors because the control buffer was too small.
    pub truncated: bool,
    /// The packet did not fit the buffer and its tail was discarded.
    pub oversized: bool,
}

/// Send `data` as one packet, with `fd` attached as `SCM_RIGHTS` when given.
///
/// Returns the number of payload bytes written, which for a packet socket is
/// all of them. The sender's copy of `fd` stays open.
pub(crate) fn send_packet(socket: RawFd, data: &[u8], fd: Option<RawFd>) -> io::Result<usize> {
    let mut iov = libc::iovec {
        iov_base: data.as_ptr() as *mut libc::c_void,
        iov_len: data.len(),
    };

    // SAFETY: zeroed msghdr is valid before assigning pointers.
    let mut msghdr: libc::msghdr = unsafe { std::mem::zeroed() };
    msghdr.msg_iov = &mut iov;
    msghdr.msg_iovlen = 1;

    let fd_len = size_of::<RawFd>();
    let mut control = Vec::new();
    if let Some(fd) = fd {
        // SAFETY: CMSG_SPACE only computes a size.
        let space = unsafe { libc::CMSG_SPACE(fd_len as u32) } as usize;
        control.resize(space, 0u8);
        msghdr.msg_control = control.as_mut_ptr().cast();
        msghdr.msg_controllen = control.len() as _;

        // SAFETY: control buffer sized with CMSG_SPACE and owned here.
        let cmsg = unsafe { libc::CMSG_FIRSTHDR(&msghdr) };
        if cmsg.is_null() {
            return Err(io::Error::new(
                ErrorKind::InvalidData,
                "failed to allocate SCM_RIGHTS cmsg",
            ));
        }

        // SAFETY: cmsg points into `control`, which has room for one descriptor.
        unsafe {
            (*cmsg).cmsg_level = libc::SOL_SOCKET;
            (*cmsg).cmsg_type = libc::SCM_RIGHTS;
            (*cmsg).cmsg_len = libc::CMSG_LEN(fd_len as u32) as _;
            std::ptr::write_unaligned(libc::CMSG_DATA(cmsg).cast::<RawFd>(), fd);
        }
    }

    // SAFETY: msghdr points to live iov/control buffers.
    let n = unsafe { libc::sendmsg(socket, &msghdr, SEND_FLAGS) };
    if n < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(n as usize)
}

/// Receive one packet into `buf`, collecting up to `max_fds` descriptors.
///
/// With `max_fds == 0` no control buffer is offered and the kernel closes
/// any descriptors the packet carried.
pub(crate) fn recv_packet(socket: RawFd, buf: &mut [u8], max_fds: usize) -> io::Result<Received> {
    let mut iov = libc::iovec {
        iov_base: buf.as_mut_ptr().cast(),
        iov_len: buf.len(),
    };

    let mut control = Vec::new();
    if max_fds > 0 {
        // SAFETY: CMSG_SPACE only computes a size.
        let space = unsafe { libc::CMSG_SPACE((max_fds * size_of::<RawFd>()) as u32) } as usize;
        control.resize(space, 0u8);
    }

    // SAFETY: zeroed msghdr is valid before assigning pointers.
    let mut msghdr: libc::msghdr = unsafe { std::mem::zeroed() };
    msghdr.msg_iov = &mut iov;
    msghdr.msg_iovlen = 1;
    if !control.is_empty() {
        msghdr.msg_control = control.as_mut_ptr().cast();
        msghdr.msg_controllen = control.len() as _;
    }

    // SAFETY: msghdr points to live iov/control buffers.
    let n = unsafe { libc::recvmsg(socket, &mut msghdr, RECV_FLAGS) };
    if n < 0 {
        return Err(io::Error::last_os_error());
    }

    Ok(Received {
        len: n as usize,
        fds: parse_fds(&msghdr),
        truncated: max_fds > 0 && (msghdr.msg_flags & libc::MSG_CTRUNC) != 0,
        oversized: (msghdr.msg_flags & libc::MSG_TRUNC) != 0,
    })
}

fn parse_fds(msghdr: &libc::msghdr) -> Vec<OwnedFd> {
    let mut out = Vec::new();
    if msghdr.msg_control.is_null() || msghdr.msg_controllen == 0 {
        return out;
    }
    // SAFETY: msghdr points at a control buffer filled in by recvmsg.
    unsafe {
        let mut cmsg = libc::CMSG_FIRSTHDR(msghdr);
        while !cmsg.is_null() {
            if (*cmsg).cmsg_level == libc::SOL_SOCKET && (*cmsg).cmsg_type == libc::SCM_RIGHTS {
                let cmsg_len = (*cmsg).cmsg_len as usize;
                let base_len = libc::CMSG_LEN(0) as usize;
                let count = cmsg_len.saturating_sub(base_len) / size_of::<RawFd>();
                let data = libc::CMSG_DATA(cmsg).cast::<RawFd>();
                for i in 0..count {
                    let fd = std::ptr::read_unaligned(data.add(i));
                    if fd >= 0 {
                        // Freshly installed by the kernel for this process.
                        out.push(OwnedFd::from_raw_fd(fd));
                    }
                }
            }
            cmsg = libc::CMSG_NXTHDR(msghdr, cmsg);
        }
    }
    out
}
