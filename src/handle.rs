//! Handle construction from received descriptors.
//!
//! The demultiplexer does not know how to turn a descriptor into something
//! the application can use; it asks a [`HandleFactory`]. The default
//! [`TcpHandleFactory`] wraps the descriptor in a [`TcpHandle`].

use std::net::{SocketAddr, TcpStream};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd, RawFd};

use crate::control::HandleType;
use crate::error::Result;

/// Builds application handles from received descriptors.
///
/// Called once per validated `NODE_HANDLE` chunk, only with
/// [`HandleType::Socket`] or [`HandleType::Native`]. The factory takes
/// ownership of `fd`.
pub trait HandleFactory {
    /// Handle type delivered to the consumer.
    type Handle;

    /// Wrap `fd` as a handle of the given kind.
    fn wrap(&self, kind: HandleType, fd: OwnedFd) -> Result<Self::Handle>;
}

/// Default factory: every recognized type becomes a TCP connection handle.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpHandleFactory;

impl HandleFactory for TcpHandleFactory {
    type Handle = TcpHandle;

    fn wrap(&self, kind: HandleType, fd: OwnedFd) -> Result<TcpHandle> {
        Ok(TcpHandle {
            kind,
            stream: TcpStream::from(fd),
        })
    }
}

/// A transferred TCP connection.
///
/// Owned by whoever received it; dropping it closes the connection.
#[derive(Debug)]
pub struct TcpHandle {
    kind: HandleType,
    stream: TcpStream,
}

impl TcpHandle {
    /// Type named in the control message this handle arrived with.
    #[inline]
    pub fn kind(&self) -> HandleType {
        self.kind
    }

    /// Remote address of the connection.
    pub fn peer_addr(&self) -> Result<SocketAddr> {
        Ok(self.stream.peer_addr()?)
    }

    /// Local address of the connection.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.stream.local_addr()?)
    }

    /// Unwrap into the blocking std stream.
    pub fn into_std(self) -> TcpStream {
        self.stream
    }

    /// Register the connection with the tokio reactor.
    ///
    /// Must be called from within a tokio runtime.
    pub fn into_tokio(self) -> Result<tokio::net::TcpStream> {
        self.stream.set_nonblocking(true)?;
        Ok(tokio::net::TcpStream::from_std(self.stream)?)
    }
}

impl AsFd for TcpHandle {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.stream.as_fd()
    }
}

impl AsRawFd for TcpHandle {
    fn as_raw_fd(&self) -> RawFd {
        self.stream.as_raw_fd()
    }
}
