//! Native Unix domain socket pipe.
//!
//! Owns the socket and performs the raw operations the transport façade
//! builds on: socketpair creation, adopting an inherited descriptor, plain
//! and descriptor-carrying writes, and raw `(buffer, fd)` reads. I/O runs on
//! `AsyncFd` readiness with non-blocking `sendmsg`/`recvmsg`.
//!
//! # Example
//!
//! ```ignore
//! use handoff_pipe::transport::NativePipe;
//! use handoff_pipe::PipeConfig;
//!
//! let mut pipe = NativePipe::new(&PipeConfig::default());
//! pipe.create(3)?;
//! let child_end = pipe.downstream().unwrap();
//! ```

use std::io::ErrorKind;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd, RawFd};

use bytes::{Bytes, BytesMut};
use tokio::io::unix::AsyncFd;
use tokio::sync::Mutex;

use super::ancillary::{self, Received};
use super::chunk::RawChunk;
use super::socket::{ensure_packet_socket, socket_pair};
use crate::config::PipeConfig;
use crate::error::{HandoffError, Result};

/// Unix domain packet socket pipe.
///
/// One write is one packet and one read returns one packet, so chunk
/// boundaries on the reading side are exactly the sender's write boundaries.
/// Plain writes longer than the packet size are split into several packets.
#[derive(Debug)]
pub struct NativePipe {
    ipc: bool,
    /// Largest packet written, and the size of the read buffer.
    packet_size: usize,
    max_fds_per_read: usize,
    /// Our end of the pipe, open for both reading and writing.
    socket: Option<AsyncFd<OwnedFd>>,
    /// Peer end produced by `create`, until released.
    downstream: Option<OwnedFd>,
    /// Descriptor number the downstream end should occupy in the child.
    downstream_target: Option<RawFd>,
    /// Held for a whole message so concurrent writes never interleave.
    write_lock: Mutex<()>,
    /// Reused across reads; allocated on first use.
    read_buf: Mutex<BytesMut>,
}

impl NativePipe {
    /// Create a closed pipe.
    pub fn new(config: &PipeConfig) -> Self {
        Self {
            ipc: config.ipc,
            packet_size: config.read_buffer_size.max(1),
            max_fds_per_read: config.max_fds_per_read.max(1),
            socket: None,
            downstream: None,
            downstream_target: None,
            write_lock: Mutex::new(()),
            read_buf: Mutex::new(BytesMut::new()),
        }
    }

    /// Create a connected socket pair.
    ///
    /// Our end becomes the upstream side; the peer end is held as the
    /// downstream side destined for descriptor `downstream_fd` in a child.
    /// Must be called from within a tokio runtime.
    pub fn create(&mut self, downstream_fd: RawFd) -> Result<()> {
        if self.socket.is_some() {
            return Err(HandoffError::AlreadyOpen);
        }
        let (local, remote) = socket_pair()?;

        self.socket = Some(AsyncFd::new(local)?);
        self.downstream = Some(remote);
        self.downstream_target = Some(downstream_fd);

        tracing::debug!("Created pipe, downstream destined for fd {}", downstream_fd);
        Ok(())
    }

    /// Adopt an existing connected packet socket descriptor, duplex.
    ///
    /// Stream sockets are refused with a protocol error. Must be called from
    /// within a tokio runtime.
    pub fn open(&mut self, fd: OwnedFd) -> Result<()> {
        if self.socket.is_some() {
            return Err(HandoffError::AlreadyOpen);
        }
        ensure_packet_socket(&fd)?;
        let raw = fd.as_raw_fd();
        self.socket = Some(AsyncFd::new(fd)?);

        tracing::debug!("Opened pipe on fd {}", raw);
        Ok(())
    }

    /// Release the downstream end only. Safe to call repeatedly.
    pub fn close_downstream(&mut self) {
        if let Some(fd) = self.downstream.take() {
            tracing::debug!("Closing downstream fd {}", fd.as_raw_fd());
        }
    }

    /// Release both ends.
    pub fn close(&mut self) {
        self.close_downstream();
        self.socket = None;
    }

    /// Whether the pipe has an open end to read and write.
    #[inline]
    pub fn is_open(&self) -> bool {
        self.socket.is_some()
    }

    /// Whether reads collect descriptors.
    #[inline]
    pub fn is_ipc(&self) -> bool {
        self.ipc
    }

    /// Upstream end, populated only after `create`.
    pub fn upstream(&self) -> Option<BorrowedFd<'_>> {
        self.downstream_target?;
        self.socket.as_ref().map(|socket| socket.get_ref().as_fd())
    }

    /// Downstream end, populated after `create` until `close_downstream`.
    pub fn downstream(&self) -> Option<BorrowedFd<'_>> {
        self.downstream.as_ref().map(AsFd::as_fd)
    }

    /// Descriptor number requested for the downstream end at `create`.
    #[inline]
    pub fn downstream_target(&self) -> Option<RawFd> {
        self.downstream_target
    }

    /// Write all of `data` without ancillary data.
    ///
    /// Sent as consecutive packets of at most the configured read buffer
    /// size. An empty write sends nothing: a zero-length packet reads as end
    /// of stream on the other side.
    pub async fn write_all(&self, data: &[u8]) -> Result<()> {
        let socket = self.socket()?;
        let _guard = self.write_lock.lock().await;

        for packet in data.chunks(self.packet_size) {
            send(socket, packet, None).await?;
        }
        Ok(())
    }

    /// Write `data` as a single packet with `fd` attached.
    ///
    /// `data` must be non-empty and fit in one packet.
    pub async fn write_with_fd(&self, data: &[u8], fd: BorrowedFd<'_>) -> Result<()> {
        if data.is_empty() {
            return Err(HandoffError::Protocol(
                "cannot attach a descriptor to an empty write".into(),
            ));
        }
        if data.len() > self.packet_size {
            return Err(HandoffError::Protocol(format!(
                "descriptor-carrying write of {} bytes exceeds packet size {}",
                data.len(),
                self.packet_size
            )));
        }
        let socket = self.socket()?;
        let _guard = self.write_lock.lock().await;

        send(socket, data, Some(fd.as_raw_fd())).await
    }

    /// Read the next raw chunk. `Ok(None)` at end of stream.
    ///
    /// Each chunk is exactly one packet. Without IPC no control buffer is
    /// offered, so descriptors sent to us are closed by the kernel.
    pub async fn read_chunk(&self) -> Result<Option<RawChunk>> {
        let socket = self.socket()?;
        let mut buf = self.read_buf.lock().await;
        if buf.len() != self.packet_size {
            buf.resize(self.packet_size, 0);
        }
        let max_fds = if self.ipc { self.max_fds_per_read } else { 0 };

        loop {
            let mut guard = socket.readable().await?;
            match guard.try_io(|inner| {
                ancillary::recv_packet(inner.get_ref().as_raw_fd(), &mut buf[..], max_fds)
            }) {
                Ok(received) => return into_chunk(&buf[..], received?),
                Err(_would_block) => continue,
            }
        }
    }

    fn socket(&self) -> Result<&AsyncFd<OwnedFd>> {
        self.socket.as_ref().ok_or(HandoffError::NotOpen)
    }
}

async fn send(socket: &AsyncFd<OwnedFd>, packet: &[u8], fd: Option<RawFd>) -> Result<()> {
    loop {
        let mut guard = socket.writable().await?;
        match guard.try_io(|inner| ancillary::send_packet(inner.get_ref().as_raw_fd(), packet, fd)) {
            Ok(Ok(n)) if n == packet.len() => return Ok(()),
            Ok(Ok(n)) => return Err(short_write(n, packet.len())),
            Ok(Err(e)) => return Err(e.into()),
            Err(_would_block) => continue,
        }
    }
}

fn into_chunk(buf: &[u8], received: Received) -> Result<Option<RawChunk>> {
    let Received {
        len,
        fds,
        truncated,
        oversized,
    } = received;

    if truncated {
        return Err(HandoffError::Protocol(format!(
            "ancillary data truncated, {} descriptor(s) kept",
            fds.len()
        )));
    }
    if oversized {
        return Err(HandoffError::Protocol(format!(
            "packet larger than the {} byte read buffer",
            buf.len()
        )));
    }
    if len == 0 && fds.is_empty() {
        return Ok(None);
    }

    let mut fds = fds.into_iter();
    let fd = fds.next();
    let extra = fds.count();
    if extra > 0 {
        tracing::warn!("Closing {} extra descriptor(s) received in one chunk", extra);
    }

    let buffer = (len > 0).then(|| Bytes::copy_from_slice(&buf[..len]));

    Ok(Some(RawChunk {
        buffer,
        control: None,
        fd,
    }))
}

fn short_write(sent: usize, expected: usize) -> HandoffError {
    HandoffError::Io(std::io::Error::new(
        ErrorKind::WriteZero,
        format!("pipe packet cut short: {} of {} bytes", sent, expected),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::os::unix::net::UnixStream;
    use std::time::Duration;

    fn ipc_config() -> PipeConfig {
        PipeConfig {
            ipc: true,
            ..PipeConfig::default()
        }
    }

    /// A created pipe and a second pipe opened on its downstream end.
    fn connected(downstream_config: &PipeConfig) -> (NativePipe, NativePipe) {
        let mut upstream = NativePipe::new(&ipc_config());
        upstream.create(3).unwrap();

        let mut downstream = NativePipe::new(downstream_config);
        downstream.open(upstream.downstream.take().unwrap()).unwrap();
        (upstream, downstream)
    }

    #[tokio::test]
    async fn test_create_populates_both_ends() {
        let mut pipe = NativePipe::new(&ipc_config());
        assert!(pipe.upstream().is_none());
        assert!(pipe.downstream().is_none());

        pipe.create(3).unwrap();
        assert!(pipe.is_open());
        assert!(pipe.upstream().is_some());
        assert!(pipe.downstream().is_some());
        assert_eq!(pipe.downstream_target(), Some(3));
    }

    #[tokio::test]
    async fn test_close_downstream_keeps_upstream() {
        let mut pipe = NativePipe::new(&ipc_config());
        pipe.create(3).unwrap();

        pipe.close_downstream();
        pipe.close_downstream();

        assert!(pipe.downstream().is_none());
        assert!(pipe.upstream().is_some());
        assert!(pipe.is_open());
    }

    #[tokio::test]
    async fn test_open_twice_fails() {
        let (a, _b) = socket_pair().unwrap();
        let mut pipe = NativePipe::new(&ipc_config());
        pipe.create(3).unwrap();

        let err = pipe.open(a).unwrap_err();
        assert!(matches!(err, HandoffError::AlreadyOpen));
    }

    #[tokio::test]
    async fn test_opened_pipe_has_no_upstream() {
        let (a, _b) = socket_pair().unwrap();
        let mut pipe = NativePipe::new(&ipc_config());
        pipe.open(a).unwrap();

        assert!(pipe.is_open());
        assert!(pipe.upstream().is_none());
    }

    #[tokio::test]
    async fn test_open_rejects_stream_socket() {
        let (a, _b) = UnixStream::pair().unwrap();
        let mut pipe = NativePipe::new(&ipc_config());

        let err = pipe.open(OwnedFd::from(a)).unwrap_err();
        assert!(err.is_protocol_violation());
        assert!(!pipe.is_open());
    }

    #[tokio::test]
    async fn test_closed_pipe_rejects_io() {
        let pipe = NativePipe::new(&ipc_config());
        assert!(matches!(pipe.write_all(b"x").await, Err(HandoffError::NotOpen)));
        assert!(matches!(pipe.read_chunk().await, Err(HandoffError::NotOpen)));
    }

    #[tokio::test]
    async fn test_write_with_fd_rejects_empty_data() {
        let (upstream, _downstream) = connected(&ipc_config());
        let (carried, _peer) = UnixStream::pair().unwrap();

        let err = upstream.write_with_fd(b"", carried.as_fd()).await.unwrap_err();
        assert!(err.is_protocol_violation());
    }

    #[tokio::test]
    async fn test_write_with_fd_rejects_oversized_record() {
        let (upstream, _downstream) = connected(&ipc_config());
        let (carried, _peer) = UnixStream::pair().unwrap();

        let record = vec![b' '; upstream.packet_size + 1];
        let err = upstream
            .write_with_fd(&record, carried.as_fd())
            .await
            .unwrap_err();
        assert!(err.is_protocol_violation());
    }

    #[tokio::test]
    async fn test_fd_round_trip_through_socketpair() {
        let (upstream, downstream) = connected(&ipc_config());

        let (carried, _peer) = UnixStream::pair().unwrap();
        upstream
            .write_with_fd(b"{\"cmd\":\"NODE_HANDLE\"}", carried.as_fd())
            .await
            .unwrap();

        let chunk = downstream.read_chunk().await.unwrap().unwrap();
        assert_eq!(chunk.buffer.as_deref(), Some(&b"{\"cmd\":\"NODE_HANDLE\"}"[..]));
        assert!(chunk.has_fd());
    }

    #[tokio::test]
    async fn test_plain_write_then_fd_write_are_separate_chunks() {
        let (upstream, downstream) = connected(&ipc_config());
        let (carried, _peer) = UnixStream::pair().unwrap();

        upstream.write_all(b"{\"cmd\":\"PING\"}\n").await.unwrap();
        upstream
            .write_with_fd(b"{\"cmd\":\"NODE_HANDLE\"}", carried.as_fd())
            .await
            .unwrap();

        let first = downstream.read_chunk().await.unwrap().unwrap();
        assert_eq!(first.buffer.as_deref(), Some(&b"{\"cmd\":\"PING\"}\n"[..]));
        assert!(!first.has_fd());

        let second = downstream.read_chunk().await.unwrap().unwrap();
        assert_eq!(second.buffer.as_deref(), Some(&b"{\"cmd\":\"NODE_HANDLE\"}"[..]));
        assert!(second.has_fd());
    }

    #[tokio::test]
    async fn test_long_plain_write_is_split_into_packets() {
        let config = PipeConfig {
            read_buffer_size: 4,
            ..ipc_config()
        };
        let mut upstream = NativePipe::new(&config);
        upstream.create(3).unwrap();
        let mut downstream = NativePipe::new(&config);
        downstream.open(upstream.downstream.take().unwrap()).unwrap();

        upstream.write_all(b"abcdefghij").await.unwrap();

        let mut parts = Vec::new();
        for _ in 0..3 {
            let chunk = downstream.read_chunk().await.unwrap().unwrap();
            parts.push(chunk.buffer.unwrap().to_vec());
        }
        assert_eq!(parts, vec![b"abcd".to_vec(), b"efgh".to_vec(), b"ij".to_vec()]);
    }

    #[tokio::test]
    async fn test_packet_larger_than_reader_buffer() {
        let small = PipeConfig {
            read_buffer_size: 4,
            ..ipc_config()
        };
        let (upstream, downstream) = connected(&small);

        upstream.write_all(b"0123456789").await.unwrap();
        let err = downstream.read_chunk().await.unwrap_err();
        assert!(err.is_protocol_violation());
    }

    #[tokio::test]
    async fn test_chunks_survive_read_buffer_reuse() {
        let (upstream, downstream) = connected(&ipc_config());

        upstream.write_all(b"first").await.unwrap();
        upstream.write_all(b"second").await.unwrap();

        let first = downstream.read_chunk().await.unwrap().unwrap();
        let second = downstream.read_chunk().await.unwrap().unwrap();
        assert_eq!(first.buffer.as_deref(), Some(&b"first"[..]));
        assert_eq!(second.buffer.as_deref(), Some(&b"second"[..]));
    }

    #[tokio::test]
    async fn test_empty_plain_write_sends_nothing() {
        let (upstream, downstream) = connected(&ipc_config());

        upstream.write_all(b"").await.unwrap();
        upstream.write_all(b"x").await.unwrap();

        let chunk = downstream.read_chunk().await.unwrap().unwrap();
        assert_eq!(chunk.buffer.as_deref(), Some(&b"x"[..]));
    }

    #[tokio::test]
    async fn test_eof_yields_none() {
        let (mut upstream, downstream) = connected(&ipc_config());

        upstream.close();
        assert!(downstream.read_chunk().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_non_ipc_read_never_collects_fds() {
        let (upstream, downstream) = connected(&PipeConfig::default());

        let (carried, _peer) = UnixStream::pair().unwrap();
        upstream.write_with_fd(b"data", carried.as_fd()).await.unwrap();

        let chunk = downstream.read_chunk().await.unwrap().unwrap();
        assert_eq!(chunk.buffer.as_deref(), Some(&b"data"[..]));
        assert!(!chunk.has_fd());
    }

    #[test]
    fn test_extra_descriptors_are_closed() {
        let (kept, _kept_peer) = UnixStream::pair().unwrap();
        let (extra, mut extra_peer) = UnixStream::pair().unwrap();
        let kept_raw = kept.as_raw_fd();

        let received = Received {
            len: 4,
            fds: vec![OwnedFd::from(kept), OwnedFd::from(extra)],
            ..Received::default()
        };
        let chunk = into_chunk(b"data", received).unwrap().unwrap();
        assert_eq!(chunk.fd.as_ref().map(AsRawFd::as_raw_fd), Some(kept_raw));
        assert_eq!(chunk.buffer.as_deref(), Some(&b"data"[..]));

        // The only copy of `extra` is gone, so its peer sees end of stream.
        extra_peer
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        let mut one = [0u8; 1];
        assert_eq!(extra_peer.read(&mut one).unwrap(), 0);
    }

    #[test]
    fn test_truncated_control_is_protocol_error() {
        let (a, _b) = UnixStream::pair().unwrap();
        let received = Received {
            len: 4,
            fds: vec![OwnedFd::from(a)],
            truncated: true,
            ..Received::default()
        };
        let err = into_chunk(b"data", received).unwrap_err();
        assert!(matches!(err, HandoffError::Protocol(_)));
    }

    #[test]
    fn test_oversized_packet_is_protocol_error() {
        let received = Received {
            len: 4,
            oversized: true,
            ..Received::default()
        };
        let err = into_chunk(b"data", received).unwrap_err();
        assert!(matches!(err, HandoffError::Protocol(_)));
    }

    #[test]
    fn test_empty_packet_is_end_of_stream() {
        assert!(into_chunk(b"", Received::default()).unwrap().is_none());
    }
}
