//! Raw chunk type handed from the native pipe to the demultiplexer.

use std::os::fd::{FromRawFd, OwnedFd, RawFd};

use bytes::Bytes;

/// Native sentinel for "no descriptor accompanied this chunk".
pub const NO_FD: RawFd = -1;

/// One raw read from the native pipe: payload plus optional descriptor.
///
/// A descriptor held here is owned by the chunk and closed when the chunk
/// is dropped unless something takes it.
#[derive(Debug, Default)]
pub struct RawChunk {
    /// Application bytes, absent when the read carried none.
    pub buffer: Option<Bytes>,
    /// Control record bytes delivered out of band by the native layer.
    /// `None` means the control record, if any, is the payload itself.
    pub control: Option<Bytes>,
    /// Descriptor received alongside the payload.
    pub fd: Option<OwnedFd>,
}

impl RawChunk {
    /// A data-only chunk.
    pub fn data(buffer: impl Into<Bytes>) -> Self {
        Self {
            buffer: Some(buffer.into()),
            ..Self::default()
        }
    }

    /// A chunk carrying a descriptor.
    pub fn with_fd(buffer: Option<Bytes>, fd: OwnedFd) -> Self {
        Self {
            buffer,
            control: None,
            fd: Some(fd),
        }
    }

    /// Attach out-of-band control bytes.
    pub fn with_control(mut self, control: impl Into<Bytes>) -> Self {
        self.control = Some(control.into());
        self
    }

    /// Build a chunk from a native `(buffer, fd)` pair.
    ///
    /// Any negative `fd`, [`NO_FD`] included, means no descriptor.
    ///
    /// # Safety
    ///
    /// A non-negative `fd` must be an open descriptor owned by the caller;
    /// ownership moves into the chunk.
    pub unsafe fn from_raw_parts(buffer: Option<Bytes>, fd: RawFd) -> Self {
        let fd = if fd < 0 {
            None
        } else {
            Some(OwnedFd::from_raw_fd(fd))
        };
        Self {
            buffer,
            control: None,
            fd,
        }
    }

    /// Readable bytes in the payload; 0 when absent.
    #[inline]
    pub fn byte_count(&self) -> usize {
        self.buffer.as_ref().map_or(0, Bytes::len)
    }

    /// Whether a descriptor accompanied this chunk.
    #[inline]
    pub fn has_fd(&self) -> bool {
        self.fd.is_some()
    }
}
