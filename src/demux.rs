//! Handle demultiplexer.
//!
//! Turns each raw `(buffer, fd)` chunk into exactly one [`ReadEvent`].
//! When a descriptor accompanies the chunk, the chunk's control bytes are
//! decoded as a `NODE_HANDLE` control message and, if it names a known
//! handle type, the descriptor is wrapped by the [`HandleFactory`].
//!
//! The demultiplexer is stateless: a control message must arrive whole in
//! the chunk that carries its descriptor.
//!
//! ```text
//! RawChunk ──► fd? ──no──► ReadEvent { nread, data, handle: None }
//!               │
//!              yes ──► decode JSON ──► NODE_HANDLE + known type?
//!                          │                 │yes            │no
//!                        error        factory.wrap(fd)   drop fd
//! ```

use bytes::Bytes;

use crate::control::ControlMessage;
use crate::error::{HandoffError, Result};
use crate::handle::HandleFactory;
use crate::transport::RawChunk;

/// Unified event delivered to the stream consumer.
#[derive(Debug)]
pub struct ReadEvent<H> {
    /// Readable bytes in `data`; 0 when absent.
    pub nread: usize,
    /// Chunk payload.
    pub data: Option<Bytes>,
    /// Handle that arrived with this chunk.
    pub handle: Option<H>,
}

impl<H> ReadEvent<H> {
    /// Event without a handle.
    pub fn data_only(data: Option<Bytes>) -> Self {
        Self {
            nread: data.as_ref().map_or(0, Bytes::len),
            data,
            handle: None,
        }
    }

    /// Whether a handle is attached.
    #[inline]
    pub fn has_handle(&self) -> bool {
        self.handle.is_some()
    }
}

/// Decodes raw chunks into [`ReadEvent`]s.
#[derive(Debug, Clone, Default)]
pub struct HandleDemultiplexer<F> {
    factory: F,
}

impl<F: HandleFactory> HandleDemultiplexer<F> {
    /// Create a demultiplexer that builds handles with `factory`.
    pub fn new(factory: F) -> Self {
        Self { factory }
    }

    /// Access the handle factory.
    pub fn factory(&self) -> &F {
        &self.factory
    }

    /// Demultiplex one chunk.
    ///
    /// Returns an error only when a descriptor is present and its control
    /// bytes are not a decodable control message. The descriptor is closed
    /// in that case and whenever no handle is built.
    pub fn demux(&self, chunk: RawChunk) -> Result<ReadEvent<F::Handle>> {
        let RawChunk {
            buffer,
            control,
            fd,
        } = chunk;

        let Some(fd) = fd else {
            return Ok(ReadEvent::data_only(buffer));
        };

        let message = {
            let bytes = control
                .as_ref()
                .or(buffer.as_ref())
                .ok_or_else(|| {
                    HandoffError::Protocol("descriptor received without a control message".into())
                })?;
            ControlMessage::decode(bytes)?
        };

        if !message.is_node_handle() {
            tracing::warn!(
                "Ignoring descriptor with unrecognized control command {:?}",
                message.cmd
            );
            return Ok(ReadEvent::data_only(buffer));
        }

        let kind = message.handle_type();
        if !kind.is_known() {
            tracing::debug!("Ignoring descriptor with unknown handle type {:?}", message.kind);
            return Ok(ReadEvent::data_only(buffer));
        }

        let handle = self.factory.wrap(kind, fd)?;
        tracing::debug!("Received {:?} handle", kind);

        let mut event = ReadEvent::data_only(buffer);
        event.handle = Some(handle);
        Ok(event)
    }
}
