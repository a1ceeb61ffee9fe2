//! Pipe configuration.

/// Default read buffer size per chunk.
pub const DEFAULT_READ_BUFFER_SIZE: usize = 64 * 1024;

/// Default number of descriptors accepted in a single read.
pub const DEFAULT_MAX_FDS_PER_READ: usize = 4;

/// Default environment variable advertising an inherited channel descriptor.
pub const DEFAULT_CHANNEL_ENV: &str = "HANDOFF_CHANNEL_FD";

/// Configuration for a pipe transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipeConfig {
    /// Handle-transfer mode. Fixed for the lifetime of the transport.
    pub ipc: bool,
    /// Size of the buffer each read fills; bounds a single chunk.
    pub read_buffer_size: usize,
    /// Control buffer capacity in descriptors. Extra descriptors are closed.
    pub max_fds_per_read: usize,
    /// Environment variable consulted by `open_inherited`.
    pub channel_env: String,
}

impl Default for PipeConfig {
    fn default() -> Self {
        Self {
            ipc: false,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            max_fds_per_read: DEFAULT_MAX_FDS_PER_READ,
            channel_env: DEFAULT_CHANNEL_ENV.to_string(),
        }
    }
}
