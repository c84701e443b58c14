use std::time::Duration;

/// Tuning for a [`Channel`](crate::Channel).
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Inbound soft capacity in bytes; the backpressure threshold.
    pub read_buffer_size: usize,
    /// How long `accept_as_server` blocks waiting for a peer.
    pub accept_timeout: Duration,
    /// How long `write_immediately` may block.
    pub immediate_write_timeout: Duration,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            read_buffer_size: 64 * 1024,
            accept_timeout: Duration::from_secs(30),
            immediate_write_timeout: Duration::from_secs(30),
        }
    }
}
