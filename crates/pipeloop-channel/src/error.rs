use std::time::Duration;

use pipeloop_io::PipeError;

/// Errors from channel lifecycle operations.
///
/// Steady-state transfer failures never surface here: the channel recovers
/// locally by closing itself during `advance`, observable only as
/// `is_closed() == true` with no further activity. The variants below belong
/// to the restricted startup and control paths; `ImmediateWrite*` errors are
/// fatal to the channel that returned them (it is closed first).
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// Connect, bind, accept or handle adoption could not establish the pipe.
    #[error("failed to open pipe channel: {0}")]
    Open(#[from] PipeError),

    /// The synchronous bypass write did not finish in time.
    #[error("immediate write timed out after {timeout:?}")]
    ImmediateWriteTimeout { timeout: Duration },

    /// The synchronous bypass write failed outright.
    #[error("immediate write failed: {0}")]
    ImmediateWrite(#[source] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ChannelError>;
