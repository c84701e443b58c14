use std::path::PathBuf;
use std::time::Duration;

/// Errors that can occur when opening or accepting pipe endpoints.
#[derive(Debug, thiserror::Error)]
pub enum PipeError {
    /// Failed to bind the server endpoint.
    #[error("failed to bind pipe endpoint {path}: {source}")]
    Bind {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to connect to an existing endpoint.
    #[error("failed to connect to pipe endpoint {path}: {source}")]
    Connect {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to accept an incoming client.
    #[error("failed to accept pipe client: {0}")]
    Accept(std::io::Error),

    /// No client connected within the accept deadline.
    #[error("no pipe client connected to {path} within {timeout:?}")]
    AcceptTimeout { path: PathBuf, timeout: Duration },

    /// The endpoint path is too long for the platform.
    #[error("pipe path too long ({len} bytes, max {max}): {path}")]
    PathTooLong {
        path: PathBuf,
        len: usize,
        max: usize,
    },

    /// An I/O error occurred on the pipe.
    #[error("pipe I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, PipeError>;
