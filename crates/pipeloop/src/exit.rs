use std::fmt;
use std::io;

use pipeloop_channel::ChannelError;
use pipeloop_io::PipeError;

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const PERMISSION_DENIED: i32 = 50;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::ConnectionRefused | io::ErrorKind::NotFound => FAILURE,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn pipe_error(context: &str, err: PipeError) -> CliError {
    match err {
        PipeError::AcceptTimeout { .. } => CliError::new(TIMEOUT, format!("{context}: {err}")),
        PipeError::PathTooLong { .. } => CliError::new(USAGE, format!("{context}: {err}")),
        PipeError::Bind { source, .. }
        | PipeError::Connect { source, .. }
        | PipeError::Accept(source)
        | PipeError::Io(source) => io_error(context, source),
    }
}

pub fn channel_error(context: &str, err: ChannelError) -> CliError {
    match err {
        ChannelError::Open(err) => pipe_error(context, err),
        ChannelError::ImmediateWriteTimeout { .. } => {
            CliError::new(TIMEOUT, format!("{context}: {err}"))
        }
        ChannelError::ImmediateWrite(source) => io_error(context, source),
    }
}
