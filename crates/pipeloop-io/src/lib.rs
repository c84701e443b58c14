//! Non-blocking pipe transfer primitives with pollable completions.
//!
//! This is the lowest layer of pipeloop. A [`PipeIo`] backend turns a
//! blocking OS pipe handle into the issue-then-poll transfer model the
//! channel layer is built on: issuing a transfer either completes
//! synchronously, stays pending, or fails, and a pending transfer exposes a
//! [`WaitSignal`] the cooperative loop can block on via [`wait`].
//!
//! Backends:
//! - Unix: [`unix::UnixPipe`] over a non-blocking descriptor (connected
//!   socket stream or adopted pipe end), plus [`unix::PipeListener`] for the
//!   server side.
//! - Windows: [`windows::NamedPipe`] over overlapped named-pipe I/O.

pub mod error;
pub mod pipe;
pub mod wait;

#[cfg(unix)]
pub mod unix;

#[cfg(windows)]
pub mod windows;

pub use error::{PipeError, Result};
pub use pipe::{Direction, IoStatus, PipeIo};
pub use wait::{wait, WaitSignal};

#[cfg(unix)]
pub use unix::{PipeListener, UnixPipe};

#[cfg(windows)]
pub use windows::{NamedPipe, PipeListener};
