//! Queue-buffered pipe channels for a single-threaded cooperative loop.
//!
//! A [`Channel`] converts one blocking OS pipe handle into a non-blocking,
//! bidirectional byte stream: writes land in an outbound queue, reads drain
//! an inbound queue, and one worker per direction moves bytes against the OS
//! in bounded chunks, with at most one in-flight transfer per direction.
//! The owning loop calls [`Channel::advance`] once per iteration for every
//! open channel and blocks on the union of the collected [`WaitSignal`]s.
//!
//! Backpressure is byte-count only: the reader stops issuing transfers once
//! the inbound queue reaches the configured capacity and resumes when the
//! application drains below it. No framing is imposed; bytes are opaque.

pub mod channel;
pub mod config;
pub mod error;

mod worker;

#[cfg(test)]
mod scripted;

pub use channel::{Channel, Role};
pub use config::ChannelConfig;
pub use error::{ChannelError, Result};
pub use worker::IO_CHUNK_SIZE;

pub use pipeloop_io::{wait, WaitSignal};
