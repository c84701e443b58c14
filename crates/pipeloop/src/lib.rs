//! Queue-buffered asynchronous pipe channels for cooperative event loops.
//!
//! pipeloop turns a blocking OS pipe handle into a non-blocking,
//! bidirectional byte-stream channel with explicit per-direction state
//! machines, byte-count backpressure and deterministic cancellation, driven
//! by a single-threaded cooperative loop.
//!
//! # Crate Structure
//!
//! - [`io`] — Non-blocking transfer primitives and the wait/poll
//!   event-loop integration
//! - [`channel`] — The queue-buffered [`Channel`](channel::Channel) and its
//!   advance/wait contract

/// Re-export transfer primitive types.
pub mod io {
    pub use pipeloop_io::*;
}

/// Re-export channel types.
pub mod channel {
    pub use pipeloop_channel::*;
}
