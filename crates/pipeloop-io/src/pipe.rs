use std::io;

use crate::wait::WaitSignal;

/// Transfer direction over a pipe handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Read,
    Write,
}

/// Resolution of an issued or polled transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoStatus {
    /// The transfer finished with this many bytes moved.
    Complete(usize),
    /// The transfer was accepted and has not resolved yet. Re-check with the
    /// matching `poll_*` call after the direction's wait signal fires.
    Pending,
}

/// A non-blocking asynchronous transfer primitive over a pipe-like handle.
///
/// Models the issue-then-poll completion shape: issuing a transfer either
/// completes synchronously, is accepted and left pending, or fails. At most
/// one transfer per direction may be pending at a time, and a failed call is
/// terminal for the handle as far as this layer is concerned — callers are
/// expected to tear the handle down rather than retry.
///
/// While a transfer is pending the caller must keep passing the same buffer
/// to `poll_read`/`poll_write` until the transfer resolves or is canceled;
/// completion-based backends hand that memory to the OS at issue time.
///
/// Writes resolve atomically: `Complete` always covers the entire buffer the
/// write was issued with. Reads may complete with any non-zero count up to
/// the buffer length.
pub trait PipeIo {
    /// Attempt to start reading into `buf`.
    fn issue_read(&mut self, buf: &mut [u8]) -> io::Result<IoStatus>;

    /// Attempt to start writing all of `buf`.
    fn issue_write(&mut self, buf: &[u8]) -> io::Result<IoStatus>;

    /// Re-check a pending read.
    fn poll_read(&mut self, buf: &mut [u8]) -> io::Result<IoStatus>;

    /// Re-check a pending write.
    fn poll_write(&mut self, buf: &[u8]) -> io::Result<IoStatus>;

    /// Abandon the direction's pending transfer, blocking until the OS has
    /// let go of the buffer. Any bytes the transfer moved are discarded.
    /// No-op when the direction is idle.
    fn cancel(&mut self, direction: Direction);

    /// The waitable the event loop blocks on while the direction has a
    /// pending transfer.
    fn wait_signal(&self, direction: Direction) -> WaitSignal;
}
