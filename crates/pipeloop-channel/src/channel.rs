use std::path::Path;
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use tracing::debug;

use pipeloop_io::{wait, Direction, IoStatus, PipeError, PipeIo, WaitSignal};

#[cfg(unix)]
use pipeloop_io::unix::{PipeListener, UnixPipe};
#[cfg(windows)]
use pipeloop_io::windows::{NamedPipe, PipeListener};

#[cfg(unix)]
type OsPipe = UnixPipe;
#[cfg(windows)]
type OsPipe = NamedPipe;

use crate::config::ChannelConfig;
use crate::error::{ChannelError, Result};
use crate::worker::{Queues, ReaderWorker, WriterWorker};

/// Which workers an adopted handle gets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Inbound only: the handle is the read end of a one-way pipe.
    Read,
    /// Outbound only: the handle is the write end of a one-way pipe.
    Write,
    /// Both directions over one full-duplex handle.
    Duplex,
}

/// A queue-buffered, bidirectional byte stream over one OS pipe handle.
///
/// Created closed; opened through exactly one of [`connect_to_server`],
/// [`accept_as_server`] or handle adoption. While open, the owning
/// cooperative loop must call [`advance`] once per iteration and block on
/// the union of the collected wait signals before the next one.
///
/// All queue operations (`write`, `read`, `peek`, the byte counts) are
/// non-blocking and infallible. A failed transfer closes the channel from
/// inside `advance`; there is no error callback and no retry.
///
/// [`connect_to_server`]: Channel::connect_to_server
/// [`accept_as_server`]: Channel::accept_as_server
/// [`advance`]: Channel::advance
pub struct Channel {
    name: String,
    pipe: Option<Box<dyn PipeIo>>,
    inbound: BytesMut,
    outbound: BytesMut,
    config: ChannelConfig,
    reader: Option<ReaderWorker>,
    writer: Option<WriterWorker>,
}

impl Channel {
    /// A closed channel with default tuning.
    pub fn new() -> Self {
        Self::with_config(ChannelConfig::default())
    }

    /// A closed channel with explicit tuning.
    pub fn with_config(config: ChannelConfig) -> Self {
        Self {
            name: String::new(),
            pipe: None,
            inbound: BytesMut::new(),
            outbound: BytesMut::new(),
            config,
            reader: None,
            writer: None,
        }
    }

    /// Connect to an existing server endpoint, full duplex.
    ///
    /// On failure the channel stays closed and the error is returned; this
    /// path never aborts.
    pub fn connect_to_server(&mut self, path: impl AsRef<Path>) -> Result<()> {
        assert!(self.is_closed(), "channel is already open");
        let path = path.as_ref();
        let pipe = OsPipe::connect(path)?;
        self.adopt_io(Box::new(pipe), Role::Duplex, path.display().to_string());
        Ok(())
    }

    /// Bind `path` and block the calling context — not the cooperative loop —
    /// until a peer connects or the configured accept timeout elapses.
    ///
    /// A client already queued on the endpoint counts as success. This runs
    /// once, during a bounded startup handshake; a timeout or failure is
    /// fatal for the endpoint and the caller is expected to give up.
    pub fn accept_as_server(&mut self, path: impl AsRef<Path>) -> Result<()> {
        assert!(self.is_closed(), "channel is already open");
        let path = path.as_ref();
        let mut listener = PipeListener::bind(path)?;
        let pipe = listener.accept_timeout(self.config.accept_timeout)?;
        self.adopt_io(Box::new(pipe), Role::Duplex, path.display().to_string());
        Ok(())
    }

    /// Take ownership of an already-open descriptor — typically a one-way
    /// pipe end inherited from a parent process — and allocate only the
    /// matching worker.
    #[cfg(unix)]
    pub fn adopt_fd(
        &mut self,
        fd: std::os::fd::OwnedFd,
        role: Role,
        name: impl Into<String>,
    ) -> Result<()> {
        let pipe = UnixPipe::from_fd(fd).map_err(PipeError::from)?;
        self.adopt_io(Box::new(pipe), role, name);
        Ok(())
    }

    /// Take ownership of an already-open pipe handle and allocate only the
    /// matching worker.
    #[cfg(windows)]
    pub fn adopt_handle(
        &mut self,
        handle: std::os::windows::io::OwnedHandle,
        role: Role,
        name: impl Into<String>,
    ) -> Result<()> {
        let pipe = NamedPipe::from_handle(handle).map_err(PipeError::from)?;
        self.adopt_io(Box::new(pipe), role, name);
        Ok(())
    }

    /// Take ownership of an arbitrary transfer backend.
    ///
    /// This is the backend-agnostic form of handle adoption; the other open
    /// paths funnel through it.
    pub fn adopt_io(&mut self, pipe: Box<dyn PipeIo>, role: Role, name: impl Into<String>) {
        assert!(self.is_closed(), "channel is already open");
        self.name = name.into();
        self.pipe = Some(pipe);
        if role != Role::Write {
            self.reader = Some(ReaderWorker::new());
        }
        if role != Role::Read {
            self.writer = Some(WriterWorker::new());
        }
        debug!(name = %self.name, ?role, "pipe channel opened");
    }

    /// One cooperative step. Never blocks.
    ///
    /// Steps each present worker; if either reports a fatal transfer error
    /// the channel closes itself. Otherwise each in-flight worker's
    /// completion signal is appended to `signals` for the loop to wait on.
    /// Returns true iff bytes moved, a transfer became pending during this
    /// call, or an error occurred.
    pub fn advance(&mut self, signals: &mut Vec<WaitSignal>) -> bool {
        let Some(pipe) = self.pipe.as_mut() else {
            return false;
        };
        let mut queues = Queues {
            inbound: &mut self.inbound,
            outbound: &mut self.outbound,
            read_buffer_size: self.config.read_buffer_size,
        };

        let mut moved = 0;
        let mut went_in_flight = false;
        let mut fault = None;

        if let Some(reader) = self.reader.as_mut() {
            let was_in_flight = reader.is_in_flight();
            match reader.advance(pipe.as_mut(), &mut queues) {
                Ok(count) => moved += count,
                Err(err) => fault = Some(("read", err)),
            }
            went_in_flight |= !was_in_flight && reader.is_in_flight();
        }
        if let Some(writer) = self.writer.as_mut() {
            let was_in_flight = writer.is_in_flight();
            match writer.advance(pipe.as_mut(), &mut queues) {
                Ok(count) => moved += count,
                Err(err) => fault = Some(("write", err)),
            }
            went_in_flight |= !was_in_flight && writer.is_in_flight();
        }

        if let Some((direction, err)) = fault {
            debug!(name = %self.name, direction, %err, "transfer failed; closing channel");
            self.close();
            return true;
        }

        if let Some(pipe) = self.pipe.as_deref() {
            if let Some(reader) = &self.reader {
                if let Some(signal) = reader.wait_signal(pipe) {
                    signals.push(signal);
                }
            }
            if let Some(writer) = &self.writer {
                if let Some(signal) = writer.wait_signal(pipe) {
                    signals.push(signal);
                }
            }
        }

        moved > 0 || went_in_flight
    }

    /// Queue bytes for transmission. Never blocks; the actual transfer
    /// happens on subsequent [`advance`](Channel::advance) calls.
    pub fn write(&mut self, data: &[u8]) {
        self.outbound.extend_from_slice(data);
    }

    /// Synchronous bypass of the outbound queue for rare, size-bounded
    /// control writes.
    ///
    /// Blocks until the bytes are fully written or the configured timeout
    /// elapses. Requires a write-capable channel with no queued write in
    /// flight. On timeout or error the channel is closed and a fatal error
    /// returned.
    pub fn write_immediately(&mut self, data: &[u8]) -> Result<()> {
        assert!(
            self.writer.as_ref().is_some_and(|w| !w.is_in_flight()),
            "write_immediately requires an idle write-capable channel"
        );
        let timeout = self.config.immediate_write_timeout;
        let result = match self.pipe.as_mut() {
            Some(pipe) => write_now(pipe.as_mut(), data, timeout),
            None => unreachable!("open channel invariant: worker present without a handle"),
        };
        if result.is_err() {
            self.close();
        }
        result
    }

    /// Outbound queue length plus bytes mid-flight in an active write.
    pub fn bytes_to_send(&self) -> usize {
        self.outbound.len() + self.writer.as_ref().map_or(0, WriterWorker::pending_io_size)
    }

    /// Inbound queue length.
    pub fn bytes_available(&self) -> usize {
        self.inbound.len()
    }

    /// Remove and return up to `max` bytes from the inbound queue, in
    /// arrival order. Zero bytes is a valid result.
    pub fn read(&mut self, max: usize) -> Bytes {
        let size = max.min(self.inbound.len());
        self.inbound.split_to(size).freeze()
    }

    /// Remove and return the entire inbound queue.
    pub fn read_all(&mut self) -> Bytes {
        let size = self.inbound.len();
        self.inbound.split_to(size).freeze()
    }

    /// Copy up to `buf.len()` queued bytes into `buf` without removing them.
    /// Returns the number of bytes copied.
    pub fn peek(&self, buf: &mut [u8]) -> usize {
        let size = buf.len().min(self.inbound.len());
        buf[..size].copy_from_slice(&self.inbound[..size]);
        size
    }

    /// The inbound soft capacity; the backpressure threshold.
    pub fn read_buffer_size(&self) -> usize {
        self.config.read_buffer_size
    }

    /// Set the inbound soft capacity. Reads stop being issued once the
    /// queue reaches this size and resume when the application drains it
    /// below it.
    pub fn set_read_buffer_size(&mut self, size: usize) {
        self.config.read_buffer_size = size;
    }

    /// Cancel in-flight transfers, wait for the OS to let go of them, and
    /// release the workers and the handle. Idempotent.
    pub fn close(&mut self) {
        let Some(mut pipe) = self.pipe.take() else {
            return;
        };
        if let Some(mut reader) = self.reader.take() {
            reader.wait_for_canceled(pipe.as_mut());
        }
        if let Some(mut writer) = self.writer.take() {
            writer.wait_for_canceled(pipe.as_mut());
        }
        debug!(name = %self.name, "pipe channel closed");
    }

    /// True iff no handle is owned.
    pub fn is_closed(&self) -> bool {
        self.pipe.is_none()
    }

    /// Diagnostic name, set when the channel was opened.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Default for Channel {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("name", &self.name)
            .field("closed", &self.is_closed())
            .field("bytes_available", &self.bytes_available())
            .field("bytes_to_send", &self.bytes_to_send())
            .finish()
    }
}

fn write_now(pipe: &mut dyn PipeIo, data: &[u8], timeout: Duration) -> Result<()> {
    let deadline = Instant::now() + timeout;
    let mut status = pipe.issue_write(data).map_err(ChannelError::ImmediateWrite)?;
    loop {
        match status {
            IoStatus::Complete(actual) => {
                assert_eq!(
                    actual,
                    data.len(),
                    "pipe write resolved short: {actual} of {} bytes",
                    data.len()
                );
                return Ok(());
            }
            IoStatus::Pending => {
                let now = Instant::now();
                if now >= deadline {
                    pipe.cancel(Direction::Write);
                    return Err(ChannelError::ImmediateWriteTimeout { timeout });
                }
                wait(&[pipe.wait_signal(Direction::Write)], Some(deadline - now))
                    .map_err(ChannelError::ImmediateWrite)?;
                status = pipe.poll_write(data).map_err(ChannelError::ImmediateWrite)?;
            }
        }
    }
}
