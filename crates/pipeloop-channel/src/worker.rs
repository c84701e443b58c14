use std::io;
use std::marker::PhantomData;

use bytes::BytesMut;
use pipeloop_io::{Direction, IoStatus, PipeIo, WaitSignal};

/// Upper bound on the bytes moved by a single OS transfer call. Global
/// configuration, not per-channel state.
pub const IO_CHUNK_SIZE: usize = 8 * 1024;

/// The queue state a direction policy works against during one advance step.
pub(crate) struct Queues<'a> {
    pub inbound: &'a mut BytesMut,
    pub outbound: &'a mut BytesMut,
    pub read_buffer_size: usize,
}

/// Direction-specific half of the worker: decides when the next transfer
/// should be issued and applies resolved ones.
pub(crate) trait IoPolicy {
    const DIRECTION: Direction;

    /// Size of the next transfer to issue, staging outbound bytes into
    /// `scratch` for writes. `None` keeps the direction idle this round.
    fn prepare(queues: &mut Queues<'_>, scratch: &mut [u8]) -> Option<usize>;

    /// Apply a resolved transfer of `actual` bytes out of `requested`.
    fn complete(queues: &mut Queues<'_>, scratch: &[u8], actual: usize, requested: usize);
}

/// Inbound policy: keep reading while the application has queue budget left.
pub(crate) struct Inbound;

impl IoPolicy for Inbound {
    const DIRECTION: Direction = Direction::Read;

    fn prepare(queues: &mut Queues<'_>, scratch: &mut [u8]) -> Option<usize> {
        (queues.inbound.len() < queues.read_buffer_size).then_some(scratch.len())
    }

    fn complete(queues: &mut Queues<'_>, scratch: &[u8], actual: usize, _requested: usize) {
        queues.inbound.extend_from_slice(&scratch[..actual]);
    }
}

/// Outbound policy: drain the queue one chunk at a time. The queue shrinks
/// when the chunk is staged, before the transfer is issued.
pub(crate) struct Outbound;

impl IoPolicy for Outbound {
    const DIRECTION: Direction = Direction::Write;

    fn prepare(queues: &mut Queues<'_>, scratch: &mut [u8]) -> Option<usize> {
        if queues.outbound.is_empty() {
            return None;
        }
        let size = queues.outbound.len().min(scratch.len());
        let chunk = queues.outbound.split_to(size);
        scratch[..size].copy_from_slice(&chunk);
        Some(size)
    }

    fn complete(_queues: &mut Queues<'_>, _scratch: &[u8], actual: usize, requested: usize) {
        // Byte-mode pipe writes resolve atomic-or-pending; anything short
        // means the transport broke its contract.
        assert_eq!(
            actual, requested,
            "pipe write resolved short: {actual} of {requested} bytes"
        );
    }
}

/// Shared per-direction transfer state machine.
///
/// Idle until a transfer is issued, in flight until the backend resolves it,
/// idle again on completion. A transfer failure is terminal and reported
/// once as `Err`; the channel reacts by closing itself.
pub(crate) struct IoWorker<P> {
    in_flight: Option<usize>,
    scratch: Box<[u8]>,
    _policy: PhantomData<P>,
}

pub(crate) type ReaderWorker = IoWorker<Inbound>;
pub(crate) type WriterWorker = IoWorker<Outbound>;

impl<P: IoPolicy> IoWorker<P> {
    pub fn new() -> Self {
        Self {
            in_flight: None,
            scratch: vec![0u8; IO_CHUNK_SIZE].into_boxed_slice(),
            _policy: PhantomData,
        }
    }

    /// One cooperative step: resolve the outstanding transfer if the backend
    /// has finished it, then issue further transfers while the policy wants
    /// them. Never blocks. Returns the bytes moved during this call.
    pub fn advance(&mut self, pipe: &mut dyn PipeIo, queues: &mut Queues<'_>) -> io::Result<usize> {
        let mut progress = 0;
        if let Some(requested) = self.in_flight {
            match self.poll_pipe(pipe, requested)? {
                IoStatus::Pending => return Ok(progress),
                IoStatus::Complete(actual) => {
                    self.in_flight = None;
                    P::complete(queues, &self.scratch, actual, requested);
                    progress += actual;
                }
            }
        }
        while let Some(requested) = P::prepare(queues, &mut self.scratch) {
            match self.issue_pipe(pipe, requested)? {
                IoStatus::Pending => {
                    self.in_flight = Some(requested);
                    return Ok(progress);
                }
                IoStatus::Complete(actual) => {
                    P::complete(queues, &self.scratch, actual, requested);
                    progress += actual;
                }
            }
        }
        Ok(progress)
    }

    fn poll_pipe(&mut self, pipe: &mut dyn PipeIo, requested: usize) -> io::Result<IoStatus> {
        match P::DIRECTION {
            Direction::Read => pipe.poll_read(&mut self.scratch[..requested]),
            Direction::Write => pipe.poll_write(&self.scratch[..requested]),
        }
    }

    fn issue_pipe(&mut self, pipe: &mut dyn PipeIo, requested: usize) -> io::Result<IoStatus> {
        match P::DIRECTION {
            Direction::Read => pipe.issue_read(&mut self.scratch[..requested]),
            Direction::Write => pipe.issue_write(&self.scratch[..requested]),
        }
    }

    /// True while an issued transfer has not resolved.
    pub fn is_in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    /// The completion signal, exposed only while in flight so idle workers
    /// never join the loop's wait set.
    pub fn wait_signal(&self, pipe: &dyn PipeIo) -> Option<WaitSignal> {
        self.in_flight.map(|_| pipe.wait_signal(P::DIRECTION))
    }

    /// Used only on the close path: resolve the canceled transfer and discard
    /// whatever it moved. No completion handler runs.
    pub fn wait_for_canceled(&mut self, pipe: &mut dyn PipeIo) {
        if self.in_flight.take().is_some() {
            pipe.cancel(P::DIRECTION);
        }
    }
}

impl WriterWorker {
    /// Bytes staged into the active transfer, still owed to the peer.
    pub fn pending_io_size(&self) -> usize {
        self.in_flight.unwrap_or(0)
    }
}
