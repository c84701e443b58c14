//! Deterministic in-memory backend for state-machine tests.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::io;
use std::rc::Rc;

use pipeloop_io::{Direction, IoStatus, PipeIo, WaitSignal};

/// Outcome of the next read attempt (issue or poll).
pub(crate) enum ReadStep {
    /// Deliver these bytes.
    Data(Vec<u8>),
    /// Stay pending.
    Pending,
    /// Fail the transfer.
    Fail,
}

/// Outcome of the next write attempt (issue or poll).
pub(crate) enum WriteStep {
    /// Stay pending.
    Pending,
    /// Fail the transfer.
    Fail,
    /// Resolve with fewer bytes than requested.
    Short(usize),
}

#[derive(Default)]
struct Inner {
    reads: VecDeque<ReadStep>,
    writes: VecDeque<WriteStep>,
    sent: Vec<u8>,
    read_attempts: usize,
    canceled: Vec<Direction>,
}

/// Scripted [`PipeIo`].
///
/// Each read or write attempt pops the next scripted outcome. An exhausted
/// read script stays pending (no data has arrived), an exhausted write
/// script accepts and records the chunk (the happy path), so tests only
/// script the interesting deviations. The handle is cheaply cloneable so a
/// test can keep inspecting state after boxing it into a channel.
#[derive(Clone, Default)]
pub(crate) struct ScriptedPipe(Rc<RefCell<Inner>>);

impl ScriptedPipe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn boxed(&self) -> Box<dyn PipeIo> {
        Box::new(self.clone())
    }

    pub fn push_read(&self, step: ReadStep) {
        self.0.borrow_mut().reads.push_back(step);
    }

    pub fn push_write(&self, step: WriteStep) {
        self.0.borrow_mut().writes.push_back(step);
    }

    /// Everything successfully written so far, across chunks.
    pub fn sent(&self) -> Vec<u8> {
        self.0.borrow().sent.clone()
    }

    pub fn read_attempts(&self) -> usize {
        self.0.borrow().read_attempts
    }

    pub fn canceled(&self) -> Vec<Direction> {
        self.0.borrow().canceled.clone()
    }

    fn read_step(&mut self, buf: &mut [u8]) -> io::Result<IoStatus> {
        let mut inner = self.0.borrow_mut();
        inner.read_attempts += 1;
        match inner.reads.pop_front() {
            Some(ReadStep::Data(bytes)) => {
                assert!(
                    bytes.len() <= buf.len(),
                    "scripted read larger than the issued buffer"
                );
                buf[..bytes.len()].copy_from_slice(&bytes);
                Ok(IoStatus::Complete(bytes.len()))
            }
            Some(ReadStep::Pending) | None => Ok(IoStatus::Pending),
            Some(ReadStep::Fail) => Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "scripted read failure",
            )),
        }
    }

    fn write_step(&mut self, buf: &[u8]) -> io::Result<IoStatus> {
        let mut inner = self.0.borrow_mut();
        match inner.writes.pop_front() {
            None => {
                inner.sent.extend_from_slice(buf);
                Ok(IoStatus::Complete(buf.len()))
            }
            Some(WriteStep::Pending) => Ok(IoStatus::Pending),
            Some(WriteStep::Fail) => Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "scripted write failure",
            )),
            Some(WriteStep::Short(size)) => Ok(IoStatus::Complete(size)),
        }
    }
}

impl PipeIo for ScriptedPipe {
    fn issue_read(&mut self, buf: &mut [u8]) -> io::Result<IoStatus> {
        self.read_step(buf)
    }

    fn issue_write(&mut self, buf: &[u8]) -> io::Result<IoStatus> {
        self.write_step(buf)
    }

    fn poll_read(&mut self, buf: &mut [u8]) -> io::Result<IoStatus> {
        self.read_step(buf)
    }

    fn poll_write(&mut self, buf: &[u8]) -> io::Result<IoStatus> {
        self.write_step(buf)
    }

    fn cancel(&mut self, direction: Direction) {
        self.0.borrow_mut().canceled.push(direction);
    }

    fn wait_signal(&self, _direction: Direction) -> WaitSignal {
        // Signal identity is irrelevant for scripted runs; tests only count
        // the signals a channel contributes.
        #[cfg(unix)]
        {
            WaitSignal::readable(0)
        }
        #[cfg(windows)]
        {
            WaitSignal::event(std::ptr::null_mut())
        }
    }
}
