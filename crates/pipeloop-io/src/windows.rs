use std::io;
use std::os::windows::ffi::OsStrExt;
use std::os::windows::io::{AsRawHandle, FromRawHandle, OwnedHandle, RawHandle};
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, info};
use windows_sys::Win32::Foundation::{
    GetLastError, ERROR_IO_INCOMPLETE, ERROR_IO_PENDING, ERROR_PIPE_CONNECTED, GENERIC_READ,
    GENERIC_WRITE, HANDLE, INVALID_HANDLE_VALUE, WAIT_OBJECT_0, WAIT_TIMEOUT,
};
use windows_sys::Win32::Storage::FileSystem::{
    CreateFileW, ReadFile, WriteFile, FILE_FLAG_OVERLAPPED, OPEN_EXISTING,
};
use windows_sys::Win32::System::Pipes::{
    ConnectNamedPipe, CreateNamedPipeW, PIPE_ACCESS_DUPLEX, PIPE_READMODE_BYTE, PIPE_TYPE_BYTE,
    PIPE_WAIT,
};
use windows_sys::Win32::System::Threading::{CreateEventW, ResetEvent, WaitForSingleObject};
use windows_sys::Win32::System::IO::{CancelIoEx, GetOverlappedResult, OVERLAPPED};

use crate::error::{PipeError, Result};
use crate::pipe::{Direction, IoStatus, PipeIo};
use crate::wait::WaitSignal;

/// One direction's overlapped state: a manual-reset event that doubles as the
/// wait signal, and a boxed `OVERLAPPED` whose address stays stable while a
/// transfer is in the kernel's hands.
struct DirectionOp {
    event: OwnedHandle,
    overlapped: Box<OVERLAPPED>,
    pending: bool,
}

impl DirectionOp {
    fn new() -> io::Result<Self> {
        // SAFETY: manual-reset event, unnamed, default security.
        let event = unsafe { CreateEventW(std::ptr::null(), 1, 0, std::ptr::null()) };
        if event.is_null() {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: freshly created handle owned by this op from here on.
        let event = unsafe { OwnedHandle::from_raw_handle(event as RawHandle) };
        Ok(Self {
            event,
            // SAFETY: OVERLAPPED is plain data; all-zeroes is its documented
            // reset state.
            overlapped: Box::new(unsafe { std::mem::zeroed() }),
            pending: false,
        })
    }

    /// Reset the overlapped block for a fresh transfer.
    fn arm(&mut self) {
        // SAFETY: see `new`.
        *self.overlapped = unsafe { std::mem::zeroed() };
        self.overlapped.hEvent = self.event.as_raw_handle() as HANDLE;
    }

    fn event_handle(&self) -> HANDLE {
        self.event.as_raw_handle() as HANDLE
    }
}

/// Overlapped named-pipe backend.
///
/// The completion rendition of the issue-then-poll model: `ReadFile` /
/// `WriteFile` with an `OVERLAPPED` block either finish synchronously or
/// leave the transfer with the kernel, and polling is a non-blocking
/// `GetOverlappedResult`. Named-pipe byte-mode writes resolve whole, so the
/// atomic-or-pending contract holds natively.
pub struct NamedPipe {
    handle: OwnedHandle,
    read_op: DirectionOp,
    write_op: DirectionOp,
}

impl NamedPipe {
    /// Take ownership of an already-open pipe handle opened in overlapped
    /// mode.
    pub fn from_handle(handle: OwnedHandle) -> io::Result<Self> {
        Ok(Self {
            handle,
            read_op: DirectionOp::new()?,
            write_op: DirectionOp::new()?,
        })
    }

    /// Connect to an existing named-pipe server instance.
    pub fn connect(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let wide = wide_path(path);
        // SAFETY: `wide` is NUL-terminated and outlives the call.
        let handle = unsafe {
            CreateFileW(
                wide.as_ptr(),
                GENERIC_READ | GENERIC_WRITE,
                0,
                std::ptr::null(),
                OPEN_EXISTING,
                FILE_FLAG_OVERLAPPED,
                std::ptr::null_mut(),
            )
        };
        if handle == INVALID_HANDLE_VALUE {
            return Err(PipeError::Connect {
                path: path.to_path_buf(),
                source: io::Error::last_os_error(),
            });
        }
        // SAFETY: valid handle returned by CreateFileW, owned from here on.
        let handle = unsafe { OwnedHandle::from_raw_handle(handle as RawHandle) };
        debug!(?path, "connected to pipe endpoint");
        Self::from_handle(handle).map_err(PipeError::Io)
    }

    fn op_mut(&mut self, direction: Direction) -> &mut DirectionOp {
        match direction {
            Direction::Read => &mut self.read_op,
            Direction::Write => &mut self.write_op,
        }
    }

    fn poll_op(&mut self, direction: Direction) -> io::Result<IoStatus> {
        let handle = self.handle.as_raw_handle() as HANDLE;
        let op = self.op_mut(direction);
        debug_assert!(op.pending, "poll without a pending transfer");
        let mut actual: u32 = 0;
        // SAFETY: handle and overlapped belong to this pipe; bWait is FALSE
        // so the call never blocks.
        let ok = unsafe { GetOverlappedResult(handle, &*op.overlapped, &mut actual, 0) };
        if ok != 0 {
            // SAFETY: event owned by this op.
            unsafe { ResetEvent(op.event_handle()) };
            op.pending = false;
            return Ok(IoStatus::Complete(actual as usize));
        }
        // SAFETY: immediately after the failed call on this thread.
        match unsafe { GetLastError() } {
            ERROR_IO_INCOMPLETE => Ok(IoStatus::Pending),
            err => {
                op.pending = false;
                Err(io::Error::from_raw_os_error(err as i32))
            }
        }
    }
}

impl PipeIo for NamedPipe {
    fn issue_read(&mut self, buf: &mut [u8]) -> io::Result<IoStatus> {
        let handle = self.handle.as_raw_handle() as HANDLE;
        let op = &mut self.read_op;
        debug_assert!(!op.pending, "read issued while one is pending");
        op.arm();
        let mut actual: u32 = 0;
        // SAFETY: `buf` outlives the transfer per the PipeIo contract, and
        // the OVERLAPPED is boxed so its address is stable while pending.
        let ok = unsafe {
            ReadFile(
                handle,
                buf.as_mut_ptr(),
                buf.len() as u32,
                &mut actual,
                &mut *op.overlapped,
            )
        };
        if ok != 0 {
            // SAFETY: event owned by this op.
            unsafe { ResetEvent(op.event_handle()) };
            return Ok(IoStatus::Complete(actual as usize));
        }
        // SAFETY: immediately after the failed call on this thread.
        match unsafe { GetLastError() } {
            ERROR_IO_PENDING => {
                op.pending = true;
                Ok(IoStatus::Pending)
            }
            err => Err(io::Error::from_raw_os_error(err as i32)),
        }
    }

    fn issue_write(&mut self, buf: &[u8]) -> io::Result<IoStatus> {
        let handle = self.handle.as_raw_handle() as HANDLE;
        let op = &mut self.write_op;
        debug_assert!(!op.pending, "write issued while one is pending");
        op.arm();
        let mut actual: u32 = 0;
        // SAFETY: as for `issue_read`.
        let ok = unsafe {
            WriteFile(
                handle,
                buf.as_ptr(),
                buf.len() as u32,
                &mut actual,
                &mut *op.overlapped,
            )
        };
        if ok != 0 {
            // SAFETY: event owned by this op.
            unsafe { ResetEvent(op.event_handle()) };
            return Ok(IoStatus::Complete(actual as usize));
        }
        // SAFETY: immediately after the failed call on this thread.
        match unsafe { GetLastError() } {
            ERROR_IO_PENDING => {
                op.pending = true;
                Ok(IoStatus::Pending)
            }
            err => Err(io::Error::from_raw_os_error(err as i32)),
        }
    }

    fn poll_read(&mut self, _buf: &mut [u8]) -> io::Result<IoStatus> {
        self.poll_op(Direction::Read)
    }

    fn poll_write(&mut self, _buf: &[u8]) -> io::Result<IoStatus> {
        self.poll_op(Direction::Write)
    }

    fn cancel(&mut self, direction: Direction) {
        let handle = self.handle.as_raw_handle() as HANDLE;
        let op = self.op_mut(direction);
        if !op.pending {
            return;
        }
        // SAFETY: cancels only this direction's transfer; the blocking
        // GetOverlappedResult afterwards guarantees the kernel has let go of
        // the caller's buffer before we return.
        unsafe {
            CancelIoEx(handle, &*op.overlapped);
            let mut actual: u32 = 0;
            GetOverlappedResult(handle, &*op.overlapped, &mut actual, 1);
            ResetEvent(op.event_handle());
        }
        op.pending = false;
    }

    fn wait_signal(&self, direction: Direction) -> WaitSignal {
        let op = match direction {
            Direction::Read => &self.read_op,
            Direction::Write => &self.write_op,
        };
        WaitSignal::event(op.event.as_raw_handle())
    }
}

impl std::fmt::Debug for NamedPipe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NamedPipe")
            .field("handle", &self.handle.as_raw_handle())
            .finish()
    }
}

/// Server endpoint for pipe channels.
///
/// Creates a single byte-mode, overlapped named-pipe instance and waits for
/// one client with a bounded deadline.
pub struct PipeListener {
    handle: Option<OwnedHandle>,
    path: PathBuf,
}

impl PipeListener {
    const PIPE_BUFFER_SIZE: u32 = 8 * 1024;

    /// Create the named-pipe instance for `path` (a `\\.\pipe\…` name).
    pub fn bind(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let wide = wide_path(&path);
        // SAFETY: `wide` is NUL-terminated and outlives the call.
        let handle = unsafe {
            CreateNamedPipeW(
                wide.as_ptr(),
                PIPE_ACCESS_DUPLEX | FILE_FLAG_OVERLAPPED,
                PIPE_TYPE_BYTE | PIPE_READMODE_BYTE | PIPE_WAIT,
                1,
                Self::PIPE_BUFFER_SIZE,
                Self::PIPE_BUFFER_SIZE,
                0,
                std::ptr::null(),
            )
        };
        if handle == INVALID_HANDLE_VALUE {
            return Err(PipeError::Bind {
                path,
                source: io::Error::last_os_error(),
            });
        }
        info!(?path, "listening for pipe clients");
        Ok(Self {
            // SAFETY: valid instance handle, owned from here on.
            handle: Some(unsafe { OwnedHandle::from_raw_handle(handle as RawHandle) }),
            path,
        })
    }

    /// Accept one peer, blocking the caller for up to `timeout`.
    ///
    /// A client already connected to the instance counts as success. On
    /// timeout the endpoint stays usable for another attempt.
    pub fn accept_timeout(&mut self, timeout: Duration) -> Result<NamedPipe> {
        let Some(handle) = self.handle.take() else {
            return Err(PipeError::Accept(io::Error::other(
                "pipe endpoint already accepted",
            )));
        };
        let raw = handle.as_raw_handle() as HANDLE;
        let mut op = DirectionOp::new().map_err(PipeError::Accept)?;
        op.arm();

        // SAFETY: overlapped accept on the instance handle this listener owns.
        let ok = unsafe { ConnectNamedPipe(raw, &mut *op.overlapped) };
        if ok == 0 {
            // SAFETY: immediately after the failed call on this thread.
            match unsafe { GetLastError() } {
                ERROR_IO_PENDING => {
                    let timeout_ms = timeout.as_millis().min(u128::from(u32::MAX - 1)) as u32;
                    // SAFETY: event owned by `op`.
                    let rc = unsafe { WaitForSingleObject(op.event_handle(), timeout_ms) };
                    if rc == WAIT_TIMEOUT {
                        // SAFETY: resolve the canceled accept before reusing
                        // the instance handle.
                        unsafe {
                            CancelIoEx(raw, &*op.overlapped);
                            let mut actual: u32 = 0;
                            GetOverlappedResult(raw, &*op.overlapped, &mut actual, 1);
                        }
                        self.handle = Some(handle);
                        return Err(PipeError::AcceptTimeout {
                            path: self.path.clone(),
                            timeout,
                        });
                    }
                    if rc != WAIT_OBJECT_0 {
                        return Err(PipeError::Accept(io::Error::last_os_error()));
                    }
                    let mut actual: u32 = 0;
                    // SAFETY: the wait resolved, so the overlapped result is
                    // available without blocking.
                    let ok = unsafe { GetOverlappedResult(raw, &*op.overlapped, &mut actual, 0) };
                    if ok == 0 {
                        // SAFETY: immediately after the failed call.
                        let err = unsafe { GetLastError() };
                        if err != ERROR_PIPE_CONNECTED {
                            return Err(PipeError::Accept(io::Error::from_raw_os_error(
                                err as i32,
                            )));
                        }
                    }
                }
                // Client connected between instance creation and the accept.
                ERROR_PIPE_CONNECTED => {}
                err => {
                    return Err(PipeError::Accept(io::Error::from_raw_os_error(err as i32)))
                }
            }
        }
        debug!(path = ?self.path, "accepted pipe client");
        NamedPipe::from_handle(handle).map_err(PipeError::Accept)
    }

    /// The pipe name this endpoint was created with.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn wide_path(path: &Path) -> Vec<u16> {
    path.as_os_str()
        .encode_wide()
        .chain(std::iter::once(0))
        .collect()
}
