//! Event-loop integration: waitable signals and the block-on-union point.
//!
//! Each open channel contributes the signals of its in-flight transfers to a
//! collection once per loop iteration; the loop then calls [`wait`] on the
//! union (optionally with a polling cadence) before advancing everything
//! again.

use std::io;
use std::time::Duration;

#[cfg(unix)]
use std::os::fd::RawFd;

#[cfg(windows)]
use std::os::windows::io::RawHandle;

/// Readiness interest of a Unix wait signal.
#[cfg(unix)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interest {
    Readable,
    Writable,
}

/// A waitable attached to a pending transfer.
///
/// On Unix this is a descriptor plus readiness interest, waited on with
/// `poll(2)`; on Windows it is a manual-reset event handle, waited on with
/// `WaitForMultipleObjects`. Signals are only meaningful for the loop
/// iteration they were collected in.
#[cfg(unix)]
#[derive(Debug, Clone, Copy)]
pub struct WaitSignal {
    fd: RawFd,
    interest: Interest,
}

#[cfg(unix)]
impl WaitSignal {
    pub fn readable(fd: RawFd) -> Self {
        Self {
            fd,
            interest: Interest::Readable,
        }
    }

    pub fn writable(fd: RawFd) -> Self {
        Self {
            fd,
            interest: Interest::Writable,
        }
    }

    pub fn fd(&self) -> RawFd {
        self.fd
    }

    pub fn interest(&self) -> Interest {
        self.interest
    }
}

/// Block until at least one signal fires or `timeout` elapses.
///
/// Returns the number of ready signals, 0 on timeout. `None` blocks
/// indefinitely. Safe to call with an empty slice, which just sleeps out the
/// timeout.
#[cfg(unix)]
pub fn wait(signals: &[WaitSignal], timeout: Option<Duration>) -> io::Result<usize> {
    let mut fds: Vec<libc::pollfd> = signals
        .iter()
        .map(|signal| libc::pollfd {
            fd: signal.fd,
            events: match signal.interest {
                Interest::Readable => libc::POLLIN,
                Interest::Writable => libc::POLLOUT,
            },
            revents: 0,
        })
        .collect();

    let timeout_ms: libc::c_int = match timeout {
        Some(t) => t.as_millis().min(libc::c_int::MAX as u128) as libc::c_int,
        None => -1,
    };

    loop {
        // SAFETY: `fds` is a valid array of `fds.len()` pollfd entries for
        // the duration of the call.
        let rc = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, timeout_ms) };
        if rc >= 0 {
            return Ok(rc as usize);
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}

/// A waitable attached to a pending transfer (Windows: a manual-reset event).
#[cfg(windows)]
#[derive(Debug, Clone, Copy)]
pub struct WaitSignal {
    handle: RawHandle,
}

#[cfg(windows)]
impl WaitSignal {
    pub fn event(handle: RawHandle) -> Self {
        Self { handle }
    }

    pub fn handle(&self) -> RawHandle {
        self.handle
    }
}

/// Block until at least one signal fires or `timeout` elapses.
///
/// Returns 1 when a signal fired, 0 on timeout. Subject to the
/// `WaitForMultipleObjects` limit of 64 handles per call.
#[cfg(windows)]
pub fn wait(signals: &[WaitSignal], timeout: Option<Duration>) -> io::Result<usize> {
    use windows_sys::Win32::Foundation::{WAIT_FAILED, WAIT_TIMEOUT};
    use windows_sys::Win32::System::Threading::{WaitForMultipleObjects, INFINITE};

    if signals.is_empty() {
        if let Some(t) = timeout {
            std::thread::sleep(t);
        }
        return Ok(0);
    }

    let handles: Vec<windows_sys::Win32::Foundation::HANDLE> =
        signals.iter().map(|signal| signal.handle as _).collect();
    let timeout_ms = match timeout {
        Some(t) => t.as_millis().min(u128::from(INFINITE - 1)) as u32,
        None => INFINITE,
    };

    // SAFETY: `handles` is a valid array of open event handles for the
    // duration of the call.
    let rc = unsafe {
        WaitForMultipleObjects(handles.len() as u32, handles.as_ptr(), 0, timeout_ms)
    };
    if rc == WAIT_TIMEOUT {
        return Ok(0);
    }
    if rc == WAIT_FAILED {
        return Err(io::Error::last_os_error());
    }
    Ok(1)
}
