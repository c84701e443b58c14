use std::io;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::os::unix::fs::{FileTypeExt, MetadataExt, PermissionsExt};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::error::{PipeError, Result};
use crate::pipe::{Direction, IoStatus, PipeIo};
use crate::wait::{wait, WaitSignal};

/// Non-blocking pipe backend over a Unix descriptor.
///
/// This is the readiness rendition of the issue-then-poll model: issuing a
/// transfer attempts the syscall immediately, `EWOULDBLOCK` leaves it
/// pending, and polling re-attempts once the descriptor signals readiness.
///
/// Writes track a partial-transfer offset internally, so a write transfer
/// only resolves once every requested byte has been flushed — the
/// atomic-or-pending contract of [`PipeIo`] holds even when the kernel
/// accepts a chunk piecemeal.
pub struct UnixPipe {
    fd: OwnedFd,
    partial_write: Option<PartialWrite>,
}

struct PartialWrite {
    requested: usize,
    written: usize,
}

impl UnixPipe {
    /// Wrap an already-connected stream, switching it to non-blocking mode.
    pub fn from_stream(stream: UnixStream) -> io::Result<Self> {
        stream.set_nonblocking(true)?;
        Ok(Self {
            fd: stream.into(),
            partial_write: None,
        })
    }

    /// Take ownership of an arbitrary open descriptor — typically a pipe end
    /// inherited from a parent process — and switch it to non-blocking mode.
    pub fn from_fd(fd: OwnedFd) -> io::Result<Self> {
        set_nonblocking(fd.as_raw_fd())?;
        Ok(Self {
            fd,
            partial_write: None,
        })
    }

    /// A connected duplex pair; the in-process loopback used by tests and
    /// demos.
    pub fn pair() -> io::Result<(Self, Self)> {
        let (left, right) = UnixStream::pair()?;
        Ok((Self::from_stream(left)?, Self::from_stream(right)?))
    }

    /// Connect to a listening pipe endpoint.
    pub fn connect(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let stream = UnixStream::connect(path).map_err(|e| PipeError::Connect {
            path: path.to_path_buf(),
            source: e,
        })?;
        let pipe = Self::from_stream(stream).map_err(|e| PipeError::Connect {
            path: path.to_path_buf(),
            source: e,
        })?;
        debug!(?path, "connected to pipe endpoint");
        Ok(pipe)
    }

    fn read_step(&mut self, buf: &mut [u8]) -> io::Result<IoStatus> {
        if buf.is_empty() {
            return Ok(IoStatus::Complete(0));
        }
        loop {
            // SAFETY: `buf` is a valid writable region of `buf.len()` bytes
            // and `fd` is an open descriptor owned by this pipe.
            let rc =
                unsafe { libc::read(self.fd.as_raw_fd(), buf.as_mut_ptr().cast(), buf.len()) };
            if rc > 0 {
                return Ok(IoStatus::Complete(rc as usize));
            }
            if rc == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "pipe closed by peer",
                ));
            }
            let err = io::Error::last_os_error();
            match err.kind() {
                io::ErrorKind::Interrupted => continue,
                io::ErrorKind::WouldBlock => return Ok(IoStatus::Pending),
                _ => return Err(err),
            }
        }
    }

    fn write_step(&mut self, buf: &[u8]) -> io::Result<IoStatus> {
        let state = self.partial_write.get_or_insert(PartialWrite {
            requested: buf.len(),
            written: 0,
        });
        debug_assert_eq!(
            state.requested,
            buf.len(),
            "pending write polled with a different buffer"
        );
        while state.written < state.requested {
            let remaining = &buf[state.written..];
            // SAFETY: `remaining` is a valid readable region and `fd` is an
            // open descriptor owned by this pipe.
            let rc = unsafe {
                libc::write(
                    self.fd.as_raw_fd(),
                    remaining.as_ptr().cast(),
                    remaining.len(),
                )
            };
            if rc >= 0 {
                state.written += rc as usize;
                continue;
            }
            let err = io::Error::last_os_error();
            match err.kind() {
                io::ErrorKind::Interrupted => continue,
                io::ErrorKind::WouldBlock => return Ok(IoStatus::Pending),
                _ => {
                    self.partial_write = None;
                    return Err(err);
                }
            }
        }
        let requested = state.requested;
        self.partial_write = None;
        Ok(IoStatus::Complete(requested))
    }
}

impl PipeIo for UnixPipe {
    fn issue_read(&mut self, buf: &mut [u8]) -> io::Result<IoStatus> {
        self.read_step(buf)
    }

    fn issue_write(&mut self, buf: &[u8]) -> io::Result<IoStatus> {
        debug_assert!(
            self.partial_write.is_none(),
            "write issued while one is pending"
        );
        self.write_step(buf)
    }

    fn poll_read(&mut self, buf: &mut [u8]) -> io::Result<IoStatus> {
        self.read_step(buf)
    }

    fn poll_write(&mut self, buf: &[u8]) -> io::Result<IoStatus> {
        self.write_step(buf)
    }

    fn cancel(&mut self, direction: Direction) {
        // Nothing sits inside the kernel in the readiness model; forgetting
        // the partial-write offset is the whole cancellation.
        if direction == Direction::Write {
            self.partial_write = None;
        }
    }

    fn wait_signal(&self, direction: Direction) -> WaitSignal {
        match direction {
            Direction::Read => WaitSignal::readable(self.fd.as_raw_fd()),
            Direction::Write => WaitSignal::writable(self.fd.as_raw_fd()),
        }
    }
}

impl std::fmt::Debug for UnixPipe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnixPipe")
            .field("fd", &self.fd.as_raw_fd())
            .finish()
    }
}

fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    // SAFETY: F_GETFL/F_SETFL on an open descriptor; no pointers involved.
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    if flags & libc::O_NONBLOCK != 0 {
        return Ok(());
    }
    let rc = unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Server endpoint for pipe channels.
///
/// Binds a filesystem-path endpoint and accepts one peer at a time with a
/// bounded deadline. If the path already holds a stale socket it is removed
/// first; non-socket files are never removed. Cleanup on `Drop` re-checks the
/// inode so a replaced path is left alone.
pub struct PipeListener {
    listener: UnixListener,
    path: PathBuf,
    created_inode: Option<(u64, u64)>,
    /// Whether the path should be removed on drop.
    cleanup_on_drop: bool,
}

impl PipeListener {
    /// Default permission mode for created endpoint paths.
    pub const DEFAULT_SOCKET_MODE: u32 = 0o600;
    /// Maximum endpoint path length.
    /// Unix `sockaddr_un.sun_path` is typically 108 bytes on Linux, 104 on macOS.
    #[cfg(target_os = "linux")]
    const MAX_PATH_LEN: usize = 108;
    #[cfg(target_os = "macos")]
    const MAX_PATH_LEN: usize = 104;
    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    const MAX_PATH_LEN: usize = 104;

    /// Bind and listen on a filesystem-path endpoint.
    pub fn bind(path: impl AsRef<Path>) -> Result<Self> {
        Self::bind_with_mode(path, Self::DEFAULT_SOCKET_MODE)
    }

    /// Bind and listen on a filesystem-path endpoint with explicit mode.
    pub fn bind_with_mode(path: impl AsRef<Path>, mode: u32) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let path_bytes = path.as_os_str().len();
        if path_bytes >= Self::MAX_PATH_LEN {
            return Err(PipeError::PathTooLong {
                path,
                len: path_bytes,
                max: Self::MAX_PATH_LEN,
            });
        }

        // Remove stale sockets, but never remove non-socket files.
        if path.exists() {
            let metadata = std::fs::symlink_metadata(&path).map_err(|e| PipeError::Bind {
                path: path.clone(),
                source: e,
            })?;
            if metadata.file_type().is_socket() {
                debug!(?path, "removing stale pipe endpoint");
                std::fs::remove_file(&path).map_err(|e| PipeError::Bind {
                    path: path.clone(),
                    source: e,
                })?;
            } else {
                return Err(PipeError::Bind {
                    path: path.clone(),
                    source: std::io::Error::new(
                        std::io::ErrorKind::AlreadyExists,
                        "existing path is not a pipe endpoint",
                    ),
                });
            }
        }

        let listener = UnixListener::bind(&path).map_err(|e| PipeError::Bind {
            path: path.clone(),
            source: e,
        })?;
        // Non-blocking so accepts can honor a deadline.
        listener.set_nonblocking(true).map_err(|e| PipeError::Bind {
            path: path.clone(),
            source: e,
        })?;

        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(mode)).map_err(|e| {
            PipeError::Bind {
                path: path.clone(),
                source: e,
            }
        })?;
        let created_metadata = std::fs::symlink_metadata(&path).map_err(|e| PipeError::Bind {
            path: path.clone(),
            source: e,
        })?;
        let created_inode = Some((created_metadata.dev(), created_metadata.ino()));

        info!(?path, "listening for pipe clients");

        Ok(Self {
            listener,
            path,
            created_inode,
            cleanup_on_drop: true,
        })
    }

    /// Accept one peer, blocking the caller for up to `timeout`.
    ///
    /// A client already queued on the listener completes immediately.
    pub fn accept_timeout(&mut self, timeout: Duration) -> Result<UnixPipe> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.listener.accept() {
                Ok((stream, _addr)) => {
                    debug!(path = ?self.path, "accepted pipe client");
                    return UnixPipe::from_stream(stream).map_err(PipeError::Accept);
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(PipeError::AcceptTimeout {
                            path: self.path.clone(),
                            timeout,
                        });
                    }
                    let signal = WaitSignal::readable(self.listener.as_raw_fd());
                    wait(&[signal], Some(deadline - now)).map_err(PipeError::Accept)?;
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(PipeError::Accept(err)),
            }
        }
    }

    /// The path this endpoint is bound to.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PipeListener {
    fn drop(&mut self) {
        if self.cleanup_on_drop {
            if let Some((expected_dev, expected_ino)) = self.created_inode {
                if let Ok(metadata) = std::fs::symlink_metadata(&self.path) {
                    if metadata.file_type().is_socket()
                        && metadata.dev() == expected_dev
                        && metadata.ino() == expected_ino
                    {
                        debug!(path = ?self.path, "cleaning up pipe endpoint");
                        let _ = std::fs::remove_file(&self.path);
                    } else {
                        debug!(
                            path = ?self.path,
                            "endpoint path identity changed; skipping cleanup"
                        );
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("pipeloop-{}-{}", tag, std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir.join("test.sock")
    }

    fn drain(pipe: &mut UnixPipe, buf: &mut [u8]) -> Vec<u8> {
        let mut out = Vec::new();
        while let IoStatus::Complete(n) = pipe.issue_read(buf).unwrap() {
            out.extend_from_slice(&buf[..n]);
        }
        out
    }

    #[test]
    fn read_is_pending_until_peer_writes() {
        let (mut left, mut right) = UnixPipe::pair().unwrap();
        let mut buf = [0u8; 64];

        assert_eq!(left.issue_read(&mut buf).unwrap(), IoStatus::Pending);

        assert_eq!(
            right.issue_write(b"hello").unwrap(),
            IoStatus::Complete(5)
        );
        wait(&[left.wait_signal(Direction::Read)], Some(Duration::from_secs(5))).unwrap();
        assert_eq!(left.poll_read(&mut buf).unwrap(), IoStatus::Complete(5));
        assert_eq!(&buf[..5], b"hello");
    }

    #[test]
    fn peer_hangup_is_a_transfer_error() {
        let (mut left, right) = UnixPipe::pair().unwrap();
        drop(right);

        let mut buf = [0u8; 16];
        let err = left.issue_read(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn oversized_write_stays_pending_until_fully_flushed() {
        let (mut left, mut right) = UnixPipe::pair().unwrap();

        // Large enough to overflow any default socket buffer.
        let payload: Vec<u8> = (0..4 * 1024 * 1024).map(|i| (i % 251) as u8).collect();
        let mut status = left.issue_write(&payload).unwrap();

        let mut received = Vec::new();
        let mut buf = [0u8; 64 * 1024];
        while status == IoStatus::Pending {
            received.extend_from_slice(&drain(&mut right, &mut buf));
            status = left.poll_write(&payload).unwrap();
        }
        assert_eq!(status, IoStatus::Complete(payload.len()));

        received.extend_from_slice(&drain(&mut right, &mut buf));
        assert_eq!(received, payload);
    }

    #[test]
    fn canceled_write_forgets_partial_progress() {
        let (mut left, mut right) = UnixPipe::pair().unwrap();

        let payload = vec![0xA5u8; 4 * 1024 * 1024];
        assert_eq!(left.issue_write(&payload).unwrap(), IoStatus::Pending);

        left.cancel(Direction::Write);

        // Make room again, then confirm a fresh write is accepted.
        let mut buf = [0u8; 64 * 1024];
        let _ = drain(&mut right, &mut buf);
        assert_eq!(left.issue_write(b"ok").unwrap(), IoStatus::Complete(2));
    }

    #[test]
    fn bind_accept_connect_roundtrip() {
        let sock_path = temp_path("accept");
        let mut listener = PipeListener::bind(&sock_path).unwrap();
        assert!(sock_path.exists());

        let path_clone = sock_path.clone();
        let handle = std::thread::spawn(move || {
            let mut client = UnixPipe::connect(&path_clone).unwrap();
            assert_eq!(
                client.issue_write(b"hello").unwrap(),
                IoStatus::Complete(5)
            );
        });

        let mut server = listener.accept_timeout(Duration::from_secs(5)).unwrap();
        handle.join().unwrap();

        wait(
            &[server.wait_signal(Direction::Read)],
            Some(Duration::from_secs(5)),
        )
        .unwrap();
        let mut buf = [0u8; 16];
        assert_eq!(server.issue_read(&mut buf).unwrap(), IoStatus::Complete(5));
        assert_eq!(&buf[..5], b"hello");

        drop(listener);
        assert!(
            !sock_path.exists(),
            "endpoint path should be cleaned up on drop"
        );
        let _ = std::fs::remove_dir_all(sock_path.parent().unwrap());
    }

    #[test]
    fn accept_times_out_without_client() {
        let sock_path = temp_path("timeout");
        let mut listener = PipeListener::bind(&sock_path).unwrap();

        let start = Instant::now();
        let err = listener
            .accept_timeout(Duration::from_millis(50))
            .unwrap_err();
        assert!(matches!(err, PipeError::AcceptTimeout { .. }));
        assert!(start.elapsed() >= Duration::from_millis(50));

        drop(listener);
        let _ = std::fs::remove_dir_all(sock_path.parent().unwrap());
    }

    #[test]
    fn bind_rejects_too_long_path() {
        let long_path = "/tmp/".to_string() + &"a".repeat(200) + ".sock";
        let result = PipeListener::bind(&long_path);
        assert!(matches!(result, Err(PipeError::PathTooLong { .. })));
    }

    #[test]
    fn bind_default_permissions_hardened() {
        let sock_path = temp_path("perms");
        let listener = PipeListener::bind(&sock_path).unwrap();
        let mode = std::fs::metadata(&sock_path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);

        drop(listener);
        let _ = std::fs::remove_dir_all(sock_path.parent().unwrap());
    }

    #[test]
    fn bind_rejects_existing_non_socket_file() {
        let sock_path = temp_path("bind-file");
        std::fs::write(&sock_path, b"regular-file").unwrap();

        let result = PipeListener::bind(&sock_path);
        assert!(matches!(result, Err(PipeError::Bind { .. })));

        let _ = std::fs::remove_dir_all(sock_path.parent().unwrap());
    }

    #[test]
    fn drop_does_not_remove_replaced_path() {
        let sock_path = temp_path("drop-race");
        let listener = PipeListener::bind(&sock_path).unwrap();
        assert!(sock_path.exists());

        // Replace the path while the listener is alive.
        std::fs::remove_file(&sock_path).unwrap();
        std::fs::write(&sock_path, b"replacement-file").unwrap();

        drop(listener);
        assert!(
            sock_path.exists(),
            "drop must not remove path if inode identity changed"
        );

        let _ = std::fs::remove_dir_all(sock_path.parent().unwrap());
    }
}
