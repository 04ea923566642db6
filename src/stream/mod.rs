//! Transport streams: deadline-bounded byte transfer over one connection.
//!
//! A [`TransportStream`] owns one established connection exclusively for its
//! lifetime. The read side and the write side are serialized independently,
//! so one reader and one writer may proceed concurrently, while two readers
//! or two writers on the same stream never interleave their transport calls.
//!
//! Streams do not buffer, do not frame, and do not retry; they move opaque
//! bytes under per-call deadlines and report failures through the
//! [`TransportError`] taxonomy.

use std::fmt;
use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use bytes::{Bytes, BytesMut};
use tracing::trace;

use crate::error::{Phase, TransportError, closed, map_io};
use crate::timeout::{Timeouts, socket_deadline};

#[cfg(feature = "tls")]
pub(crate) mod tls;

#[cfg(feature = "tls")]
use self::tls::TlsChannel;

/// Acquire a lock, ignoring poisoning.
///
/// Poisoning only means another thread panicked mid-operation; the guarded
/// state is a socket or TLS session that remains valid to use.
pub(crate) fn hold<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A blocking byte stream over one exclusively-owned connection.
///
/// Created by a [`Connector`][crate::Connector], or wrapped around an
/// existing socket with [`TransportStream::plain`]. All methods take
/// `&self`; the stream is `Send + Sync` and can be shared across threads,
/// with reads serialized against reads and writes against writes.
///
/// # Closing
///
/// [`close`][TransportStream::close] is idempotent: the first call shuts the
/// connection down and every later call is a no-op returning `Ok(())`. Once
/// closed, `read` and `write` fail deterministically with their phase's
/// error kind. The file descriptor itself is released when the stream is
/// dropped.
pub struct TransportStream {
    socket: TcpStream,
    #[cfg(feature = "tls")]
    tls: Option<TlsChannel>,
    read_lock: Mutex<()>,
    write_lock: Mutex<()>,
    closed: AtomicBool,
}

impl fmt::Debug for TransportStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("TransportStream");
        s.field("peer", &self.socket.peer_addr().ok());
        #[cfg(feature = "tls")]
        s.field("encrypted", &self.tls.is_some());
        s.field("closed", &self.closed.load(Ordering::Relaxed));
        s.finish()
    }
}

impl TransportStream {
    /// Wrap an established plaintext connection.
    pub fn plain(socket: TcpStream) -> Self {
        Self {
            socket,
            #[cfg(feature = "tls")]
            tls: None,
            read_lock: Mutex::new(()),
            write_lock: Mutex::new(()),
            closed: AtomicBool::new(false),
        }
    }

    /// Wrap a connection that has completed its TLS handshake.
    #[cfg(feature = "tls")]
    pub(crate) fn encrypted(socket: TcpStream, channel: TlsChannel) -> Self {
        Self {
            socket,
            tls: Some(channel),
            read_lock: Mutex::new(()),
            write_lock: Mutex::new(()),
            closed: AtomicBool::new(false),
        }
    }

    /// Read up to `max_bytes` from the connection.
    ///
    /// Returns whatever is currently available, which may be fewer bytes
    /// than requested. An empty result signals orderly peer-initiated close;
    /// interpreting it is the caller's job. Fails with
    /// [`TransportError::ReadTimeout`] if the `read` deadline elapses before
    /// any data arrives, or [`TransportError::Read`] for any other failure,
    /// including reads after [`close`][TransportStream::close].
    pub fn read(&self, max_bytes: usize, timeouts: &Timeouts) -> Result<Bytes, TransportError> {
        let _guard = hold(&self.read_lock);

        if self.closed.load(Ordering::SeqCst) {
            return Err(map_io(Phase::Read, closed()));
        }

        #[cfg(feature = "tls")]
        if let Some(channel) = &self.tls {
            let buf = channel.read(&self.socket, max_bytes, timeouts.read)?;
            trace!(bytes = buf.len(), "read");
            return Ok(buf);
        }

        self.socket
            .set_read_timeout(socket_deadline(timeouts.read))
            .map_err(|e| map_io(Phase::Read, e))?;

        let mut buf = BytesMut::zeroed(max_bytes);
        let mut wire = &self.socket;
        let n = wire.read(&mut buf).map_err(|e| map_io(Phase::Read, e))?;
        buf.truncate(n);

        trace!(bytes = n, "read");
        Ok(buf.freeze())
    }

    /// Write all of `data` to the connection.
    ///
    /// Chunks are handed to the transport until the full buffer is accepted,
    /// in order, exactly once. The `write` deadline is re-applied before
    /// each chunk; it bounds the wait for one chunk, not the whole call, so
    /// a large write over a slow transport may take longer overall than the
    /// nominal deadline. Fails with [`TransportError::WriteTimeout`] or
    /// [`TransportError::Write`].
    pub fn write(&self, data: &[u8], timeouts: &Timeouts) -> Result<(), TransportError> {
        let _guard = hold(&self.write_lock);

        if self.closed.load(Ordering::SeqCst) {
            return Err(map_io(Phase::Write, closed()));
        }

        #[cfg(feature = "tls")]
        if let Some(channel) = &self.tls {
            channel.write(&self.socket, data, timeouts.write)?;
            trace!(bytes = data.len(), "write");
            return Ok(());
        }

        let mut remaining = data;
        while !remaining.is_empty() {
            self.socket
                .set_write_timeout(socket_deadline(timeouts.write))
                .map_err(|e| map_io(Phase::Write, e))?;

            let mut wire = &self.socket;
            let n = wire.write(remaining).map_err(|e| map_io(Phase::Write, e))?;
            if n == 0 {
                return Err(map_io(
                    Phase::Write,
                    io::Error::new(io::ErrorKind::WriteZero, "transport accepted no bytes"),
                ));
            }
            remaining = &remaining[n..];
        }

        trace!(bytes = data.len(), "write");
        Ok(())
    }

    /// Shut the connection down.
    ///
    /// Serializes against in-flight writes; a read racing a close will
    /// observe end-of-stream or a [`TransportError::Read`]. Idempotent:
    /// calling `close` on an already-closed stream is a no-op. For
    /// encrypted streams a close_notify is flushed best-effort, bounded by a
    /// fixed small deadline so close can never hang.
    pub fn close(&self) -> Result<(), TransportError> {
        let _guard = hold(&self.write_lock);

        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        #[cfg(feature = "tls")]
        if let Some(channel) = &self.tls {
            const CLOSE_NOTIFY_DEADLINE: std::time::Duration = std::time::Duration::from_secs(1);
            let _ = self.socket.set_write_timeout(Some(CLOSE_NOTIFY_DEADLINE));
            channel.shutdown(&self.socket);
        }

        trace!("close");
        match self.socket.shutdown(Shutdown::Both) {
            Ok(()) => Ok(()),
            // The peer tearing the connection down first is not a close
            // failure.
            Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
            Err(e) => Err(map_io(Phase::Close, e)),
        }
    }

    /// Probe whether the peer has closed or reset the connection.
    ///
    /// Never blocks and never fails. The probe checks whether the
    /// connection is readable without consuming anything; on an idle
    /// connection with no application data expected, readability means the
    /// peer has closed its end. This does not take the read lock (that
    /// would block behind an in-flight read) and leaves the socket state
    /// untouched, so in-flight reads proceed undisturbed — the result is
    /// a best-effort heuristic, not a synchronized snapshot.
    pub fn is_connection_dropped(&self) -> bool {
        if self.closed.load(Ordering::SeqCst) {
            return true;
        }

        match probe_readable(&self.socket) {
            // Readable: pending close_notify/EOF, or unexpected data.
            Ok(_) => true,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => false,
            Err(_) => true,
        }
    }
}

/// Peek one byte without consuming it and without blocking.
///
/// The socket is shared with in-flight reads, which rely on its blocking
/// mode and deadlines; the probe must not disturb either. On unix the
/// non-blocking behavior comes from a per-call flag rather than from
/// toggling the socket's mode.
#[cfg(unix)]
fn probe_readable(socket: &TcpStream) -> io::Result<usize> {
    use std::mem::MaybeUninit;

    let mut byte = [MaybeUninit::<u8>::uninit()];
    socket2::SockRef::from(socket).recv_with_flags(&mut byte, libc::MSG_PEEK | libc::MSG_DONTWAIT)
}

/// Fallback for platforms without a per-call non-blocking receive flag: the
/// blocking-mode toggle can race an in-flight read, which may then observe
/// a spurious timeout.
#[cfg(not(unix))]
fn probe_readable(socket: &TcpStream) -> io::Result<usize> {
    socket.set_nonblocking(true)?;
    let mut byte = [0u8; 1];
    let result = socket.peek(&mut byte);
    let _ = socket.set_nonblocking(false);
    result
}

#[cfg(test)]
mod test {
    use std::net::{TcpListener, TcpStream};
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    use static_assertions::assert_impl_all;

    use super::*;
    use crate::fixtures;

    assert_impl_all!(TransportStream: Send, Sync);

    fn pair() -> (TransportStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).unwrap();
        let (server, _) = listener.accept().unwrap();
        (TransportStream::plain(client), server)
    }

    #[test]
    fn echo_round_trip() {
        fixtures::subscribe();
        let (stream, mut server) = pair();
        let timeouts = Timeouts::new()
            .with_read(Duration::from_secs(1))
            .with_write(Duration::from_secs(1));

        stream.write(b"ping", &timeouts).unwrap();

        let mut buf = [0u8; 4];
        server.read_exact(&mut buf).unwrap();
        server.write_all(&buf).unwrap();

        let echoed = stream.read(1024, &timeouts).unwrap();
        assert_eq!(&echoed[..], b"ping");
    }

    #[test]
    fn large_write_arrives_in_order_without_gaps() {
        fixtures::subscribe();
        let (stream, mut server) = pair();
        let timeouts = Timeouts::new().with_write(Duration::from_secs(5));

        let data: Vec<u8> = (0..1024 * 1024u32).map(|i| (i % 251) as u8).collect();
        let expected = data.clone();

        let reader = std::thread::spawn(move || {
            let mut received = vec![0u8; expected.len()];
            server.read_exact(&mut received).unwrap();
            assert_eq!(received, expected);
        });

        stream.write(&data, &timeouts).unwrap();
        reader.join().unwrap();
    }

    #[test]
    fn read_times_out_against_silent_peer() {
        fixtures::subscribe();
        let (stream, _server) = pair();
        let timeouts = Timeouts::new().with_read(Duration::from_millis(50));

        let start = Instant::now();
        let err = stream.read(1024, &timeouts).unwrap_err();
        assert!(matches!(err, TransportError::ReadTimeout), "{err:?}");
        assert!(err.is_timeout());
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn elapsed_deadline_still_times_out() {
        fixtures::subscribe();
        let (stream, _server) = pair();
        let timeouts = Timeouts::new().with_read(Duration::ZERO);

        let err = stream.read(1024, &timeouts).unwrap_err();
        assert!(matches!(err, TransportError::ReadTimeout), "{err:?}");
    }

    #[test]
    fn orderly_peer_close_reads_empty() {
        fixtures::subscribe();
        let (stream, server) = pair();
        drop(server);

        let timeouts = Timeouts::new().with_read(Duration::from_secs(1));
        let buf = stream.read(1024, &timeouts).unwrap();
        assert!(buf.is_empty());
    }

    #[test]
    fn operations_after_close_fail_deterministically() {
        fixtures::subscribe();
        let (stream, _server) = pair();
        let timeouts = Timeouts::new()
            .with_read(Duration::from_secs(1))
            .with_write(Duration::from_secs(1));

        stream.close().unwrap();

        assert!(matches!(
            stream.read(1024, &timeouts),
            Err(TransportError::Read(_))
        ));
        assert!(matches!(
            stream.write(b"late", &timeouts),
            Err(TransportError::Write(_))
        ));
    }

    #[test]
    fn close_is_idempotent() {
        fixtures::subscribe();
        let (stream, _server) = pair();
        stream.close().unwrap();
        stream.close().unwrap();
    }

    #[test]
    fn dropped_probe_is_false_on_fresh_idle_stream() {
        fixtures::subscribe();
        let (stream, _server) = pair();
        assert!(!stream.is_connection_dropped());
    }

    #[test]
    fn dropped_probe_turns_true_after_peer_close() {
        fixtures::subscribe();
        let (stream, server) = pair();
        drop(server);

        let deadline = Instant::now() + Duration::from_secs(2);
        while !stream.is_connection_dropped() {
            assert!(Instant::now() < deadline, "peer close never observed");
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    #[test]
    fn dropped_probe_is_true_after_close() {
        fixtures::subscribe();
        let (stream, _server) = pair();
        stream.close().unwrap();
        assert!(stream.is_connection_dropped());
    }

    #[test]
    fn drop_checks_leave_concurrent_reads_undisturbed() {
        fixtures::subscribe();
        let (stream, mut server) = pair();
        let stream = Arc::new(stream);
        let timeouts = Timeouts::new().with_read(Duration::from_secs(2));

        let monitor = {
            let stream = stream.clone();
            std::thread::spawn(move || {
                let stop = Instant::now() + Duration::from_millis(500);
                while Instant::now() < stop {
                    stream.is_connection_dropped();
                }
            })
        };

        const ROUNDS: usize = 20;
        let writer = std::thread::spawn(move || {
            for _ in 0..ROUNDS {
                std::thread::sleep(Duration::from_millis(2));
                server.write_all(&[7u8]).unwrap();
            }
            // Keep the peer open until the reader is done.
            server
        });

        // Every read has a live peer answering within milliseconds; none may
        // report a timeout, no matter how often the drop check runs.
        let mut received = 0;
        while received < ROUNDS {
            let buf = stream
                .read(64, &timeouts)
                .expect("read with a live peer must not time out");
            assert!(!buf.is_empty());
            received += buf.len();
        }

        drop(writer.join().unwrap());
        monitor.join().unwrap();
    }

    #[test]
    fn concurrent_writes_do_not_interleave() {
        fixtures::subscribe();
        let (stream, mut server) = pair();
        let stream = Arc::new(stream);
        let timeouts = Timeouts::new().with_write(Duration::from_secs(5));

        const LEN: usize = 64 * 1024;
        let a = stream.clone();
        let b = stream.clone();
        let writer_a = std::thread::spawn(move || a.write(&[b'A'; LEN], &timeouts).unwrap());
        let writer_b = std::thread::spawn(move || b.write(&[b'B'; LEN], &timeouts).unwrap());

        let mut received = vec![0u8; 2 * LEN];
        server.read_exact(&mut received).unwrap();
        writer_a.join().unwrap();
        writer_b.join().unwrap();

        // One full buffer then the other, in either order.
        let first = received[0];
        let second = received[2 * LEN - 1];
        assert_ne!(first, second);
        assert!(received[..LEN].iter().all(|&b| b == first));
        assert!(received[LEN..].iter().all(|&b| b == second));
    }
}
