//! Blocking rustls session driving for encrypted streams.
//!
//! The socket stays with the [`TransportStream`][super::TransportStream];
//! this module owns only the TLS session state, driven sans-IO. The locking
//! invariant that keeps the per-direction concurrency model honest: TLS
//! records are only ever *written* to the wire while the session lock is
//! held, so record boundaries from two writers (or a writer and the read
//! path's owed-response flush) can never interleave. Raw *reads* from the
//! wire never hold the session lock, so a reader blocked waiting for data
//! does not stall a writer.

use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::sync::Mutex;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use rustls::ClientConnection;

use crate::error::{Phase, TransportError, map_io};
use crate::timeout::socket_deadline;

use super::hold;

/// Incoming records are pulled off the wire in chunks of this size before
/// being fed to the session.
const WIRE_READ_CHUNK: usize = 16 * 1024;

pub(crate) struct TlsChannel {
    session: Mutex<ClientConnection>,
}

impl TlsChannel {
    pub(crate) fn new(session: ClientConnection) -> Self {
        Self {
            session: Mutex::new(session),
        }
    }

    /// Drive the handshake to completion over `socket`.
    ///
    /// The caller applies the connect deadline to the socket beforehand; an
    /// elapsed deadline surfaces here as a timeout-kind `io::Error`.
    pub(crate) fn handshake(&self, socket: &TcpStream) -> io::Result<()> {
        let mut session = hold(&self.session);
        let mut wire = socket;
        while session.is_handshaking() {
            session.complete_io(&mut wire)?;
        }
        Ok(())
    }

    /// Read up to `max_bytes` of decrypted plaintext.
    ///
    /// Drains plaintext already decrypted by the session first; only when
    /// none is available does it touch the wire, under the read deadline.
    pub(crate) fn read(
        &self,
        socket: &TcpStream,
        max_bytes: usize,
        deadline: Option<Duration>,
    ) -> Result<Bytes, TransportError> {
        let mut buf = BytesMut::zeroed(max_bytes);
        loop {
            {
                let mut session = hold(&self.session);
                match session.reader().read(&mut buf) {
                    Ok(n) => {
                        buf.truncate(n);
                        return Ok(buf.freeze());
                    }
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                    // Peer closed without close_notify; surfaced as orderly
                    // EOF, matching the plaintext path.
                    Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                        return Ok(Bytes::new());
                    }
                    Err(e) => return Err(map_io(Phase::Read, e)),
                }
            }
            self.pump(socket, deadline)?;
        }
    }

    /// Pull one chunk of records off the wire and feed it to the session.
    fn pump(&self, socket: &TcpStream, deadline: Option<Duration>) -> Result<(), TransportError> {
        socket
            .set_read_timeout(socket_deadline(deadline))
            .map_err(|e| map_io(Phase::Read, e))?;

        // The session lock is not held while waiting on the wire.
        let mut raw = [0u8; WIRE_READ_CHUNK];
        let mut wire = socket;
        let n = wire.read(&mut raw).map_err(|e| map_io(Phase::Read, e))?;

        let mut session = hold(&self.session);
        let mut records: &[u8] = &raw[..n];
        loop {
            // An empty chunk presents EOF to the session.
            session
                .read_tls(&mut records)
                .map_err(|e| map_io(Phase::Read, e))?;
            session
                .process_new_packets()
                .map_err(|e| map_io(Phase::Read, io::Error::new(io::ErrorKind::InvalidData, e)))?;
            if records.is_empty() {
                break;
            }
        }

        // Responses owed to the peer (e.g. answering a key update) go out
        // under the same deadline, with the session lock still held.
        if session.wants_write() {
            socket
                .set_write_timeout(socket_deadline(deadline))
                .map_err(|e| map_io(Phase::Read, e))?;
            let mut wire = socket;
            while session.wants_write() {
                session
                    .write_tls(&mut wire)
                    .map_err(|e| map_io(Phase::Read, e))?;
            }
        }

        Ok(())
    }

    /// Encrypt and send all of `data`.
    ///
    /// Plaintext is buffered into the session chunk by chunk, flushing
    /// records to the wire between chunks with the write deadline re-applied
    /// each time.
    pub(crate) fn write(
        &self,
        socket: &TcpStream,
        data: &[u8],
        deadline: Option<Duration>,
    ) -> Result<(), TransportError> {
        let mut session = hold(&self.session);
        let mut remaining = data;
        loop {
            socket
                .set_write_timeout(socket_deadline(deadline))
                .map_err(|e| map_io(Phase::Write, e))?;
            let mut wire = socket;
            while session.wants_write() {
                session
                    .write_tls(&mut wire)
                    .map_err(|e| map_io(Phase::Write, e))?;
            }

            if remaining.is_empty() {
                return Ok(());
            }

            let n = session
                .writer()
                .write(remaining)
                .map_err(|e| map_io(Phase::Write, e))?;
            if n == 0 {
                return Err(map_io(
                    Phase::Write,
                    io::Error::new(io::ErrorKind::WriteZero, "session accepted no plaintext"),
                ));
            }
            remaining = &remaining[n..];
        }
    }

    /// Queue a close_notify and flush it, best effort.
    ///
    /// The caller bounds this with a write deadline on the socket; failures
    /// are swallowed since the connection is being torn down regardless.
    pub(crate) fn shutdown(&self, socket: &TcpStream) {
        let mut session = hold(&self.session);
        session.send_close_notify();
        let mut wire = socket;
        while session.wants_write() {
            if session.write_tls(&mut wire).is_err() {
                break;
            }
        }
    }
}
