//! Error taxonomy for transport operations.
//!
//! Every failure this crate can report is one of the variants of
//! [`TransportError`], split by operation phase and, within a phase, by
//! whether the deadline elapsed or the transport failed outright. Callers
//! typically retry timeouts with a larger deadline and treat hard errors as
//! "try a different connection", so the two are kept distinct per phase.
//!
//! Raw [`std::io::Error`] values never cross the crate boundary undeclared:
//! every transport call site funnels its error through [`map_io`], the single
//! translation point from platform errors into this taxonomy.

use std::io;

use thiserror::Error;

/// An error raised by a transport operation.
///
/// The phase that failed is encoded in the variant; the timeout variants
/// carry no source because the deadline elapsing *is* the whole story.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TransportError {
    /// The connection could not be established.
    #[error("connect failed: {0}")]
    Connect(#[source] io::Error),

    /// The connect deadline elapsed before the transport accepted the
    /// connection.
    #[error("connect timed out")]
    ConnectTimeout,

    /// A read from the transport failed.
    #[error("read failed: {0}")]
    Read(#[source] io::Error),

    /// The read deadline elapsed before any data arrived.
    #[error("read timed out")]
    ReadTimeout,

    /// A write to the transport failed.
    #[error("write failed: {0}")]
    Write(#[source] io::Error),

    /// The write deadline elapsed before the transport accepted the data.
    #[error("write timed out")]
    WriteTimeout,

    /// Closing the transport failed.
    #[error("close failed: {0}")]
    Close(#[source] io::Error),
}

impl TransportError {
    /// Returns `true` if this error reports an elapsed deadline rather than
    /// a hard transport failure.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            TransportError::ConnectTimeout
                | TransportError::ReadTimeout
                | TransportError::WriteTimeout
        )
    }
}

/// The operation phase during which a platform error was observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    Connect,
    Read,
    Write,
    Close,
}

/// Translate a platform error into the semantic kind for `phase`.
///
/// `TimedOut` is what most platforms report for an elapsed socket deadline;
/// unix reports `WouldBlock` for an elapsed `SO_RCVTIMEO`/`SO_SNDTIMEO`, so
/// both select the phase's timeout kind. Close has no timeout kind, and any
/// otherwise-unclassified failure falls back to the phase's generic kind.
pub(crate) fn map_io(phase: Phase, err: io::Error) -> TransportError {
    let timed_out = matches!(
        err.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
    );

    match (phase, timed_out) {
        (Phase::Connect, true) => TransportError::ConnectTimeout,
        (Phase::Connect, false) => TransportError::Connect(err),
        (Phase::Read, true) => TransportError::ReadTimeout,
        (Phase::Read, false) => TransportError::Read(err),
        (Phase::Write, true) => TransportError::WriteTimeout,
        (Phase::Write, false) => TransportError::Write(err),
        (Phase::Close, _) => TransportError::Close(err),
    }
}

/// The deterministic error reported for operations on a closed stream.
pub(crate) fn closed() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "stream is closed")
}

#[cfg(test)]
mod test {
    use super::*;

    fn err(kind: io::ErrorKind) -> io::Error {
        io::Error::new(kind, "test")
    }

    #[test]
    fn timeouts_map_to_timeout_kinds() {
        assert!(matches!(
            map_io(Phase::Connect, err(io::ErrorKind::TimedOut)),
            TransportError::ConnectTimeout
        ));
        assert!(matches!(
            map_io(Phase::Read, err(io::ErrorKind::WouldBlock)),
            TransportError::ReadTimeout
        ));
        assert!(matches!(
            map_io(Phase::Write, err(io::ErrorKind::TimedOut)),
            TransportError::WriteTimeout
        ));
    }

    #[test]
    fn hard_failures_map_to_phase_kinds() {
        assert!(matches!(
            map_io(Phase::Connect, err(io::ErrorKind::ConnectionRefused)),
            TransportError::Connect(_)
        ));
        assert!(matches!(
            map_io(Phase::Read, err(io::ErrorKind::ConnectionReset)),
            TransportError::Read(_)
        ));
        assert!(matches!(
            map_io(Phase::Write, err(io::ErrorKind::BrokenPipe)),
            TransportError::Write(_)
        ));
    }

    #[test]
    fn close_has_no_timeout_kind() {
        assert!(matches!(
            map_io(Phase::Close, err(io::ErrorKind::TimedOut)),
            TransportError::Close(_)
        ));
        assert!(matches!(
            map_io(Phase::Close, err(io::ErrorKind::NotConnected)),
            TransportError::Close(_)
        ));
    }

    #[test]
    fn is_timeout() {
        assert!(TransportError::ReadTimeout.is_timeout());
        assert!(TransportError::ConnectTimeout.is_timeout());
        assert!(!TransportError::Read(err(io::ErrorKind::ConnectionReset)).is_timeout());
        assert!(!TransportError::Close(err(io::ErrorKind::TimedOut)).is_timeout());
    }
}
