//! Per-phase deadlines for transport operations.

use std::time::Duration;

/// Deadlines for the connect, read, and write phases of a transport.
///
/// Each field is independent and optional: `None` means "block indefinitely"
/// for that phase. A `Timeouts` value carries no state between calls — each
/// call evaluates its deadline from the moment it is issued, and there is no
/// cross-call budget accumulation.
///
/// Note that the write deadline is a per-chunk setting rather than a
/// remaining-time budget: a large write that the transport accepts in
/// several chunks may take longer than the nominal deadline overall, as long
/// as each chunk is accepted within it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Timeouts {
    /// Deadline for establishing a connection (including any TLS handshake).
    pub connect: Option<Duration>,

    /// Deadline for a single read to produce data.
    pub read: Option<Duration>,

    /// Deadline for the transport to accept a chunk of written data.
    pub write: Option<Duration>,
}

impl Timeouts {
    /// No deadlines: every phase blocks indefinitely.
    pub const NONE: Timeouts = Timeouts {
        connect: None,
        read: None,
        write: None,
    };

    /// Create a `Timeouts` with no deadlines set.
    pub fn new() -> Self {
        Self::NONE
    }

    /// Set the connect deadline.
    pub fn with_connect(mut self, deadline: Duration) -> Self {
        self.connect = Some(deadline);
        self
    }

    /// Set the read deadline.
    pub fn with_read(mut self, deadline: Duration) -> Self {
        self.read = Some(deadline);
        self
    }

    /// Set the write deadline.
    pub fn with_write(mut self, deadline: Duration) -> Self {
        self.write = Some(deadline);
        self
    }
}

/// Clamp a deadline to something the socket layer will accept.
///
/// The platform rejects a zero sockopt timeout (it would mean "no timeout"
/// at that layer, inverting the caller's intent), so an already-elapsed
/// deadline becomes the smallest one the platform accepts. The call still
/// fails with the timeout kind, within a bounded small overshoot.
pub(crate) fn socket_deadline(deadline: Option<Duration>) -> Option<Duration> {
    match deadline {
        Some(d) if d.is_zero() => Some(Duration::from_millis(1)),
        other => other,
    }
}
