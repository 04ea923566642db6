//! # Guichet: blocking transport primitives for network clients
//!
//! Guichet presents a uniform, blocking, byte-stream interface over a raw
//! network connection, optionally upgraded to an encrypted channel. It
//! exists so that higher-level protocol code — request/response framing,
//! connection pooling — can read and write bytes with deadline-based
//! timeouts and a normalized error vocabulary, without depending on the
//! specifics of the underlying socket API or TLS library.
//!
//! ## Architecture
//!
//! Two components, leaf-first:
//!
//! - [`TransportStream`] wraps one established connection (plaintext or
//!   encrypted) and exposes read, write, close, and dropped-connection
//!   probing. Concurrent read access and concurrent write access are
//!   serialized independently, so one reader and one writer may proceed at
//!   the same time.
//! - [`Connector`] establishes a new connection for a host/port
//!   destination, applying the `connect` deadline and performing the
//!   optional TLS upgrade, and produces a `TransportStream`.
//!
//! Every blocking call takes an explicit per-phase deadline through
//! [`Timeouts`]; every transport-level failure is reported as one of the
//! [`TransportError`] kinds, split per phase into timeout and hard-error
//! variants. No raw platform error ever crosses into caller code.
//!
//! This layer does not buffer, does not frame messages, does not retry,
//! and does not interpret payload content. Scheduling is purely
//! synchronous: calls block the invoking thread, and parallelism, if any,
//! comes from the caller running streams on separate threads.
//!
//! ## Example
//!
//! ```no_run
//! use std::time::Duration;
//! use guichet::{Connector, Timeouts};
//!
//! fn main() -> Result<(), guichet::TransportError> {
//!     let connector = Connector::default();
//!     let timeouts = Timeouts::new()
//!         .with_connect(Duration::from_secs(10))
//!         .with_read(Duration::from_secs(30))
//!         .with_write(Duration::from_secs(30));
//!
//!     let stream = connector.open("example.com", 80, &timeouts)?;
//!     stream.write(b"GET / HTTP/1.1\r\nHost: example.com\r\n\r\n", &timeouts)?;
//!     let response = stream.read(4096, &timeouts)?;
//!     println!("read {} bytes", response.len());
//!     stream.close()?;
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! - `tls`: Enables TLS upgrades using rustls
//! - `tls-ring`: Use ring as the crypto backend for TLS
//! - `tls-aws-lc`: Use AWS-LC as the crypto backend for TLS

mod connector;
mod error;
mod stream;
mod timeout;
#[cfg(feature = "tls")]
mod tls;

pub use self::connector::{Connector, ConnectorConfig};
pub use self::error::TransportError;
pub use self::stream::TransportStream;
pub use self::timeout::Timeouts;
#[cfg(feature = "tls")]
pub use self::tls::TlsContext;

#[cfg(all(
    feature = "tls",
    not(any(feature = "tls-ring", feature = "tls-aws-lc"))
))]
compile_error!(
    "The 'tls' feature requires a backend, enable 'tls-ring' or 'tls-aws-lc' to select a backend"
);
