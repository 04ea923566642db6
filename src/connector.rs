//! Connection establishment for client transports.
//!
//! The [`Connector`] turns a `(host, port)` destination into a
//! [`TransportStream`], applying the `connect` deadline to the transport
//! handshake and, when requested, upgrading the connection to TLS bound to
//! the destination host's identity. Socket-level options (nodelay,
//! keep-alive, buffer sizes, local binding) are configured through
//! [`ConnectorConfig`].

use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, TcpKeepalive, Type};
use tracing::{trace, warn};

use crate::error::{Phase, TransportError, map_io};
use crate::stream::TransportStream;
use crate::timeout::{Timeouts, socket_deadline};

#[cfg(feature = "tls")]
use crate::tls::TlsContext;

/// Configuration for the sockets a [`Connector`] creates.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct ConnectorConfig {
    /// Whether to disable Nagle's algorithm.
    pub nodelay: bool,

    /// The timeout for keep-alive probes, if keep-alive is enabled.
    pub keep_alive: Option<Duration>,

    /// Whether to reuse the local address.
    pub reuse_address: bool,

    /// The size of the send buffer.
    pub send_buffer_size: Option<usize>,

    /// The size of the receive buffer.
    pub recv_buffer_size: Option<usize>,

    /// The local IPv4 address to bind to.
    pub local_address_ipv4: Option<Ipv4Addr>,

    /// The local IPv6 address to bind to.
    pub local_address_ipv6: Option<Ipv6Addr>,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            nodelay: true,
            keep_alive: Some(Duration::from_secs(90)),
            reuse_address: true,
            send_buffer_size: None,
            recv_buffer_size: None,
            local_address_ipv4: None,
            local_address_ipv6: None,
        }
    }
}

/// Establishes new [`TransportStream`]s for client connections.
///
/// A connector holds no connection state of its own; each call to
/// [`open`][Connector::open] (or [`open_tls`][Connector::open_tls]) produces
/// a fresh stream with un-contended locks, or fails without leaving any
/// resource behind.
#[derive(Debug, Clone, Default)]
pub struct Connector {
    config: ConnectorConfig,
}

impl Connector {
    /// Create a new connector with the given socket configuration.
    pub fn new(config: ConnectorConfig) -> Self {
        Self { config }
    }

    /// Get the socket configuration for this connector.
    pub fn config(&self) -> &ConnectorConfig {
        &self.config
    }

    /// Open a plaintext connection to `(host, port)`.
    ///
    /// The host is resolved with the platform resolver; each resolved
    /// address is attempted in order under the `connect` deadline, and the
    /// last failure is reported if none succeeds. Deadline expiry maps to
    /// [`TransportError::ConnectTimeout`]; resolution failure, refused
    /// connections, and every other failure map to
    /// [`TransportError::Connect`].
    pub fn open(
        &self,
        host: &str,
        port: u16,
        timeouts: &Timeouts,
    ) -> Result<TransportStream, TransportError> {
        let _span = tracing::trace_span!("connect", host, port).entered();
        let socket = self.connect_tcp(host, port, timeouts)?;
        Ok(TransportStream::plain(socket))
    }

    /// Open a connection to `(host, port)` and upgrade it to TLS.
    ///
    /// The handshake verifies the peer against `host` and runs under the
    /// already-applied `connect` deadline; no separate handshake deadline
    /// exists. On any failure the partially-established connection is
    /// discarded — no stream is returned.
    #[cfg(feature = "tls")]
    pub fn open_tls(
        &self,
        host: &str,
        port: u16,
        tls: &TlsContext,
        timeouts: &Timeouts,
    ) -> Result<TransportStream, TransportError> {
        use crate::stream::tls::TlsChannel;

        let _span = tracing::trace_span!("connect", host, port, tls = true).entered();
        let socket = self.connect_tcp(host, port, timeouts)?;

        // The handshake is bound by the connect deadline in both directions.
        let deadline = socket_deadline(timeouts.connect);
        socket
            .set_read_timeout(deadline)
            .map_err(|e| map_io(Phase::Connect, e))?;
        socket
            .set_write_timeout(deadline)
            .map_err(|e| map_io(Phase::Connect, e))?;

        let session = tls
            .client_session(host)
            .map_err(|e| map_io(Phase::Connect, e))?;
        let channel = TlsChannel::new(session);
        channel
            .handshake(&socket)
            .map_err(|e| map_io(Phase::Connect, e))?;
        trace!("tls handshake complete");

        Ok(TransportStream::encrypted(socket, channel))
    }

    fn connect_tcp(
        &self,
        host: &str,
        port: u16,
        timeouts: &Timeouts,
    ) -> Result<TcpStream, TransportError> {
        let addrs = (host, port)
            .to_socket_addrs()
            .map_err(|e| map_io(Phase::Connect, e))?;

        let mut last_error = None;
        for addr in addrs {
            match self.connect_addr(&addr, timeouts.connect) {
                Ok(socket) => {
                    trace!(peer.addr = %addr, "tcp connected");
                    return Ok(socket);
                }
                Err(e) => last_error = Some(e),
            }
        }

        Err(last_error.unwrap_or_else(|| {
            map_io(
                Phase::Connect,
                io::Error::new(
                    io::ErrorKind::AddrNotAvailable,
                    "host resolved to no addresses",
                ),
            )
        }))
    }

    /// Make a single connection attempt, with the connect deadline applied.
    fn connect_addr(
        &self,
        addr: &SocketAddr,
        connect_timeout: Option<Duration>,
    ) -> Result<TcpStream, TransportError> {
        let domain = Domain::for_address(*addr);
        let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))
            .map_err(|e| map_io(Phase::Connect, e))?;
        trace!("tcp socket opened");

        if self.config.nodelay {
            if let Err(e) = socket.set_nodelay(true) {
                warn!("tcp set_nodelay error: {}", e);
            }
        }

        if let Some(dur) = self.config.keep_alive {
            let conf = TcpKeepalive::new().with_time(dur);
            if let Err(e) = socket.set_tcp_keepalive(&conf) {
                warn!("tcp set_keepalive error: {}", e);
            }
        }

        if self.config.reuse_address {
            if let Err(e) = socket.set_reuse_address(true) {
                warn!("tcp set_reuse_address error: {}", e);
            }
        }

        if let Some(size) = self.config.send_buffer_size {
            if let Err(e) = socket.set_send_buffer_size(size) {
                warn!("tcp set_send_buffer_size error: {}", e);
            }
        }

        if let Some(size) = self.config.recv_buffer_size {
            if let Err(e) = socket.set_recv_buffer_size(size) {
                warn!("tcp set_recv_buffer_size error: {}", e);
            }
        }

        self.bind_local_address(&socket, addr)
            .map_err(|e| map_io(Phase::Connect, e))?;

        match socket_deadline(connect_timeout) {
            Some(dur) => socket
                .connect_timeout(&(*addr).into(), dur)
                .map_err(|e| map_io(Phase::Connect, e))?,
            None => socket
                .connect(&(*addr).into())
                .map_err(|e| map_io(Phase::Connect, e))?,
        }

        Ok(socket.into())
    }

    fn bind_local_address(&self, socket: &Socket, dst_addr: &SocketAddr) -> io::Result<()> {
        match (
            *dst_addr,
            self.config.local_address_ipv4,
            self.config.local_address_ipv6,
        ) {
            (SocketAddr::V4(_), Some(addr), _) => {
                socket.bind(&SocketAddr::new(addr.into(), 0).into())?;
            }
            (SocketAddr::V6(_), _, Some(addr)) => {
                socket.bind(&SocketAddr::new(addr.into(), 0).into())?;
            }
            _ => {}
        }

        Ok(())
    }
}
