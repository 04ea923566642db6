//! Caller-supplied encryption contexts for TLS upgrades.
//!
//! A [`TlsContext`] is the opaque capability handed to
//! [`Connector::open_tls`][crate::Connector::open_tls]: it carries the
//! certificate trust material and client configuration, while this crate
//! only ever asks it to upgrade an established connection, verifying the
//! destination host's identity. Certificate policy, trust stores, and
//! protocol-version negotiation all belong to the caller's
//! [`rustls::ClientConfig`].

use std::fmt;
use std::io;
use std::sync::Arc;

use rustls::ClientConnection;
use rustls::pki_types::ServerName;
use tracing::{trace, warn};

/// An encryption context for upgrading connections to TLS.
#[derive(Clone)]
pub struct TlsContext {
    config: Arc<rustls::ClientConfig>,
}

impl fmt::Debug for TlsContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsContext").finish()
    }
}

impl TlsContext {
    /// Create a context from an existing client configuration.
    pub fn new(config: Arc<rustls::ClientConfig>) -> Self {
        Self { config }
    }

    /// Create a context trusting the platform's native certificates.
    ///
    /// Certificates the platform store cannot load or parse are skipped
    /// with a warning rather than failing the whole context.
    pub fn native_roots() -> Self {
        let result = rustls_native_certs::load_native_certs();
        for error in &result.errors {
            warn!("skipping unloadable platform certificate: {}", error);
        }

        let mut roots = rustls::RootCertStore::empty();
        let (added, ignored) = roots.add_parsable_certificates(result.certs);
        trace!(added, ignored, "loaded platform trust roots");

        let config = rustls::ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth();
        Self::new(Arc::new(config))
    }

    /// Get the underlying client configuration.
    pub fn config(&self) -> &Arc<rustls::ClientConfig> {
        &self.config
    }

    /// Start a client session bound to `host` for identity verification.
    pub(crate) fn client_session(&self, host: &str) -> io::Result<ClientConnection> {
        let name = ServerName::try_from(host.to_owned())
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        ClientConnection::new(self.config.clone(), name)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }
}
