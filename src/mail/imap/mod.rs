//! IMAP sessions for the retrieval engine.
//!
//! This module is split into:
//! - `mod.rs` - Session type and connector (TCP + TLS + login)
//! - `client.rs` - Mailbox operations: select, search, status, fetch

mod client;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;
use tokio_util::compat::{Compat, TokioAsyncReadCompatExt};

use crate::config::MailCredentials;
use crate::error::TransportError;
use crate::transport::{MailboxConnector, MailboxTransport};

pub(crate) type ImapSession = async_imap::Session<Compat<TlsStream<TcpStream>>>;

/// One logged-in IMAP session
pub struct ImapClient {
    pub(crate) session: ImapSession,
    pub(crate) address: String,
}

/// Opens IMAP sessions over implicit TLS, verified against the webpki roots.
pub struct ImapConnector {
    tls: TlsConnector,
}

impl ImapConnector {
    pub fn new() -> Result<Self, TransportError> {
        let mut roots = rustls::RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

        let config = rustls::ClientConfig::builder_with_provider(Arc::new(
            rustls::crypto::ring::default_provider(),
        ))
        .with_safe_default_protocol_versions()
        .map_err(|e| TransportError::connect("tls", e))?
        .with_root_certificates(roots)
        .with_no_client_auth();

        Ok(Self {
            tls: TlsConnector::from(Arc::new(config)),
        })
    }
}

#[async_trait]
impl MailboxConnector for ImapConnector {
    async fn connect(
        &self,
        credentials: &MailCredentials,
    ) -> Result<Box<dyn MailboxTransport>, TransportError> {
        let endpoint = credentials.endpoint();

        if !credentials.use_encryption {
            tracing::warn!(
                "IMAP TLS disabled for {} - enabling anyway for security",
                credentials.address
            );
        }

        let tcp = TcpStream::connect((credentials.host.as_str(), credentials.port))
            .await
            .map_err(|e| TransportError::connect(&endpoint, e))?;

        let server_name = rustls::pki_types::ServerName::try_from(credentials.host.clone())
            .map_err(|e| TransportError::connect(&endpoint, e))?;
        let tls_stream = self
            .tls
            .connect(server_name, tcp)
            .await
            .map_err(|e| TransportError::connect(&endpoint, format!("TLS handshake failed: {}", e)))?;

        // Wrap tokio stream with compat layer for futures-io compatibility
        let client = async_imap::Client::new(tls_stream.compat());

        let session = client
            .login(&credentials.address, &credentials.secret)
            .await
            .map_err(|(e, _)| TransportError::connect(&endpoint, format!("Login failed: {}", e)))?;

        tracing::info!("Connected to IMAP server {}", endpoint);
        Ok(Box::new(ImapClient {
            session,
            address: credentials.address.clone(),
        }))
    }
}
