//! Seams between the pool and the wire.
//!
//! Each protocol has a transport trait (the live session the registry owns)
//! and a connector trait (how a fresh session is established). Production
//! implementations live next to their protocol modules; tests swap in stubs.

use async_trait::async_trait;

use crate::config::{MailCredentials, ManagementAccount};
use crate::error::TransportError;

/// Anything a registry can own and close.
#[async_trait]
pub trait Transport: Send + 'static {
    /// Log out / quit. Called once, when the session leaves the registry.
    async fn close(&mut self) -> Result<(), TransportError>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Box<T> {
    async fn close(&mut self) -> Result<(), TransportError> {
        (**self).close().await
    }
}

/// An authenticated inbound mailbox session.
#[async_trait]
pub trait MailboxTransport: Transport {
    /// Select the inbox, returning the number of messages it holds.
    /// Doubles as the liveness check for reused sessions.
    async fn select_inbox(&mut self) -> Result<u32, TransportError>;

    /// Run a SEARCH with the given criteria (`ALL`, `RECENT`, ...),
    /// returning message sequence numbers.
    async fn search(&mut self, criteria: &str) -> Result<Vec<u32>, TransportError>;

    /// Total number of messages in the inbox, queried without searching.
    async fn message_count(&mut self) -> Result<u32, TransportError>;

    /// Fetch the full RFC 822 source of one message.
    async fn fetch_raw(&mut self, id: u32) -> Result<Vec<u8>, TransportError>;
}

/// An authenticated outbound mail session.
#[async_trait]
pub trait SubmissionTransport: Transport {
    async fn send(&mut self, message: lettre::Message) -> Result<(), TransportError>;
}

/// HTTP method of a management API call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiMethod {
    /// Parameters go in the query string
    Get,
    /// Parameters go in a form-encoded body
    Post,
}

/// One `/execute/{module}/{function}` call
#[derive(Debug, Clone)]
pub struct ApiRequest<'a> {
    pub method: ApiMethod,
    pub module: &'a str,
    pub function: &'a str,
    pub params: &'a [(&'a str, String)],
}

/// Raw answer of the management endpoint; interpreted by the client.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub body: String,
}

/// An authenticated HTTPS session to the control panel.
#[async_trait]
pub trait ManagementTransport: Transport {
    async fn execute(&mut self, request: ApiRequest<'_>) -> Result<ApiResponse, TransportError>;
}

#[async_trait]
pub trait MailboxConnector: Send + Sync {
    async fn connect(
        &self,
        credentials: &MailCredentials,
    ) -> Result<Box<dyn MailboxTransport>, TransportError>;
}

#[async_trait]
pub trait SubmissionConnector: Send + Sync {
    async fn connect(
        &self,
        credentials: &MailCredentials,
    ) -> Result<Box<dyn SubmissionTransport>, TransportError>;
}

#[async_trait]
pub trait ManagementConnector: Send + Sync {
    async fn connect(
        &self,
        account: &ManagementAccount,
    ) -> Result<Box<dyn ManagementTransport>, TransportError>;
}
