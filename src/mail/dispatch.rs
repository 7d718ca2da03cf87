//! Outbound mail over pooled submission sessions.

use std::sync::Arc;
use std::time::Duration;

use crate::config::MailCredentials;
use crate::error::DispatchError;
use crate::pool::{SessionKey, SessionRegistry, bounded};
use crate::transport::{SubmissionConnector, SubmissionTransport};

use super::smtp::build_message;
use super::types::OutgoingMessage;

type SubmissionSession = Box<dyn SubmissionTransport>;

#[derive(Clone)]
pub struct DispatchEngine {
    registry: SessionRegistry<SubmissionSession>,
    connector: Arc<dyn SubmissionConnector>,
    operation_timeout: Duration,
}

impl DispatchEngine {
    pub fn new(
        registry: SessionRegistry<SubmissionSession>,
        connector: Arc<dyn SubmissionConnector>,
        operation_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            connector,
            operation_timeout,
        }
    }

    pub fn registry(&self) -> &SessionRegistry<SubmissionSession> {
        &self.registry
    }

    /// Send `compose` from `credentials.address`.
    ///
    /// The session stays pooled after a successful send. A transport failure
    /// evicts it; retrying is up to the caller.
    pub async fn send(
        &self,
        key: &SessionKey,
        credentials: &MailCredentials,
        compose: &OutgoingMessage,
    ) -> Result<(), DispatchError> {
        let message = build_message(credentials, compose)?;

        let connector = Arc::clone(&self.connector);
        let timeout = self.operation_timeout;
        let mut guard = self
            .registry
            .acquire(key, || async move {
                bounded(timeout, connector.connect(credentials)).await
            })
            .await?;

        let result = match guard.transport() {
            Ok(transport) => bounded(timeout, transport.send(message)).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => {
                guard.touch();
                tracing::info!(
                    "Email sent from {} to {}",
                    credentials.address,
                    compose.to.join(", ")
                );
                Ok(())
            }
            Err(e) => {
                tracing::warn!("Send failed on {}: {}", key, e);
                guard.evict().await;
                Err(e.into())
            }
        }
    }
}
