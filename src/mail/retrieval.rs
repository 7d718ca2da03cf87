//! Message retrieval over pooled mailbox sessions.

use std::sync::Arc;
use std::time::Duration;

use crate::config::MailCredentials;
use crate::error::{RetrievalError, TransportError};
use crate::pool::{SessionGuard, SessionKey, SessionRegistry, bounded};
use crate::transport::{MailboxConnector, MailboxTransport};

use super::parser::decode_message;
use super::types::Message;

type MailboxSession = Box<dyn MailboxTransport>;

/// Enumerates and decodes inbox messages, reconnecting once when a pooled
/// session turns out to be stale.
#[derive(Clone)]
pub struct RetrievalEngine {
    registry: SessionRegistry<MailboxSession>,
    connector: Arc<dyn MailboxConnector>,
    operation_timeout: Duration,
}

impl RetrievalEngine {
    pub fn new(
        registry: SessionRegistry<MailboxSession>,
        connector: Arc<dyn MailboxConnector>,
        operation_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            connector,
            operation_timeout,
        }
    }

    pub fn registry(&self) -> &SessionRegistry<MailboxSession> {
        &self.registry
    }

    /// Fetch the `limit` most recent inbox messages, newest first.
    ///
    /// On failure the session for `key` is evicted, so the next call starts
    /// from a fresh connection.
    pub async fn fetch(
        &self,
        key: &SessionKey,
        credentials: &MailCredentials,
        limit: usize,
    ) -> Result<Vec<Message>, RetrievalError> {
        let mut guard = self.acquire_live(key, credentials).await?;

        match self.fetch_with(&mut guard, limit, &credentials.address).await {
            Ok(messages) => {
                guard.touch();
                tracing::info!(
                    "Fetched {} message(s) for {}",
                    messages.len(),
                    credentials.address
                );
                Ok(messages)
            }
            Err(e) => {
                tracing::warn!("Retrieval failed for {}: {}", key, e);
                guard.evict().await;
                Err(e.into())
            }
        }
    }

    /// Like [`fetch`](Self::fetch), for callers that treat a failed
    /// retrieval as an empty inbox.
    pub async fn fetch_or_empty(
        &self,
        key: &SessionKey,
        credentials: &MailCredentials,
        limit: usize,
    ) -> Vec<Message> {
        self.fetch(key, credentials, limit)
            .await
            .unwrap_or_else(|e| {
                tracing::warn!("No messages available for {}: {}", credentials.address, e);
                Vec::new()
            })
    }

    /// Acquire a session whose inbox can be selected. A reused session that
    /// fails the check is replaced once; a fresh one that fails is an error.
    async fn acquire_live(
        &self,
        key: &SessionKey,
        credentials: &MailCredentials,
    ) -> Result<SessionGuard<MailboxSession>, TransportError> {
        let mut guard = self.acquire(key, credentials).await?;
        let check = self.select_inbox(&mut guard).await;

        match check {
            Ok(()) => Ok(guard),
            Err(e) if guard.is_reused() => {
                tracing::warn!("Pooled session {} is stale ({}), reconnecting", key, e);
                guard.evict().await;

                let mut fresh = self.acquire(key, credentials).await?;
                match self.select_inbox(&mut fresh).await {
                    Ok(()) => Ok(fresh),
                    Err(e) => {
                        fresh.evict().await;
                        Err(e)
                    }
                }
            }
            Err(e) => {
                guard.evict().await;
                Err(e)
            }
        }
    }

    async fn acquire(
        &self,
        key: &SessionKey,
        credentials: &MailCredentials,
    ) -> Result<SessionGuard<MailboxSession>, TransportError> {
        let connector = Arc::clone(&self.connector);
        let timeout = self.operation_timeout;
        self.registry
            .acquire(key, || async move {
                bounded(timeout, connector.connect(credentials)).await
            })
            .await
    }

    async fn select_inbox(
        &self,
        guard: &mut SessionGuard<MailboxSession>,
    ) -> Result<(), TransportError> {
        let transport = guard.transport()?;
        bounded(self.operation_timeout, transport.select_inbox())
            .await
            .map(|_| ())
    }

    async fn fetch_with(
        &self,
        guard: &mut SessionGuard<MailboxSession>,
        limit: usize,
        source_account: &str,
    ) -> Result<Vec<Message>, TransportError> {
        let transport = guard.transport()?;
        let mut ids = self.enumerate(transport.as_mut()).await?;
        if ids.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        ids.sort_unstable();
        ids.dedup();
        let newest = &ids[ids.len().saturating_sub(limit)..];

        let mut messages = Vec::with_capacity(newest.len());
        for &id in newest.iter().rev() {
            let raw = bounded(self.operation_timeout, transport.fetch_raw(id)).await?;
            messages.push(decode_message(id, &raw, source_account));
        }
        Ok(messages)
    }

    /// Enumerate message ids: `ALL`, then `RECENT`, then `1..=count`.
    /// The first level that answers wins, even with an empty result.
    ///
    /// Only a rejected search falls through. A timed-out command may still
    /// have its response in flight, so the session is unusable and the
    /// error is returned as is.
    async fn enumerate(
        &self,
        transport: &mut dyn MailboxTransport,
    ) -> Result<Vec<u32>, TransportError> {
        match bounded(self.operation_timeout, transport.search("ALL")).await {
            Ok(ids) => return Ok(ids),
            Err(e @ TransportError::Timeout(_)) => return Err(e),
            Err(e) => tracing::warn!("SEARCH ALL failed ({}), trying RECENT", e),
        }

        match bounded(self.operation_timeout, transport.search("RECENT")).await {
            Ok(ids) => return Ok(ids),
            Err(e @ TransportError::Timeout(_)) => return Err(e),
            Err(e) => tracing::warn!("SEARCH RECENT failed ({}), using message count", e),
        }

        let count = bounded(self.operation_timeout, transport.message_count()).await?;
        Ok((1..=count).collect())
    }
}
