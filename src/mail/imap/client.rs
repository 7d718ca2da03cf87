//! IMAP mailbox operations used by the retrieval engine.

use async_trait::async_trait;
use futures::StreamExt;

use super::ImapClient;
use crate::constants::INBOX;
use crate::error::TransportError;
use crate::transport::{MailboxTransport, Transport};

#[async_trait]
impl Transport for ImapClient {
    async fn close(&mut self) -> Result<(), TransportError> {
        self.session
            .logout()
            .await
            .map_err(|e| TransportError::protocol(format!("Logout failed: {}", e)))?;
        tracing::debug!("Logged out of IMAP session for {}", self.address);
        Ok(())
    }
}

#[async_trait]
impl MailboxTransport for ImapClient {
    async fn select_inbox(&mut self) -> Result<u32, TransportError> {
        let mailbox = self.session.select(INBOX).await.map_err(|e| {
            TransportError::protocol(format!("Failed to select folder '{}': {}", INBOX, e))
        })?;
        Ok(mailbox.exists)
    }

    async fn search(&mut self, criteria: &str) -> Result<Vec<u32>, TransportError> {
        let found = self
            .session
            .search(criteria)
            .await
            .map_err(|e| TransportError::protocol(format!("SEARCH {} failed: {}", criteria, e)))?;

        let mut ids: Vec<u32> = found.into_iter().collect();
        ids.sort_unstable();
        Ok(ids)
    }

    async fn message_count(&mut self) -> Result<u32, TransportError> {
        let mailbox = self
            .session
            .status(INBOX, "(MESSAGES)")
            .await
            .map_err(|e| TransportError::protocol(format!("STATUS {} failed: {}", INBOX, e)))?;
        Ok(mailbox.exists)
    }

    async fn fetch_raw(&mut self, id: u32) -> Result<Vec<u8>, TransportError> {
        let mut messages = self
            .session
            .fetch(id.to_string(), "BODY.PEEK[]")
            .await
            .map_err(|e| TransportError::protocol(format!("Failed to fetch message {}: {}", id, e)))?;

        // Drain the whole response so the next command starts clean
        let mut raw = None;
        while let Some(result) = messages.next().await {
            let fetch = result.map_err(|e| {
                TransportError::protocol(format!("Failed to fetch message {}: {}", id, e))
            })?;
            if raw.is_none()
                && let Some(body) = fetch.body()
            {
                raw = Some(body.to_vec());
            }
        }

        raw.ok_or_else(|| TransportError::protocol(format!("Message {} has no body", id)))
    }
}
