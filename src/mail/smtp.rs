use std::time::Duration;

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::{Mailbox, MultiPart};
use lettre::transport::smtp::PoolConfig as SmtpPoolConfig;
use lettre::transport::smtp::authentication::{Credentials, Mechanism};
use lettre::{Address, AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use crate::config::MailCredentials;
use crate::constants::SMTPS_PORT;
use crate::error::{DispatchError, TransportError};
use crate::transport::{SubmissionConnector, SubmissionTransport, Transport};

use super::types::OutgoingMessage;

/// Build the MIME message for `compose`, sent as `credentials.address`.
pub fn build_message(
    credentials: &MailCredentials,
    compose: &OutgoingMessage,
) -> Result<Message, DispatchError> {
    let address = credentials
        .address
        .parse::<Address>()
        .map_err(|e| DispatchError::Compose(format!("Invalid from address: {}", e)))?;
    let from_mailbox = Mailbox::new(credentials.display_name.clone(), address);

    let mut builder = Message::builder()
        .from(from_mailbox)
        .subject(&compose.subject);

    // Handle comma-separated lists and trailing commas
    let mut has_recipient = false;
    for to_addr in split_addresses(&compose.to) {
        let to_mailbox = to_addr.parse::<Mailbox>().map_err(|e| {
            DispatchError::Compose(format!("Invalid recipient address {}: {}", to_addr, e))
        })?;
        builder = builder.to(to_mailbox);
        has_recipient = true;
    }
    if !has_recipient {
        return Err(DispatchError::Compose("No recipients".to_string()));
    }

    for cc_addr in split_addresses(&compose.cc) {
        let cc_mailbox = cc_addr.parse::<Mailbox>().map_err(|e| {
            DispatchError::Compose(format!("Invalid CC address {}: {}", cc_addr, e))
        })?;
        builder = builder.cc(cc_mailbox);
    }

    if let Some(ref reply_to) = compose.in_reply_to {
        builder = builder.in_reply_to(reply_to.clone());
    }

    let message = match compose.html {
        Some(ref html) => builder.multipart(MultiPart::alternative_plain_html(
            compose.text.clone(),
            html.clone(),
        )),
        None => builder
            .header(ContentType::TEXT_PLAIN)
            .body(compose.text.clone()),
    };

    message.map_err(|e| DispatchError::Compose(format!("Failed to build email message: {}", e)))
}

fn split_addresses(lists: &[String]) -> impl Iterator<Item = &str> {
    lists
        .iter()
        .flat_map(|list| list.split(','))
        .map(str::trim)
        .filter(|addr| !addr.is_empty())
}

/// Authenticated SMTP session.
///
/// Wraps a lettre transport whose internal pool is capped at one
/// connection, so the session keeps a single authenticated connection open
/// between sends.
pub struct SmtpSession {
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

#[async_trait]
impl Transport for SmtpSession {
    async fn close(&mut self) -> Result<(), TransportError> {
        // The pooled connection sends QUIT when the transport is dropped
        Ok(())
    }
}

#[async_trait]
impl SubmissionTransport for SmtpSession {
    async fn send(&mut self, message: Message) -> Result<(), TransportError> {
        self.transport
            .send(message)
            .await
            .map(|_| ())
            .map_err(|e| TransportError::protocol(format!("Failed to send email: {}", e)))
    }
}

/// Opens SMTP sessions: implicit TLS on 465, STARTTLS elsewhere.
pub struct SmtpConnector {
    operation_timeout: Duration,
    idle_timeout: Duration,
}

impl SmtpConnector {
    pub fn new(operation_timeout: Duration, idle_timeout: Duration) -> Self {
        Self {
            operation_timeout,
            idle_timeout,
        }
    }
}

#[async_trait]
impl SubmissionConnector for SmtpConnector {
    async fn connect(
        &self,
        credentials: &MailCredentials,
    ) -> Result<Box<dyn SubmissionTransport>, TransportError> {
        let endpoint = credentials.endpoint();
        let creds = Credentials::new(credentials.address.clone(), credentials.secret.clone());

        // Always require TLS - plaintext SMTP exposes credentials
        if !credentials.use_encryption {
            tracing::warn!(
                "SMTP TLS disabled for {} - enabling anyway for security",
                credentials.address
            );
        }

        let builder = if credentials.port == SMTPS_PORT {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&credentials.host)
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&credentials.host)
        }
        .map_err(|e| TransportError::connect(&endpoint, e))?;

        let transport = builder
            .port(credentials.port)
            .credentials(creds)
            .authentication(vec![Mechanism::Plain, Mechanism::Login])
            .timeout(Some(self.operation_timeout))
            .pool_config(
                SmtpPoolConfig::new()
                    .max_size(1)
                    .idle_timeout(self.idle_timeout),
            )
            .build();

        // The handshake and login happen on the first send and the connection
        // then stays open in lettre's pool. Bad credentials surface as a
        // failed send, which evicts this session.
        tracing::info!("Prepared SMTP session for {}", endpoint);
        Ok(Box::new(SmtpSession { transport }))
    }
}
