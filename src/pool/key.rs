use std::fmt;

use crate::config::{MailCredentials, ManagementAccount};

/// Which external system a pooled session talks to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    Submission,
    Retrieval,
    Management,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Submission => "smtp",
            Protocol::Retrieval => "imap",
            Protocol::Management => "uapi",
        }
    }
}

/// Identity of a pooled session. Two keys are the same session only if
/// protocol, principal, host and port all match.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub protocol: Protocol,
    /// Mailbox address or management API user
    pub principal: String,
    pub host: String,
    pub port: u16,
}

impl SessionKey {
    pub fn new(
        protocol: Protocol,
        principal: impl Into<String>,
        host: impl Into<String>,
        port: u16,
    ) -> Self {
        Self {
            protocol,
            principal: principal.into(),
            host: host.into(),
            port,
        }
    }

    pub fn submission(credentials: &MailCredentials) -> Self {
        Self::from_credentials(Protocol::Submission, credentials)
    }

    pub fn retrieval(credentials: &MailCredentials) -> Self {
        Self::from_credentials(Protocol::Retrieval, credentials)
    }

    pub fn management(account: &ManagementAccount) -> Self {
        Self::new(
            Protocol::Management,
            &account.user,
            &account.domain,
            account.port,
        )
    }

    fn from_credentials(protocol: Protocol, credentials: &MailCredentials) -> Self {
        Self::new(
            protocol,
            &credentials.address,
            &credentials.host,
            credentials.port,
        )
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}://{}@{}:{}",
            self.protocol.as_str(),
            self.principal,
            self.host,
            self.port
        )
    }
}
