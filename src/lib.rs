//! Persistent connection pooling for mail and control-panel endpoints.
//!
//! A host service makes short request-scoped calls (send a message, read the
//! inbox, provision a mailbox) and [`ConnectionPool`] keeps the underlying
//! IMAP, SMTP and UAPI sessions alive between them:
//!
//! - `pool/` - Session identity, the keyed registry and the pool service
//! - `mail/` - Retrieval (IMAP) and dispatch (SMTP) engines, message decoding
//! - `management/` - Control-panel API sessions and provisioning calls
//! - `transport.rs` - Transport and connector traits at the network seam
//! - `config.rs` - TOML configuration and credentials
//! - `error.rs` - Error types returned at the pool boundary
//! - `logging.rs` - `tracing` subscriber setup for hosts

pub mod config;
pub mod constants;
pub mod error;
pub mod logging;
pub mod mail;
pub mod management;
pub mod pool;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{Config, MailCredentials, ManagementAccount, PoolConfig};
pub use error::{ApiError, DispatchError, RetrievalError, TransportError};
pub use logging::init_logging;
pub use mail::{Message, OutgoingMessage};
pub use management::ManagementAccountRecord;
pub use pool::{ConnectionPool, SessionKey, SweepReport};
