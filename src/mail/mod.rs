pub mod dispatch;
pub mod imap;
pub mod parser;
pub mod retrieval;
pub mod smtp;
pub mod types;

pub use dispatch::DispatchEngine;
pub use imap::{ImapClient, ImapConnector};
pub use parser::decode_message;
pub use retrieval::RetrievalEngine;
pub use smtp::{SmtpConnector, SmtpSession, build_message};
pub use types::{Message, OutgoingMessage};
