//! Control-panel (cPanel UAPI) management API.
//!
//! - `session.rs` - Authenticated HTTPS session and its connector
//! - `client.rs` - Pooled calls and the mailbox provisioning wrappers

mod client;
mod session;

pub use client::{ManagementAccountRecord, ManagementClient};
pub use session::{UapiConnector, UapiSession};
