//! Pool-wide constants for tuning and configuration
//!
//! Centralizes magic numbers to make them discoverable and configurable.

/// Idle time in seconds after which a pooled session is swept.
/// Bounds the number of open external connections without a timer thread.
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 30 * 60;

/// Upper bound in seconds for a single network operation
/// (connect, select, search, fetch, send, HTTPS call).
pub const DEFAULT_OPERATION_TIMEOUT_SECS: u64 = 30;

/// Upper bound in seconds for closing a transport.
/// Closing a dead connection may hang; it is abandoned after this.
pub const DEFAULT_CLOSE_TIMEOUT_SECS: u64 = 5;

/// Number of most recent messages returned by a fetch when the caller
/// does not specify a limit.
pub const DEFAULT_FETCH_LIMIT: usize = 20;

/// Mailbox examined by the retrieval engine.
pub const INBOX: &str = "INBOX";

/// Implicit-TLS SMTP port. Any other port uses STARTTLS.
pub const SMTPS_PORT: u16 = 465;

/// Default control-panel (cPanel UAPI) HTTPS port.
pub const DEFAULT_MANAGEMENT_PORT: u16 = 2083;
