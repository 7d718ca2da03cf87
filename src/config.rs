use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants::{
    DEFAULT_CLOSE_TIMEOUT_SECS, DEFAULT_FETCH_LIMIT, DEFAULT_IDLE_TIMEOUT_SECS,
    DEFAULT_MANAGEMENT_PORT, DEFAULT_OPERATION_TIMEOUT_SECS,
};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub pool: PoolConfig,
    /// Mailboxes the portal sends from and reads
    #[serde(default)]
    pub mailboxes: Vec<MailboxConfig>,
    /// Control-panel account used to provision mailboxes
    #[serde(default)]
    pub management: Option<ManagementAccount>,
}

/// Lifecycle tuning shared by all three registries
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Sessions unused for longer than this are closed by the sweep
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    /// Bound on every network operation, including connect
    #[serde(default = "default_operation_timeout_secs")]
    pub operation_timeout_secs: u64,
    /// Bound on closing a transport
    #[serde(default = "default_close_timeout_secs")]
    pub close_timeout_secs: u64,
    /// Messages returned by `fetch` when the caller passes no limit
    #[serde(default = "default_fetch_limit")]
    pub fetch_limit: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: default_idle_timeout_secs(),
            operation_timeout_secs: default_operation_timeout_secs(),
            close_timeout_secs: default_close_timeout_secs(),
            fetch_limit: default_fetch_limit(),
        }
    }
}

impl PoolConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_secs)
    }

    pub fn close_timeout(&self) -> Duration {
        Duration::from_secs(self.close_timeout_secs)
    }
}

/// Connection details for one protocol endpoint of a mailbox
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailCredentials {
    /// Mailbox address, also the login name
    pub address: String,
    pub secret: String,
    pub host: String,
    pub port: u16,
    #[serde(default = "default_true")]
    pub use_encryption: bool,
    /// Shown in the `From` header of dispatched mail
    #[serde(default)]
    pub display_name: Option<String>,
}

impl std::fmt::Debug for MailCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MailCredentials")
            .field("address", &self.address)
            .field("secret", &"<redacted>")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("use_encryption", &self.use_encryption)
            .field("display_name", &self.display_name)
            .finish()
    }
}

impl MailCredentials {
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub server: String,
    pub port: u16,
    #[serde(default = "default_true")]
    pub tls: bool,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct MailboxConfig {
    pub email: String,
    #[serde(default)]
    pub display_name: Option<String>,
    pub password: String,
    #[serde(default = "default_imap_server")]
    pub imap: ServerConfig,
    #[serde(default = "default_smtp_server")]
    pub smtp: ServerConfig,
}

impl std::fmt::Debug for MailboxConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MailboxConfig")
            .field("email", &self.email)
            .field("display_name", &self.display_name)
            .field("password", &"<redacted>")
            .field("imap", &self.imap)
            .field("smtp", &self.smtp)
            .finish()
    }
}

impl MailboxConfig {
    /// Credentials for the inbound (IMAP) side of this mailbox
    pub fn retrieval_credentials(&self) -> MailCredentials {
        self.credentials_for(&self.imap)
    }

    /// Credentials for the outbound (SMTP) side of this mailbox
    pub fn submission_credentials(&self) -> MailCredentials {
        self.credentials_for(&self.smtp)
    }

    fn credentials_for(&self, server: &ServerConfig) -> MailCredentials {
        MailCredentials {
            address: self.email.clone(),
            secret: self.password.clone(),
            host: server.server.clone(),
            port: server.port,
            use_encryption: server.tls,
            display_name: self.display_name.clone(),
        }
    }
}

/// Control-panel API identity. Mailboxes are provisioned under `domain`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagementAccount {
    pub user: String,
    pub domain: String,
    #[serde(default = "default_management_port")]
    pub port: u16,
    pub api_token: String,
}

impl std::fmt::Debug for ManagementAccount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagementAccount")
            .field("user", &self.user)
            .field("domain", &self.domain)
            .field("port", &self.port)
            .field("api_token", &"<redacted>")
            .finish()
    }
}

impl ManagementAccount {
    /// `https://{domain}:{port}`, the root every UAPI call hangs off
    pub fn base_url(&self) -> String {
        format!("https://{}:{}", self.domain, self.port)
    }

    /// Value of the `Authorization` header for UAPI token auth
    pub fn authorization(&self) -> String {
        format!("cpanel {}:{}", self.user, self.api_token)
    }
}

impl Config {
    pub fn config_dir() -> Result<PathBuf> {
        let dir = dirs::config_dir()
            .context("Could not find config directory")?
            .join("mailpool");
        Ok(dir)
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load from the default location under the user config directory
    pub fn load_default() -> Result<Self> {
        Self::load(&Self::config_path()?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            anyhow::bail!(
                "Configuration file not found at {}\n\
                 Example:\n\n\
                 [pool]\n\
                 idle_timeout_secs = 1800\n\n\
                 [[mailboxes]]\n\
                 email = \"intake@example.com\"\n\
                 password = \"...\"\n\n\
                 [mailboxes.imap]\n\
                 server = \"mail.example.com\"\n\
                 port = 993",
                path.display()
            );
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        if config.pool.operation_timeout_secs == 0 {
            anyhow::bail!("pool.operation_timeout_secs must be greater than zero");
        }
        Ok(config)
    }

    /// Find a mailbox by address (case-insensitive)
    pub fn mailbox(&self, email: &str) -> Option<&MailboxConfig> {
        self.mailboxes
            .iter()
            .find(|m| m.email.eq_ignore_ascii_case(email))
    }
}

fn default_idle_timeout_secs() -> u64 {
    DEFAULT_IDLE_TIMEOUT_SECS
}

fn default_operation_timeout_secs() -> u64 {
    DEFAULT_OPERATION_TIMEOUT_SECS
}

fn default_close_timeout_secs() -> u64 {
    DEFAULT_CLOSE_TIMEOUT_SECS
}

fn default_fetch_limit() -> usize {
    DEFAULT_FETCH_LIMIT
}

fn default_management_port() -> u16 {
    DEFAULT_MANAGEMENT_PORT
}

fn default_imap_server() -> ServerConfig {
    ServerConfig {
        server: "localhost".to_string(),
        port: 993,
        tls: true,
    }
}

fn default_smtp_server() -> ServerConfig {
    ServerConfig {
        server: "localhost".to_string(),
        port: 587,
        tls: true,
    }
}

fn default_true() -> bool {
    true
}
