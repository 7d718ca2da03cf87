//! The connection pool service.
//!
//! - `key.rs` - Typed session identity
//! - `registry.rs` - Keyed session registry with per-key locking and idle sweep
//! - `mod.rs` - `ConnectionPool`, tying the three registries to their engines

mod key;
mod registry;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::config::{MailCredentials, ManagementAccount, PoolConfig};
use crate::error::{ApiError, DispatchError, RetrievalError, TransportError};
use crate::mail::{DispatchEngine, ImapConnector, Message, OutgoingMessage, RetrievalEngine, SmtpConnector};
use crate::management::{ManagementAccountRecord, ManagementClient, UapiConnector};
use crate::transport::{MailboxConnector, ManagementConnector, SubmissionConnector};

pub use key::{Protocol, SessionKey};
pub use registry::{SessionGuard, SessionRegistry};

/// Run `operation`, failing with [`TransportError::Timeout`] if it takes
/// longer than `timeout`.
pub async fn bounded<T, F>(timeout: Duration, operation: F) -> Result<T, TransportError>
where
    F: Future<Output = Result<T, TransportError>>,
{
    match tokio::time::timeout(timeout, operation).await {
        Ok(result) => result,
        Err(_) => Err(TransportError::Timeout(timeout)),
    }
}

/// Sessions removed by one idle sweep, per registry
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub retrieval: usize,
    pub submission: usize,
    pub management: usize,
}

impl SweepReport {
    pub fn total(&self) -> usize {
        self.retrieval + self.submission + self.management
    }
}

/// Pooled sessions to the mail and control-panel endpoints.
///
/// Construct one per host process (or per test) and hand clones to request
/// handlers; clones share the same sessions. Call
/// [`sweep_idle`](Self::sweep_idle) at the start of every request.
#[derive(Clone)]
pub struct ConnectionPool {
    config: Arc<PoolConfig>,
    retrieval: RetrievalEngine,
    dispatch: DispatchEngine,
    management: ManagementClient,
}

impl ConnectionPool {
    /// Pool with the production IMAP, SMTP and UAPI connectors
    pub fn new(config: PoolConfig) -> Result<Self, TransportError> {
        let mailbox = Arc::new(ImapConnector::new()?);
        let submission = Arc::new(SmtpConnector::new(
            config.operation_timeout(),
            config.idle_timeout(),
        ));
        let management = Arc::new(UapiConnector::new(config.operation_timeout()));
        Ok(Self::with_connectors(config, mailbox, submission, management))
    }

    pub fn with_connectors(
        config: PoolConfig,
        mailbox: Arc<dyn MailboxConnector>,
        submission: Arc<dyn SubmissionConnector>,
        management: Arc<dyn ManagementConnector>,
    ) -> Self {
        let close_timeout = config.close_timeout();
        let operation_timeout = config.operation_timeout();

        Self {
            retrieval: RetrievalEngine::new(
                SessionRegistry::new(Protocol::Retrieval, close_timeout),
                mailbox,
                operation_timeout,
            ),
            dispatch: DispatchEngine::new(
                SessionRegistry::new(Protocol::Submission, close_timeout),
                submission,
                operation_timeout,
            ),
            management: ManagementClient::new(
                SessionRegistry::new(Protocol::Management, close_timeout),
                management,
                operation_timeout,
            ),
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn retrieval(&self) -> &RetrievalEngine {
        &self.retrieval
    }

    pub fn dispatch(&self) -> &DispatchEngine {
        &self.dispatch
    }

    pub fn management(&self) -> &ManagementClient {
        &self.management
    }

    /// Close every session idle for longer than the configured threshold.
    ///
    /// Cheap: one pass over the active sessions, no network wait.
    pub async fn sweep_idle(&self) -> SweepReport {
        let threshold = self.config.idle_timeout();
        let report = SweepReport {
            retrieval: self.retrieval.registry().sweep(threshold).await,
            submission: self.dispatch.registry().sweep(threshold).await,
            management: self.management.registry().sweep(threshold).await,
        };
        if report.total() > 0 {
            tracing::debug!("Idle sweep closed {} session(s)", report.total());
        }
        report
    }

    /// Number of live sessions across all registries
    pub fn session_count(&self) -> usize {
        self.retrieval.registry().len()
            + self.dispatch.registry().len()
            + self.management.registry().len()
    }

    pub async fn send(
        &self,
        credentials: &MailCredentials,
        message: &OutgoingMessage,
    ) -> Result<(), DispatchError> {
        self.dispatch
            .send(&SessionKey::submission(credentials), credentials, message)
            .await
    }

    /// Most recent inbox messages, newest first. `limit` defaults to the
    /// configured fetch limit.
    pub async fn fetch(
        &self,
        credentials: &MailCredentials,
        limit: Option<usize>,
    ) -> Result<Vec<Message>, RetrievalError> {
        let limit = limit.unwrap_or(self.config.fetch_limit);
        self.retrieval
            .fetch(&SessionKey::retrieval(credentials), credentials, limit)
            .await
    }

    /// Most recent inbox messages, or none if the mailbox is unreachable.
    pub async fn fetch_or_empty(
        &self,
        credentials: &MailCredentials,
        limit: Option<usize>,
    ) -> Vec<Message> {
        let limit = limit.unwrap_or(self.config.fetch_limit);
        self.retrieval
            .fetch_or_empty(&SessionKey::retrieval(credentials), credentials, limit)
            .await
    }

    pub async fn call(
        &self,
        account: &ManagementAccount,
        module: &str,
        function: &str,
        params: &[(&str, String)],
    ) -> Result<Value, ApiError> {
        self.management
            .call(&SessionKey::management(account), account, module, function, params)
            .await
    }

    pub async fn create_account(
        &self,
        account: &ManagementAccount,
        email: &str,
        password: &str,
        quota_mb: u64,
    ) -> Result<(), ApiError> {
        self.management
            .create_account(account, email, password, quota_mb)
            .await
    }

    pub async fn list_accounts(
        &self,
        account: &ManagementAccount,
    ) -> Result<Vec<ManagementAccountRecord>, ApiError> {
        self.management.list_accounts(account).await
    }

    pub async fn delete_account(
        &self,
        account: &ManagementAccount,
        email: &str,
    ) -> Result<(), ApiError> {
        self.management.delete_account(account, email).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{
        StubMailbox, StubMailboxConnector, StubManagementConnector, StubSubmissionConnector,
        mail_credentials, management_account,
    };

    struct Harness {
        pool: ConnectionPool,
        mailbox: StubMailboxConnector,
        submission: StubSubmissionConnector,
        management: StubManagementConnector,
    }

    fn harness() -> Harness {
        let mailbox = StubMailbox::default();
        let mailbox_connector = StubMailboxConnector::new(mailbox.clone());
        let submission = StubSubmissionConnector::delivering_to(mailbox);
        let management = StubManagementConnector::default();
        let pool = ConnectionPool::with_connectors(
            PoolConfig::default(),
            Arc::new(mailbox_connector.clone()),
            Arc::new(submission.clone()),
            Arc::new(management.clone()),
        );
        Harness {
            pool,
            mailbox: mailbox_connector,
            submission,
            management,
        }
    }

    #[tokio::test]
    async fn test_send_then_fetch_round_trip() {
        let h = harness();
        let creds = mail_credentials();

        let message = OutgoingMessage::new("a@x.com", "S", "B");
        h.pool.send(&creds, &message).await.unwrap();

        let messages = h.pool.fetch(&creds, None).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].subject, "S");
        assert_eq!(messages[0].body, "B");
        assert_eq!(messages[0].to, "a@x.com");
        assert_eq!(messages[0].from, creds.address);
        assert_eq!(h.pool.session_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_sweep_across_registries() {
        let h = harness();
        let creds = mail_credentials();
        let account = management_account();

        h.pool
            .send(&creds, &OutgoingMessage::new("a@x.com", "S", "B"))
            .await
            .unwrap();
        h.pool.fetch(&creds, None).await.unwrap();
        h.pool.list_accounts(&account).await.unwrap_or_default();

        let threshold = h.pool.config().idle_timeout();
        tokio::time::advance(threshold).await;
        assert_eq!(h.pool.sweep_idle().await.total(), 0);

        tokio::time::advance(Duration::from_secs(1)).await;
        let report = h.pool.sweep_idle().await;
        assert_eq!(
            report,
            SweepReport {
                retrieval: 1,
                submission: 1,
                management: 1,
            }
        );
        assert_eq!(h.pool.session_count(), 0);

        h.pool.fetch(&creds, None).await.unwrap();
        assert_eq!(h.mailbox.connects(), 2);
        assert_eq!(h.submission.connects(), 1);
        assert_eq!(h.management.connects(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recently_used_session_survives_sweep() {
        let h = harness();
        let creds = mail_credentials();
        let threshold = h.pool.config().idle_timeout();

        h.pool.fetch(&creds, None).await.unwrap();
        tokio::time::advance(threshold / 2).await;
        h.pool.fetch(&creds, None).await.unwrap();
        tokio::time::advance(threshold / 2 + Duration::from_secs(1)).await;

        assert_eq!(h.pool.sweep_idle().await.total(), 0);
        assert_eq!(h.mailbox.connects(), 1);
    }

    #[tokio::test]
    async fn test_pools_do_not_share_sessions() {
        let first = harness();
        let second = harness();
        let creds = mail_credentials();

        first.pool.fetch(&creds, None).await.unwrap();
        second.pool.fetch(&creds, None).await.unwrap();

        assert_eq!(first.mailbox.connects(), 1);
        assert_eq!(second.mailbox.connects(), 1);
        assert_eq!(first.pool.session_count(), 1);
    }

    #[tokio::test]
    async fn test_fetch_limit_defaults_to_config() {
        let h = harness();
        let creds = mail_credentials();
        for i in 0..(h.pool.config().fetch_limit + 5) {
            h.pool
                .send(&creds, &OutgoingMessage::new("a@x.com", format!("S{i}"), "B"))
                .await
                .unwrap();
        }

        let messages = h.pool.fetch(&creds, None).await.unwrap();
        assert_eq!(messages.len(), h.pool.config().fetch_limit);
        assert_eq!(
            messages[0].subject,
            format!("S{}", h.pool.config().fetch_limit + 4)
        );

        let messages = h.pool.fetch(&creds, Some(2)).await.unwrap();
        assert_eq!(messages.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timed_out_search_evicts_without_fallback() {
        use crate::transport::{MailboxTransport, Transport};
        use async_trait::async_trait;
        use std::sync::Mutex;

        type Commands = Arc<Mutex<Vec<String>>>;

        struct Hanging {
            commands: Commands,
        }

        impl Hanging {
            fn record(&self, command: &str) {
                self.commands.lock().unwrap().push(command.to_string());
            }
        }

        #[async_trait]
        impl Transport for Hanging {
            async fn close(&mut self) -> Result<(), TransportError> {
                Ok(())
            }
        }

        #[async_trait]
        impl MailboxTransport for Hanging {
            async fn select_inbox(&mut self) -> Result<u32, TransportError> {
                Ok(0)
            }
            async fn search(&mut self, criteria: &str) -> Result<Vec<u32>, TransportError> {
                self.record(criteria);
                futures::future::pending().await
            }
            async fn message_count(&mut self) -> Result<u32, TransportError> {
                self.record("STATUS");
                futures::future::pending().await
            }
            async fn fetch_raw(&mut self, _id: u32) -> Result<Vec<u8>, TransportError> {
                self.record("FETCH");
                futures::future::pending().await
            }
        }

        struct HangingConnector {
            commands: Commands,
        }

        #[async_trait]
        impl MailboxConnector for HangingConnector {
            async fn connect(
                &self,
                _credentials: &MailCredentials,
            ) -> Result<Box<dyn MailboxTransport>, TransportError> {
                Ok(Box::new(Hanging {
                    commands: Arc::clone(&self.commands),
                }))
            }
        }

        let commands = Commands::default();
        let pool = ConnectionPool::with_connectors(
            PoolConfig::default(),
            Arc::new(HangingConnector {
                commands: Arc::clone(&commands),
            }),
            Arc::new(StubSubmissionConnector::default()),
            Arc::new(StubManagementConnector::default()),
        );
        let creds = mail_credentials();

        let started = tokio::time::Instant::now();
        let err = pool.fetch(&creds, None).await.unwrap_err();
        assert!(matches!(
            err,
            RetrievalError::Transport(TransportError::Timeout(_))
        ));
        assert_eq!(*commands.lock().unwrap(), vec!["ALL".to_string()]);
        assert!(started.elapsed() < pool.config().operation_timeout() * 2);
        assert_eq!(pool.session_count(), 0);
    }
}
