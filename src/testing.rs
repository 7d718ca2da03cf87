//! Stub connectors and transports shared by the unit tests.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::config::{MailCredentials, ManagementAccount};
use crate::error::TransportError;
use crate::transport::{
    ApiMethod, ApiRequest, ApiResponse, MailboxConnector, MailboxTransport, ManagementConnector,
    ManagementTransport, SubmissionConnector, SubmissionTransport, Transport,
};

pub fn mail_credentials() -> MailCredentials {
    MailCredentials {
        address: "intake@firm.example".to_string(),
        secret: "secret".to_string(),
        host: "mail.firm.example".to_string(),
        port: 993,
        use_encryption: true,
        display_name: None,
    }
}

pub fn management_account() -> ManagementAccount {
    ManagementAccount {
        user: "firmadmin".to_string(),
        domain: "firm.example".to_string(),
        port: 2083,
        api_token: "TOKEN123".to_string(),
    }
}

pub fn sample_message(subject: &str) -> Vec<u8> {
    format!(
        "From: sender@example.com\r\n\
         To: intake@firm.example\r\n\
         Subject: {subject}\r\n\
         Date: Mon, 1 Jan 2024 12:00:00 +0000\r\n\
         \r\n\
         Body of {subject}\r\n"
    )
    .into_bytes()
}

#[derive(Default)]
struct MailboxState {
    messages: Vec<Vec<u8>>,
    failing_searches: HashSet<String>,
    recent: Vec<u32>,
    fail_fetch: bool,
    failing_selects: usize,
    fetched: Vec<u32>,
    closes: usize,
}

/// In-memory mailbox shared by every session a stub connector hands out.
#[derive(Clone, Default)]
pub struct StubMailbox {
    state: Arc<Mutex<MailboxState>>,
}

impl StubMailbox {
    pub fn with_messages(messages: impl IntoIterator<Item = Vec<u8>>) -> Self {
        let mailbox = Self::default();
        for raw in messages {
            mailbox.deliver(raw);
        }
        mailbox
    }

    pub fn deliver(&self, raw: Vec<u8>) {
        self.state.lock().unwrap().messages.push(raw);
    }

    pub fn fail_search(&self, criteria: &str, fail: bool) {
        let mut state = self.state.lock().unwrap();
        if fail {
            state.failing_searches.insert(criteria.to_string());
        } else {
            state.failing_searches.remove(criteria);
        }
    }

    pub fn set_recent(&self, ids: Vec<u32>) {
        self.state.lock().unwrap().recent = ids;
    }

    pub fn fail_fetch(&self, fail: bool) {
        self.state.lock().unwrap().fail_fetch = fail;
    }

    pub fn fail_next_selects(&self, count: usize) {
        self.state.lock().unwrap().failing_selects = count;
    }

    pub fn fetched(&self) -> Vec<u32> {
        self.state.lock().unwrap().fetched.clone()
    }

    pub fn closes(&self) -> usize {
        self.state.lock().unwrap().closes
    }
}

struct StubMailboxSession {
    mailbox: StubMailbox,
}

#[async_trait]
impl Transport for StubMailboxSession {
    async fn close(&mut self) -> Result<(), TransportError> {
        self.mailbox.state.lock().unwrap().closes += 1;
        Ok(())
    }
}

#[async_trait]
impl MailboxTransport for StubMailboxSession {
    async fn select_inbox(&mut self) -> Result<u32, TransportError> {
        let mut state = self.mailbox.state.lock().unwrap();
        if state.failing_selects > 0 {
            state.failing_selects -= 1;
            return Err(TransportError::protocol("connection reset by peer"));
        }
        Ok(state.messages.len() as u32)
    }

    async fn search(&mut self, criteria: &str) -> Result<Vec<u32>, TransportError> {
        let state = self.mailbox.state.lock().unwrap();
        if state.failing_searches.contains(criteria) {
            return Err(TransportError::protocol(format!("BAD {criteria}")));
        }
        match criteria {
            "ALL" => Ok((1..=state.messages.len() as u32).collect()),
            "RECENT" => Ok(state.recent.clone()),
            other => Err(TransportError::protocol(format!("unsupported {other}"))),
        }
    }

    async fn message_count(&mut self) -> Result<u32, TransportError> {
        Ok(self.mailbox.state.lock().unwrap().messages.len() as u32)
    }

    async fn fetch_raw(&mut self, id: u32) -> Result<Vec<u8>, TransportError> {
        let mut state = self.mailbox.state.lock().unwrap();
        if state.fail_fetch {
            return Err(TransportError::protocol("FETCH failed"));
        }
        state.fetched.push(id);
        state
            .messages
            .get(id as usize - 1)
            .cloned()
            .ok_or_else(|| TransportError::protocol(format!("no message {id}")))
    }
}

#[derive(Clone)]
pub struct StubMailboxConnector {
    mailbox: StubMailbox,
    connects: Arc<AtomicUsize>,
    fail: Arc<AtomicBool>,
}

impl StubMailboxConnector {
    pub fn new(mailbox: StubMailbox) -> Self {
        Self {
            mailbox,
            connects: Arc::new(AtomicUsize::new(0)),
            fail: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn mailbox(&self) -> &StubMailbox {
        &self.mailbox
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn fail_connects(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl MailboxConnector for StubMailboxConnector {
    async fn connect(
        &self,
        credentials: &MailCredentials,
    ) -> Result<Box<dyn MailboxTransport>, TransportError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(TransportError::connect(credentials.endpoint(), "login failed"));
        }
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(StubMailboxSession {
            mailbox: self.mailbox.clone(),
        }))
    }
}

/// Submission stub. Sent messages are recorded and, when a mailbox is
/// attached, delivered to it.
#[derive(Clone, Default)]
pub struct StubSubmissionConnector {
    sent: Arc<Mutex<Vec<Vec<u8>>>>,
    connects: Arc<AtomicUsize>,
    closes: Arc<AtomicUsize>,
    fail_sends: Arc<AtomicBool>,
    deliver_to: Option<StubMailbox>,
}

impl StubSubmissionConnector {
    pub fn delivering_to(mailbox: StubMailbox) -> Self {
        Self {
            deliver_to: Some(mailbox),
            ..Default::default()
        }
    }

    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.sent.lock().unwrap().clone()
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }
}

struct StubSubmissionSession {
    connector: StubSubmissionConnector,
}

#[async_trait]
impl Transport for StubSubmissionSession {
    async fn close(&mut self) -> Result<(), TransportError> {
        self.connector.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl SubmissionTransport for StubSubmissionSession {
    async fn send(&mut self, message: lettre::Message) -> Result<(), TransportError> {
        if self.connector.fail_sends.load(Ordering::SeqCst) {
            return Err(TransportError::protocol("421 service not available"));
        }
        let raw = message.formatted();
        if let Some(mailbox) = &self.connector.deliver_to {
            mailbox.deliver(raw.clone());
        }
        self.connector.sent.lock().unwrap().push(raw);
        Ok(())
    }
}

#[async_trait]
impl SubmissionConnector for StubSubmissionConnector {
    async fn connect(
        &self,
        _credentials: &MailCredentials,
    ) -> Result<Box<dyn SubmissionTransport>, TransportError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(StubSubmissionSession {
            connector: self.clone(),
        }))
    }
}

/// A management call as the stub saw it
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub method: ApiMethod,
    pub module: String,
    pub function: String,
    pub params: Vec<(String, String)>,
}

/// Management stub answering from a script; answers `{"status":1}` with
/// status 200 once the script runs out.
#[derive(Clone, Default)]
pub struct StubManagementConnector {
    script: Arc<Mutex<VecDeque<Result<ApiResponse, TransportError>>>>,
    calls: Arc<Mutex<Vec<RecordedCall>>>,
    connects: Arc<AtomicUsize>,
}

impl StubManagementConnector {
    pub fn respond(&self, status: u16, body: &str) {
        self.script.lock().unwrap().push_back(Ok(ApiResponse {
            status,
            body: body.to_string(),
        }));
    }

    pub fn fail_next(&self, error: TransportError) {
        self.script.lock().unwrap().push_back(Err(error));
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

struct StubManagementSession {
    connector: StubManagementConnector,
}

#[async_trait]
impl Transport for StubManagementSession {
    async fn close(&mut self) -> Result<(), TransportError> {
        Ok(())
    }
}

#[async_trait]
impl ManagementTransport for StubManagementSession {
    async fn execute(&mut self, request: ApiRequest<'_>) -> Result<ApiResponse, TransportError> {
        self.connector.calls.lock().unwrap().push(RecordedCall {
            method: request.method,
            module: request.module.to_string(),
            function: request.function.to_string(),
            params: request
                .params
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        });
        self.connector
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| {
                Ok(ApiResponse {
                    status: 200,
                    body: r#"{"status":1,"errors":null,"data":null}"#.to_string(),
                })
            })
    }
}

#[async_trait]
impl ManagementConnector for StubManagementConnector {
    async fn connect(
        &self,
        _account: &ManagementAccount,
    ) -> Result<Box<dyn ManagementTransport>, TransportError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(StubManagementSession {
            connector: self.clone(),
        }))
    }
}
