use serde::Serialize;

/// A decoded inbox message.
///
/// `id` is the sequence number inside the retrieval session that produced
/// it. Sequence numbers are reassigned per session, so it must not be stored
/// or reused across requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Message {
    pub id: u32,
    pub subject: String,
    pub from: String,
    pub to: String,
    /// Raw `Date` header
    pub date: String,
    /// Plain-text body
    pub body: String,
    /// Mailbox the message was read from
    pub source_account: String,
}

/// Mail to dispatch.
#[derive(Debug, Clone, Default)]
pub struct OutgoingMessage {
    /// Comma-separated recipient lists are accepted in each entry
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub subject: String,
    pub text: String,
    /// Sent as a `multipart/alternative` sibling of `text` when present
    pub html: Option<String>,
    pub in_reply_to: Option<String>,
}

impl OutgoingMessage {
    pub fn new(to: impl Into<String>, subject: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            to: vec![to.into()],
            subject: subject.into(),
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn with_html(mut self, html: impl Into<String>) -> Self {
        self.html = Some(html.into());
        self
    }

    pub fn with_cc(mut self, cc: impl Into<String>) -> Self {
        self.cc.push(cc.into());
        self
    }
}
