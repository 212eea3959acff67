use serde::{Deserialize, Serialize};

pub const FROM_HEADER: &str = "From";
pub const SUBJECT_HEADER: &str = "Subject";

/// A single message header
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub name: String,
    pub value: String,
}

impl Header {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// A message as returned by the email transport. The body may be ciphertext.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct TransportMessage {
    pub id: String,
    /// Epoch milliseconds
    pub internal_date: u64,
    pub headers: Vec<Header>,
    pub body: String,
}

impl TransportMessage {
    /// Value of the first header named exactly `name`
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|h| h.name == name)
            .map(|h| h.value.as_str())
    }

    pub fn from(&self) -> Option<&str> {
        self.header(FROM_HEADER)
    }

    pub fn subject(&self) -> Option<&str> {
        self.header(SUBJECT_HEADER)
    }
}

/// Messages from one counterparty, newest first
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conversation {
    pub counterparty: String,
    pub messages: Vec<TransportMessage>,
    /// Largest `internal_date` among `messages`
    pub last_activity: u64,
}

/// A message ready for display
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct DisplayMessage {
    pub id: String,
    pub sender: String,
    pub subject: String,
    pub timestamp: u64,
    pub content: String,
    /// Whether `content` is decrypted plaintext rather than the raw body
    pub decrypted: bool,
}
