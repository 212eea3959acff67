//! Wire events exchanged with the directory service.
//!
//! Each event is one JSON object `{"event": <name>, "data": {...}}`.

use serde::{Deserialize, Serialize};

/// Events sent to the directory
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    Register {
        user_email: String,
    },
    CreateAccount {
        user_email: String,
        public_key: String,
    },
    /// Relayed by the server to `recipient` as `email_notification`
    EmailSent {
        recipient: String,
        sender: String,
    },
}

/// Events received from the directory
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    AccountFound {},
    AccountNotFound {},
    AccountCreated {},
    Error {
        #[serde(default)]
        reason: String,
    },
    EmailNotification {
        sender: String,
    },
}

impl ServerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::AccountFound {} => "account_found",
            ServerEvent::AccountNotFound {} => "account_not_found",
            ServerEvent::AccountCreated {} => "account_created",
            ServerEvent::Error { .. } => "error",
            ServerEvent::EmailNotification { .. } => "email_notification",
        }
    }
}

/// One entry of the directory's address list
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub user_email: String,
    pub public_key: String,
}
