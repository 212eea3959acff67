//! Grouping of transport messages into per-sender conversations.
//!
//! Everything here is a pure function of its input: projecting the same
//! messages twice yields the same conversations in the same order.

use std::cmp::Reverse;
use std::collections::BTreeMap;

use crate::cipher;
use crate::keys::PrivateKey;
use crate::message::{Conversation, DisplayMessage, TransportMessage};

const NO_SUBJECT: &str = "No Subject";

/// Group messages by their exact `From` header value.
///
/// Messages within a conversation are newest first; conversations are
/// ordered by most recent activity. Ties fall back to counterparty order,
/// and equal-date messages keep their input order. Messages without a
/// `From` header are skipped.
pub fn project(messages: &[TransportMessage]) -> Vec<Conversation> {
    let mut groups: BTreeMap<&str, Vec<TransportMessage>> = BTreeMap::new();
    for message in messages {
        match message.from() {
            Some(sender) => groups.entry(sender).or_default().push(message.clone()),
            None => tracing::debug!(id = %message.id, "skipping message without From header"),
        }
    }

    let mut conversations: Vec<Conversation> = groups
        .into_iter()
        .map(|(counterparty, mut messages)| {
            messages.sort_by_key(|m| Reverse(m.internal_date));
            let last_activity = messages.first().map(|m| m.internal_date).unwrap_or(0);
            Conversation {
                counterparty: counterparty.to_string(),
                messages,
                last_activity,
            }
        })
        .collect();

    // stable: equal activity keeps the BTreeMap's counterparty order
    conversations.sort_by_key(|c| Reverse(c.last_activity));
    conversations
}

/// Messages from `counterparty` only, newest first
pub fn select(messages: &[TransportMessage], counterparty: &str) -> Vec<TransportMessage> {
    let mut selected: Vec<TransportMessage> = messages
        .iter()
        .filter(|m| m.from() == Some(counterparty))
        .cloned()
        .collect();
    selected.sort_by_key(|m| Reverse(m.internal_date));
    selected
}

/// Prepare one message for display, decrypting the body when possible
pub fn display(message: &TransportMessage, private_key: Option<&PrivateKey>) -> DisplayMessage {
    let (content, decrypted) = match private_key.map(|key| cipher::decrypt(key, &message.body)) {
        Some(Ok(plaintext)) => (plaintext, true),
        Some(Err(e)) => {
            tracing::debug!(id = %message.id, "showing raw body: {}", e);
            (message.body.clone(), false)
        }
        None => (message.body.clone(), false),
    };

    DisplayMessage {
        id: message.id.clone(),
        sender: message.from().unwrap_or_default().to_string(),
        subject: message.subject().unwrap_or(NO_SUBJECT).to_string(),
        timestamp: message.internal_date,
        content,
        decrypted,
    }
}

/// Prepare every message of a conversation for display
pub fn render(conversation: &Conversation, private_key: Option<&PrivateKey>) -> Vec<DisplayMessage> {
    conversation
        .messages
        .iter()
        .map(|m| display(m, private_key))
        .collect()
}
