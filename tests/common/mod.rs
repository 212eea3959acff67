//! In-process stand-ins for the directory service, the mail transport and
//! the identity provider.
#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use eemailer::cipher::decode_from_transport;
use eemailer::directory::{
    memory_pair, AddressSource, ClientEvent, Connection, Connector, DirectoryEntry, ServerEnd,
    ServerEvent,
};
use eemailer::identity::IdentityProvider;
use eemailer::mail::MailTransport;
use eemailer::storage::MemoryStore;
use eemailer::{
    Config, DirectoryError, Header, KeyBackup, KeyBackupPrompt, Messenger, Profile,
    TransportError, TransportMessage,
};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Access token the fakes accept for `email`
pub fn token_for(email: &str) -> String {
    format!("token:{}", email)
}

fn email_of(token: &str) -> Option<&str> {
    token.strip_prefix("token:")
}

// ==================== Directory ====================

#[derive(Default)]
struct DirectoryState {
    accounts: BTreeMap<String, String>,
    online: HashMap<String, mpsc::UnboundedSender<ServerEvent>>,
    received: Vec<ClientEvent>,
    connections: usize,
    silent: bool,
    register_error: Option<String>,
}

/// A directory server: accounts, registration replies and notification relay
#[derive(Clone, Default)]
pub struct FakeDirectory {
    state: Arc<Mutex<DirectoryState>>,
}

impl FakeDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stop answering `register`
    pub fn set_silent(&self, silent: bool) {
        self.state.lock().silent = silent;
    }

    /// Answer every `register` with an `error` event
    pub fn fail_register(&self, reason: &str) {
        self.state.lock().register_error = Some(reason.to_string());
    }

    pub fn add_account(&self, email: &str, public_key_pem: &str) {
        self.state
            .lock()
            .accounts
            .insert(email.to_string(), public_key_pem.to_string());
    }

    pub fn account(&self, email: &str) -> Option<String> {
        self.state.lock().accounts.get(email).cloned()
    }

    pub fn connections(&self) -> usize {
        self.state.lock().connections
    }

    /// `create_account` requests received for `email`
    pub fn create_requests(&self, email: &str) -> Vec<String> {
        self.state
            .lock()
            .received
            .iter()
            .filter_map(|event| match event {
                ClientEvent::CreateAccount {
                    user_email,
                    public_key,
                } if user_email == email => Some(public_key.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn received(&self) -> Vec<ClientEvent> {
        self.state.lock().received.clone()
    }

    fn handle(
        &self,
        event: ClientEvent,
        relay: &mpsc::UnboundedSender<ServerEvent>,
    ) -> Option<ServerEvent> {
        let mut state = self.state.lock();
        state.received.push(event.clone());

        match event {
            ClientEvent::Register { user_email } => {
                state.online.insert(user_email.clone(), relay.clone());
                if state.silent {
                    None
                } else if let Some(reason) = state.register_error.clone() {
                    Some(ServerEvent::Error { reason })
                } else if state.accounts.contains_key(&user_email) {
                    Some(ServerEvent::AccountFound {})
                } else {
                    Some(ServerEvent::AccountNotFound {})
                }
            }
            ClientEvent::CreateAccount {
                user_email,
                public_key,
            } => {
                if state.accounts.contains_key(&user_email) {
                    Some(ServerEvent::Error {
                        reason: "account already exists".to_string(),
                    })
                } else {
                    state.accounts.insert(user_email, public_key);
                    Some(ServerEvent::AccountCreated {})
                }
            }
            ClientEvent::EmailSent { recipient, sender } => {
                if let Some(tx) = state.online.get(&recipient) {
                    let _ = tx.send(ServerEvent::EmailNotification { sender });
                }
                None
            }
        }
    }

    async fn serve(self, mut server: ServerEnd) {
        let (relay_tx, mut relay_rx) = mpsc::unbounded_channel();
        loop {
            tokio::select! {
                event = server.recv() => {
                    let Some(event) = event else { break };
                    if let Some(reply) = self.handle(event, &relay_tx) {
                        if !server.send(reply) {
                            break;
                        }
                    }
                }
                Some(notification) = relay_rx.recv() => {
                    if !server.send(notification) {
                        break;
                    }
                }
            }
        }
    }
}

#[async_trait]
impl Connector for FakeDirectory {
    async fn connect(&self) -> Result<Connection, DirectoryError> {
        let (connection, server) = memory_pair();
        self.state.lock().connections += 1;
        tokio::spawn(self.clone().serve(server));
        Ok(connection)
    }
}

#[async_trait]
impl AddressSource for FakeDirectory {
    async fn fetch_addresses(&self) -> Result<Vec<DirectoryEntry>, DirectoryError> {
        Ok(self
            .state
            .lock()
            .accounts
            .iter()
            .map(|(email, key)| DirectoryEntry {
                user_email: email.clone(),
                public_key: key.clone(),
            })
            .collect())
    }
}

// ==================== Mail ====================

#[derive(Default)]
struct MailState {
    mailboxes: Vec<(String, TransportMessage)>,
    clock: u64,
    fail_list: bool,
}

/// A mail provider holding every mailbox in memory
#[derive(Clone, Default)]
pub struct FakeMail {
    state: Arc<Mutex<MailState>>,
}

impl FakeMail {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_list(&self, fail: bool) {
        self.state.lock().fail_list = fail;
    }

    /// Put a message straight into `to`'s mailbox
    pub fn deliver(&self, from: &str, to: &str, subject: &str, body: &str) -> String {
        let mut state = self.state.lock();
        state.clock += 1;
        let id = format!("msg-{}", state.mailboxes.len() + 1);
        let message = TransportMessage {
            id: id.clone(),
            internal_date: state.clock,
            headers: vec![
                Header::new("From", from),
                Header::new("To", to),
                Header::new("Subject", subject),
            ],
            body: body.to_string(),
        };
        state.mailboxes.push((to.to_string(), message));
        id
    }

    /// Bodies of every message delivered to `to`, oldest first
    pub fn bodies_for(&self, to: &str) -> Vec<String> {
        self.state
            .lock()
            .mailboxes
            .iter()
            .filter(|(owner, _)| owner == to)
            .map(|(_, m)| m.body.clone())
            .collect()
    }
}

fn unauthorized() -> TransportError {
    TransportError::Status {
        endpoint: "fake".to_string(),
        status: 401,
    }
}

#[async_trait]
impl MailTransport for FakeMail {
    async fn list_messages(
        &self,
        access_token: &str,
        query: &str,
    ) -> Result<Vec<String>, TransportError> {
        let owner = email_of(access_token).ok_or_else(unauthorized)?;
        let state = self.state.lock();
        if state.fail_list {
            return Err(TransportError::Status {
                endpoint: "fake/messages".to_string(),
                status: 503,
            });
        }

        let marker = query.strip_prefix("subject:").unwrap_or(query);
        Ok(state
            .mailboxes
            .iter()
            .filter(|(to, m)| to == owner && m.subject().is_some_and(|s| s.contains(marker)))
            .map(|(_, m)| m.id.clone())
            .collect())
    }

    async fn get_message(
        &self,
        access_token: &str,
        id: &str,
    ) -> Result<TransportMessage, TransportError> {
        let owner = email_of(access_token).ok_or_else(unauthorized)?;
        self.state
            .lock()
            .mailboxes
            .iter()
            .find(|(to, m)| to == owner && m.id == id)
            .map(|(_, m)| m.clone())
            .ok_or_else(|| TransportError::InvalidResponse(format!("no message {}", id)))
    }

    async fn send_message(&self, access_token: &str, raw: &str) -> Result<String, TransportError> {
        let owner = email_of(access_token).ok_or_else(unauthorized)?;
        let bytes =
            decode_from_transport(raw).map_err(|e| TransportError::InvalidResponse(e.to_string()))?;
        let text =
            String::from_utf8(bytes).map_err(|e| TransportError::InvalidResponse(e.to_string()))?;

        let (head, body) = text
            .split_once("\r\n\r\n")
            .ok_or_else(|| TransportError::InvalidResponse("no header block".to_string()))?;
        let headers: HashMap<&str, &str> = head
            .split("\r\n")
            .filter_map(|line| line.split_once(": "))
            .collect();

        if headers.get("From") != Some(&owner) {
            return Err(TransportError::InvalidResponse("From does not match sender".to_string()));
        }
        let to = headers
            .get("To")
            .ok_or_else(|| TransportError::InvalidResponse("missing To".to_string()))?;
        let subject = headers.get("Subject").copied().unwrap_or_default();

        Ok(self.deliver(owner, to, subject, body))
    }
}

// ==================== Identity ====================

pub struct FakeIdentity;

#[async_trait]
impl IdentityProvider for FakeIdentity {
    async fn fetch_profile(&self, access_token: &str) -> Result<Profile, TransportError> {
        let email = email_of(access_token).ok_or_else(unauthorized)?;
        Ok(Profile {
            email: email.to_string(),
            name: None,
            picture: None,
        })
    }
}

// ==================== Backup prompt ====================

#[derive(Default)]
pub struct RecordingPrompt {
    seen: Mutex<Vec<KeyBackup>>,
    delay: Duration,
}

impl RecordingPrompt {
    /// A user who takes `delay` to confirm the backup
    pub fn slow(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn backups(&self) -> Vec<KeyBackup> {
        self.seen.lock().clone()
    }
}

#[async_trait]
impl KeyBackupPrompt for RecordingPrompt {
    async fn acknowledge(&self, backup: &KeyBackup) -> anyhow::Result<()> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.seen.lock().push(backup.clone());
        Ok(())
    }
}

// ==================== Wiring ====================

#[derive(Clone, Default)]
pub struct World {
    pub directory: FakeDirectory,
    pub mail: FakeMail,
}

impl World {
    pub fn new() -> Self {
        init_tracing();
        Self::default()
    }

    pub fn messenger(&self, store: &MemoryStore, prompt: Arc<RecordingPrompt>) -> Messenger {
        let config = Config {
            registration_timeout_secs: 5,
            ..Config::default()
        };
        Messenger::new(
            config,
            Arc::new(store.clone()),
            Arc::new(self.directory.clone()),
            Arc::new(self.directory.clone()),
            Arc::new(self.mail.clone()),
            Arc::new(FakeIdentity),
            prompt,
        )
    }
}
