use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio::time::{timeout_at, Instant};

use super::addresses::{AddressBook, AddressSource};
use super::connection::{Connection, Connector};
use super::events::{ClientEvent, ServerEvent};
use crate::error::DirectoryError;
use crate::keys::{KeyPair, PublicKey};
use crate::storage::LocalStore;
use crate::vault::KeyVault;

const NOTICE_CAPACITY: usize = 64;

/// Registration progress for the current session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationState {
    Disconnected,
    Registering,
    Found,
    Provisioning,
    Ready,
}

/// What the directory told us, as seen by the caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectoryNotice {
    /// Registration completed; the session may send and receive
    Ready,
    /// New mail from `sender`; refetch. May repeat.
    Refetch { sender: String },
    /// The directory reported an error
    Rejected { reason: String },
    /// The directory holds a different public key for `email` than the one
    /// stored locally
    KeyMismatch { email: String },
}

/// Key material shown to the user once, when an account is provisioned
#[derive(Clone)]
pub struct KeyBackup {
    pub identity: String,
    pub private_key_pem: String,
    pub phrase: String,
}

impl std::fmt::Debug for KeyBackup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyBackup")
            .field("identity", &self.identity)
            .finish_non_exhaustive()
    }
}

/// Presents a freshly provisioned private key for manual backup.
///
/// `acknowledge` must not return until the user has confirmed the backup.
/// There is no recovery path for a lost key.
#[async_trait]
pub trait KeyBackupPrompt: Send + Sync {
    async fn acknowledge(&self, backup: &KeyBackup) -> anyhow::Result<()>;
}

/// Receives notices while the session is live. Closed by teardown.
#[derive(Debug)]
pub struct Subscription {
    rx: broadcast::Receiver<DirectoryNotice>,
}

impl Subscription {
    /// Next notice, `None` once the session is torn down
    pub async fn recv(&mut self) -> Option<DirectoryNotice> {
        loop {
            match self.rx.recv().await {
                Ok(notice) => return Some(notice),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!("subscription lagged, {} notices skipped", n);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// A notice if one is already queued
    pub fn try_recv(&mut self) -> Option<DirectoryNotice> {
        loop {
            match self.rx.try_recv() {
                Ok(notice) => return Some(notice),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }
}

/// Client side of the directory protocol for one session at a time
pub struct DirectoryClient {
    connector: Arc<dyn Connector>,
    addresses: Arc<dyn AddressSource>,
    store: Arc<dyn LocalStore>,
    prompt: Arc<dyn KeyBackupPrompt>,
    registration_timeout: Duration,

    connection: Option<Connection>,
    notices: Option<broadcast::Sender<DirectoryNotice>>,
    pending: VecDeque<DirectoryNotice>,
    state: RegistrationState,
    vault: Option<KeyVault>,
    address_book: AddressBook,
    mismatch_reported: bool,
}

impl DirectoryClient {
    pub fn new(
        connector: Arc<dyn Connector>,
        addresses: Arc<dyn AddressSource>,
        store: Arc<dyn LocalStore>,
        prompt: Arc<dyn KeyBackupPrompt>,
        registration_timeout: Duration,
    ) -> Self {
        Self {
            connector,
            addresses,
            store,
            prompt,
            registration_timeout,
            connection: None,
            notices: None,
            pending: VecDeque::new(),
            state: RegistrationState::Disconnected,
            vault: None,
            address_book: AddressBook::new(),
            mismatch_reported: false,
        }
    }

    pub fn state(&self) -> RegistrationState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    pub fn is_ready(&self) -> bool {
        self.state == RegistrationState::Ready
    }

    /// Identity of the current registration
    pub fn identity(&self) -> Option<&str> {
        self.vault.as_ref().map(|v| v.identity())
    }

    /// Vault bound to the current registration
    pub fn vault(&self) -> Option<&KeyVault> {
        self.vault.as_ref()
    }

    pub fn address_book(&self) -> &AddressBook {
        &self.address_book
    }

    pub fn address_book_mut(&mut self) -> &mut AddressBook {
        &mut self.address_book
    }

    /// Open the connection. A no-op when already connected.
    pub async fn connect(&mut self) -> Result<(), DirectoryError> {
        if self.connection.is_some() {
            return Ok(());
        }

        let connection = self.connector.connect().await?;
        let (tx, _) = broadcast::channel(NOTICE_CAPACITY);
        self.connection = Some(connection);
        self.notices = Some(tx);
        Ok(())
    }

    pub fn subscribe(&self) -> Result<Subscription, DirectoryError> {
        let tx = self.notices.as_ref().ok_or(DirectoryError::NotConnected)?;
        Ok(Subscription { rx: tx.subscribe() })
    }

    /// Number of subscriptions that can still receive notices
    pub fn live_subscriptions(&self) -> usize {
        self.notices.as_ref().map_or(0, |tx| tx.receiver_count())
    }

    /// Ask the directory whether `email` has an account
    pub fn register(&mut self, email: &str) -> Result<(), DirectoryError> {
        if let Some(current) = self.identity() {
            if current != email {
                return Err(DirectoryError::IdentityChanged {
                    current: current.to_string(),
                    requested: email.to_string(),
                });
            }
        }

        self.send(ClientEvent::Register {
            user_email: email.to_string(),
        })?;
        if self.vault.is_none() {
            self.vault = Some(KeyVault::new(self.store.clone(), email));
        }
        self.transition(RegistrationState::Registering);
        Ok(())
    }

    /// Tell the directory a message was sent, so it can notify `recipient`
    pub fn notify_sent(&self, recipient: &str, sender: &str) -> Result<(), DirectoryError> {
        self.send(ClientEvent::EmailSent {
            recipient: recipient.to_string(),
            sender: sender.to_string(),
        })
    }

    fn send(&self, event: ClientEvent) -> Result<(), DirectoryError> {
        let connection = self.connection.as_ref().ok_or(DirectoryError::NotConnected)?;
        connection.send(event)
    }

    fn transition(&mut self, next: RegistrationState) {
        if self.state != next {
            tracing::debug!("directory state {:?} -> {:?}", self.state, next);
            self.state = next;
        }
    }

    fn emit(&mut self, notice: DirectoryNotice) {
        if let Some(tx) = &self.notices {
            // no subscribers is fine
            let _ = tx.send(notice.clone());
        }
        self.pending.push_back(notice);
    }

    /// Apply one inbound event to the state machine
    pub async fn handle_event(&mut self, event: ServerEvent) -> Result<(), DirectoryError> {
        tracing::debug!("directory event {} in state {:?}", event.name(), self.state);
        match event {
            ServerEvent::AccountFound {} => {
                if self.state != RegistrationState::Registering {
                    tracing::warn!("ignoring account_found in state {:?}", self.state);
                    return Ok(());
                }
                self.transition(RegistrationState::Found);
                if let Some(vault) = &self.vault {
                    if vault.load_private_key()?.is_none() {
                        tracing::warn!(
                            identity = %vault.identity(),
                            "account exists but no private key is stored locally; restore it from backup"
                        );
                    }
                }
                self.check_own_key()?;
                self.transition(RegistrationState::Ready);
                self.emit(DirectoryNotice::Ready);
            }
            ServerEvent::AccountNotFound {} => {
                if self.state != RegistrationState::Registering {
                    tracing::warn!("ignoring account_not_found in state {:?}", self.state);
                    return Ok(());
                }
                self.transition(RegistrationState::Provisioning);
                if let Err(e) = self.provision().await {
                    tracing::error!("account provisioning failed: {}", e);
                    self.transition(RegistrationState::Disconnected);
                    return Err(e);
                }
            }
            ServerEvent::AccountCreated {} => {
                if self.state != RegistrationState::Provisioning {
                    tracing::warn!("ignoring account_created in state {:?}", self.state);
                    return Ok(());
                }
                tracing::info!(identity = ?self.identity(), "directory account created");
                self.transition(RegistrationState::Ready);
                self.emit(DirectoryNotice::Ready);
            }
            ServerEvent::Error { reason } => {
                tracing::warn!("directory error in state {:?}: {}", self.state, reason);
                self.emit(DirectoryNotice::Rejected { reason });
            }
            ServerEvent::EmailNotification { sender } => {
                tracing::info!("new mail from {}", sender);
                self.emit(DirectoryNotice::Refetch { sender });
            }
        }
        Ok(())
    }

    /// Make sure a key pair exists, have the user back it up, then register
    /// the public half.
    async fn provision(&mut self) -> Result<(), DirectoryError> {
        let vault = self.vault.clone().ok_or(DirectoryError::NotConnected)?;

        // an existing key is re-registered, never silently replaced
        let pair = match vault.load_key_pair()? {
            Some(pair) => {
                tracing::info!(identity = %vault.identity(), "re-registering stored key");
                pair
            }
            None => {
                let pair = vault.generate_key_pair()?;
                vault.persist_private_key(&pair.private_key)?;
                pair
            }
        };

        let backup = backup_for(vault.identity(), &pair)?;
        self.prompt
            .acknowledge(&backup)
            .await
            .map_err(|e| DirectoryError::BackupNotAcknowledged(e.to_string()))?;

        self.send(ClientEvent::CreateAccount {
            user_email: vault.identity().to_string(),
            public_key: pair.public_key.to_pem(),
        })?;
        tracing::info!(identity = %vault.identity(), "requested account creation");
        Ok(())
    }

    /// Compare the directory's key for our identity with the stored one
    fn check_own_key(&mut self) -> Result<(), DirectoryError> {
        let Some(vault) = &self.vault else {
            return Ok(());
        };
        let Some(registered) = self.address_book.lookup(vault.identity()) else {
            return Ok(());
        };
        let Some(local) = vault.load_key_pair()? else {
            return Ok(());
        };

        if PublicKey::from_pem(registered).ok() != Some(local.public_key) {
            if self.mismatch_reported {
                return Ok(());
            }
            let email = vault.identity().to_string();
            tracing::warn!(
                identity = %email,
                "directory key differs from the stored key; leaving both untouched"
            );
            self.mismatch_reported = true;
            self.emit(DirectoryNotice::KeyMismatch { email });
        }
        Ok(())
    }

    /// Next inbound event. A closed connection drops the state to `Disconnected`.
    async fn recv_event(&mut self) -> Result<ServerEvent, DirectoryError> {
        let connection = self.connection.as_mut().ok_or(DirectoryError::NotConnected)?;
        match connection.recv().await {
            Some(event) => Ok(event),
            None => {
                tracing::warn!("directory connection closed");
                self.connection = None;
                self.transition(RegistrationState::Disconnected);
                Err(DirectoryError::Closed)
            }
        }
    }

    /// Wait for the next notice, processing inbound events as they arrive
    pub async fn next_notice(&mut self) -> Result<DirectoryNotice, DirectoryError> {
        loop {
            if let Some(notice) = self.pending.pop_front() {
                return Ok(notice);
            }
            let event = self.recv_event().await?;
            self.handle_event(event).await?;
        }
    }

    /// Drive the handshake until `Ready`.
    ///
    /// The registration timeout bounds the waits for the directory's replies,
    /// not the backup prompt: the window restarts once provisioning has sent
    /// `create_account`. An `error` event before `Ready` ends the wait with
    /// [`DirectoryError::Rejected`]. Other notices seen meanwhile stay queued
    /// for [`Self::next_notice`].
    pub async fn await_ready(&mut self) -> Result<(), DirectoryError> {
        if self.is_ready() {
            return Ok(());
        }

        let mut deferred = Vec::new();
        let result = self.drive_handshake(&mut deferred).await;
        for notice in deferred.into_iter().rev() {
            self.pending.push_front(notice);
        }
        result
    }

    async fn drive_handshake(
        &mut self,
        deferred: &mut Vec<DirectoryNotice>,
    ) -> Result<(), DirectoryError> {
        let limit = self.registration_timeout;
        let mut deadline = Instant::now() + limit;
        let mut provisioned = false;

        loop {
            while let Some(notice) = self.pending.pop_front() {
                match notice {
                    DirectoryNotice::Ready => return Ok(()),
                    DirectoryNotice::Rejected { reason } => {
                        tracing::error!("registration rejected: {}", reason);
                        self.transition(RegistrationState::Disconnected);
                        return Err(DirectoryError::Rejected(reason));
                    }
                    other => deferred.push(other),
                }
            }

            let event = match timeout_at(deadline, self.recv_event()).await {
                Ok(event) => event?,
                Err(_) => {
                    tracing::error!(
                        "registration timed out after {:?} in state {:?}",
                        limit,
                        self.state
                    );
                    self.transition(RegistrationState::Disconnected);
                    return Err(DirectoryError::RegistrationTimeout(limit.as_secs()));
                }
            };

            // provisioning waits on the user, outside the window
            self.handle_event(event).await?;
            if self.state == RegistrationState::Provisioning && !provisioned {
                provisioned = true;
                deadline = Instant::now() + limit;
            }
        }
    }

    /// Re-read the directory's address list
    pub async fn refresh_addresses(&mut self) -> Result<usize, DirectoryError> {
        let epoch = self.address_book.epoch();
        let entries = self.addresses.fetch_addresses().await?;
        if self.address_book.apply(epoch, entries) {
            tracing::debug!("address book refreshed, {} entries", self.address_book.len());
            if self.is_ready() {
                self.check_own_key()?;
            }
        }
        Ok(self.address_book.len())
    }

    /// Public key registered for `email`, from the cached address list
    pub fn lookup_public_key(&self, email: &str) -> Option<PublicKey> {
        self.address_book.lookup_key(email)
    }

    /// Close the connection and drop every session-scoped piece of state.
    /// Safe to call repeatedly.
    pub fn teardown(&mut self) {
        if self.connection.is_none() && self.notices.is_none() && self.vault.is_none() {
            return;
        }

        self.connection = None;
        self.notices = None;
        self.pending.clear();
        self.vault = None;
        self.mismatch_reported = false;
        self.address_book.invalidate();
        self.transition(RegistrationState::Disconnected);
        tracing::info!("directory session torn down");
    }
}

fn backup_for(identity: &str, pair: &KeyPair) -> Result<KeyBackup, DirectoryError> {
    let phrase = pair
        .private_key
        .to_backup_phrase()
        .map_err(|e| DirectoryError::BackupNotAcknowledged(e.to_string()))?;
    Ok(KeyBackup {
        identity: identity.to_string(),
        private_key_pem: pair.private_key.to_pem(),
        phrase,
    })
}
