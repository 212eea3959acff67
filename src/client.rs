use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use futures::future::join_all;
use uuid::Uuid;

use crate::cipher;
use crate::config::Config;
use crate::directory::{
    AddressSource, Connector, DirectoryClient, DirectoryNotice, HttpAddressSource,
    KeyBackupPrompt, TcpConnector,
};
use crate::identity::{GoogleIdentity, IdentityProvider, Session};
use crate::keys::{KeyPair, PrivateKey};
use crate::mail::{compose_raw, marker_query, GmailTransport, MailTransport};
use crate::message::{Conversation, DisplayMessage, TransportMessage};
use crate::projector;
use crate::storage::{FileStore, LocalStore};
use crate::vault::KeyVault;

const SESSION_SLOT: &str = "session";

/// Messages fetched for one session, tagged so stale results can be dropped
#[derive(Debug, Clone)]
pub struct Fetched {
    session_id: Uuid,
    ticket: u64,
    pub messages: Vec<TransportMessage>,
}

/// Main client: one authenticated session at a time
pub struct Messenger {
    config: Config,
    store: Arc<dyn LocalStore>,
    directory: DirectoryClient,
    mail: Arc<dyn MailTransport>,
    identity: Arc<dyn IdentityProvider>,

    session: Option<Session>,
    messages: Vec<TransportMessage>,
    conversations: Vec<Conversation>,
    next_ticket: AtomicU64,
    applied_ticket: u64,
}

impl Messenger {
    pub fn new(
        config: Config,
        store: Arc<dyn LocalStore>,
        connector: Arc<dyn Connector>,
        addresses: Arc<dyn AddressSource>,
        mail: Arc<dyn MailTransport>,
        identity: Arc<dyn IdentityProvider>,
        prompt: Arc<dyn KeyBackupPrompt>,
    ) -> Self {
        let directory = DirectoryClient::new(
            connector,
            addresses,
            store.clone(),
            prompt,
            config.registration_timeout(),
        );

        Self {
            config,
            store,
            directory,
            mail,
            identity,
            session: None,
            messages: Vec::new(),
            conversations: Vec::new(),
            next_ticket: AtomicU64::new(1),
            applied_ticket: 0,
        }
    }

    /// Wire up the production collaborators described by `config`
    pub fn from_config(config: Config, prompt: Arc<dyn KeyBackupPrompt>) -> Result<Self> {
        let http = config
            .http_client()
            .map_err(|e| anyhow!("Failed to create HTTP client: {}", e))?;

        let store = Arc::new(FileStore::new(config.storage_dir.clone()));
        let connector = Arc::new(TcpConnector::new(config.directory_addr.clone()));
        let addresses = Arc::new(HttpAddressSource::new(
            http.clone(),
            config.directory_url.clone(),
        ));
        let mail = Arc::new(GmailTransport::new(http.clone(), config.mail_api_url.clone()));
        let identity = Arc::new(GoogleIdentity::new(http, config.userinfo_url.clone()));

        Ok(Self::new(
            config, store, connector, addresses, mail, identity, prompt,
        ))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn directory(&self) -> &DirectoryClient {
        &self.directory
    }

    /// Log in with an access token and register with the directory.
    ///
    /// A registration failure is returned but leaves the session logged in;
    /// call [`Self::retry_registration`] to try again.
    pub async fn login(&mut self, access_token: &str) -> Result<&Session> {
        let profile = self.identity.fetch_profile(access_token).await?;

        if let Some(current) = &self.session {
            if current.email() != profile.email {
                tracing::info!("identity changed from {} to {}", current.email(), profile.email);
                self.logout()?;
            } else {
                self.directory.teardown();
            }
        }

        let session = Session::new(access_token, profile);
        self.store
            .put(SESSION_SLOT, &serde_json::to_string(&session)?)?;
        tracing::info!(session = %session.id, "logged in as {}", session.email());
        self.session = Some(session);

        self.start_session().await?;
        self.current_session()
    }

    /// Pick up a session cached by a previous run. Returns false if there is none.
    pub async fn resume(&mut self) -> Result<bool> {
        let Some(json) = self.store.get(SESSION_SLOT)? else {
            return Ok(false);
        };
        let session: Session = match serde_json::from_str(&json) {
            Ok(session) => session,
            Err(e) => {
                tracing::warn!("discarding unreadable cached session: {}", e);
                self.store.remove(SESSION_SLOT)?;
                return Ok(false);
            }
        };

        tracing::info!(session = %session.id, "resuming session for {}", session.email());
        self.session = Some(session);
        self.start_session().await?;
        Ok(true)
    }

    async fn start_session(&mut self) -> Result<()> {
        let email = self.current_session()?.email().to_string();

        self.directory.connect().await?;
        self.directory.register(&email)?;
        self.directory.await_ready().await?;

        if let Err(e) = self.directory.refresh_addresses().await {
            tracing::warn!("could not load address list: {}", e);
        }
        self.refresh().await;
        Ok(())
    }

    /// Register again after a failed or timed-out handshake
    pub async fn retry_registration(&mut self) -> Result<()> {
        self.start_session().await
    }

    fn current_session(&self) -> Result<&Session> {
        self.session.as_ref().ok_or_else(|| anyhow!("Not logged in"))
    }

    /// Encrypt `body` to `recipient` and send it through the mail transport
    pub async fn send(&mut self, recipient: &str, subject: &str, body: &str) -> Result<String> {
        let session = self.current_session()?.clone();
        if !self.directory.is_ready() {
            tracing::warn!("sending before directory registration completed");
        }

        let public_key = match self.directory.lookup_public_key(recipient) {
            Some(key) => key,
            None => {
                self.directory.refresh_addresses().await?;
                self.directory
                    .lookup_public_key(recipient)
                    .ok_or_else(|| anyhow!("Recipient {} has no registered public key", recipient))?
            }
        };

        let ciphertext = cipher::encrypt(&public_key, body)?;
        let raw = compose_raw(
            session.email(),
            recipient,
            subject,
            &ciphertext,
            &self.config.subject_marker,
        )?;
        let id = self.mail.send_message(&session.access_token, &raw).await?;

        if let Err(e) = self.directory.notify_sent(recipient, session.email()) {
            tracing::warn!("could not notify directory of sent message: {}", e);
        }
        Ok(id)
    }

    /// Fetch application mail for the current session.
    ///
    /// Failures degrade to fewer (or no) messages rather than an error.
    pub async fn fetch(&self) -> Option<Fetched> {
        let session = self.session.as_ref()?;
        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        let token = session.access_token.as_str();

        let query = marker_query(&self.config.subject_marker);
        let ids = match self.mail.list_messages(token, &query).await {
            Ok(ids) => ids,
            Err(e) => {
                tracing::warn!("listing messages failed: {}", e);
                Vec::new()
            }
        };

        let results = join_all(ids.iter().map(|id| self.mail.get_message(token, id))).await;
        let mut messages = Vec::with_capacity(results.len());
        for (id, result) in ids.iter().zip(results) {
            match result {
                Ok(message) => messages.push(message),
                Err(e) => tracing::warn!("fetching message {} failed: {}", id, e),
            }
        }

        Some(Fetched {
            session_id: session.id,
            ticket,
            messages,
        })
    }

    /// Install a fetch result unless a newer one was applied or the session
    /// it belongs to has ended.
    pub fn apply(&mut self, fetched: Fetched) -> bool {
        if self.session.as_ref().map(|s| s.id) != Some(fetched.session_id) {
            tracing::debug!("dropping fetch for ended session {}", fetched.session_id);
            return false;
        }
        if fetched.ticket <= self.applied_ticket {
            tracing::debug!("dropping stale fetch {}", fetched.ticket);
            return false;
        }

        self.applied_ticket = fetched.ticket;
        self.conversations = projector::project(&fetched.messages);
        self.messages = fetched.messages;
        true
    }

    /// Fetch and apply. Returns the number of messages now in view.
    pub async fn refresh(&mut self) -> usize {
        if let Some(fetched) = self.fetch().await {
            self.apply(fetched);
        }
        self.messages.len()
    }

    /// Process the next directory notice, refetching on new mail
    pub async fn poll(&mut self) -> Result<DirectoryNotice> {
        let notice = self.directory.next_notice().await?;
        if let DirectoryNotice::Refetch { .. } = &notice {
            self.refresh().await;
        }
        Ok(notice)
    }

    /// Conversations, most recently active first
    pub fn conversations(&self) -> &[Conversation] {
        &self.conversations
    }

    /// Messages from `counterparty`, newest first, decrypted where possible
    pub fn select(&self, counterparty: &str) -> Vec<DisplayMessage> {
        let key = self.private_key();
        projector::select(&self.messages, counterparty)
            .iter()
            .map(|m| projector::display(m, key.as_ref()))
            .collect()
    }

    fn vault(&self) -> Option<KeyVault> {
        if let Some(vault) = self.directory.vault() {
            return Some(vault.clone());
        }
        self.session
            .as_ref()
            .map(|s| KeyVault::new(self.store.clone(), s.email()))
    }

    /// The stored private key for the current session, if any
    pub fn private_key(&self) -> Option<PrivateKey> {
        match self.vault()?.load_private_key() {
            Ok(key) => key,
            Err(e) => {
                tracing::warn!("private key unavailable: {}", e);
                None
            }
        }
    }

    /// Restore the private key from its backup phrase
    pub fn restore_key(&self, phrase: &str) -> Result<KeyPair> {
        let vault = self.vault().ok_or_else(|| anyhow!("Not logged in"))?;
        vault.restore_from_phrase(phrase)
    }

    /// End the session: close the directory connection and erase local key
    /// material, the cached session and every derived view.
    pub fn logout(&mut self) -> Result<()> {
        let vault = self.vault();
        self.directory.teardown();

        let cleared_key = vault.map(|v| v.clear()).transpose();
        let cleared_session = self.store.remove(SESSION_SLOT);

        if let Some(session) = self.session.take() {
            tracing::info!(session = %session.id, "logged out {}", session.email());
        }
        self.messages.clear();
        self.conversations.clear();

        cleared_key?;
        cleared_session?;
        Ok(())
    }
}
