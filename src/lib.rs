//! # EEMAILER
//!
//! End-to-end encrypted messaging carried over an ordinary email transport.
//!
//! ## Features
//!
//! - Local key pair generation and custody, with a one-time backup phrase
//! - Directory registration handshake over a persistent connection
//! - Per-message encryption to the recipient's registered public key
//! - Conversation grouping with graceful fallback for undecryptable bodies
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use eemailer::{Config, KeyBackup, KeyBackupPrompt, Messenger};
//!
//! struct PrintBackup;
//!
//! #[async_trait::async_trait]
//! impl KeyBackupPrompt for PrintBackup {
//!     async fn acknowledge(&self, backup: &KeyBackup) -> anyhow::Result<()> {
//!         println!("Save this phrase: {}", backup.phrase);
//!         Ok(())
//!     }
//! }
//!
//! # async fn example() -> anyhow::Result<()> {
//! let mut messenger = Messenger::from_config(Config::default(), Arc::new(PrintBackup))?;
//!
//! // Log in and register with the directory
//! messenger.login("oauth-access-token").await?;
//!
//! // Send an encrypted message
//! messenger.send("friend@example.com", "lunch", "Noon at the usual place?").await?;
//!
//! // Read conversations
//! for conversation in messenger.conversations() {
//!     for message in messenger.select(&conversation.counterparty) {
//!         println!("{}: {}", message.sender, message.content);
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod cipher;
mod client;
pub mod config;
mod crypto;
pub mod directory;
pub mod error;
pub mod identity;
pub mod keys;
pub mod mail;
pub mod message;
pub mod projector;
pub mod storage;
pub mod vault;

#[cfg(test)]
mod proptests;

pub use client::{Fetched, Messenger};
pub use config::Config;
pub use directory::{DirectoryClient, DirectoryNotice, KeyBackup, KeyBackupPrompt, RegistrationState};
pub use error::{
    DecryptionError, DirectoryError, EncryptionError, KeyGenerationError, TransportError,
    VaultError,
};
pub use identity::{Profile, Session};
pub use keys::{KeyPair, PrivateKey, PublicKey};
pub use message::{Conversation, DisplayMessage, Header, TransportMessage};
pub use vault::KeyVault;
