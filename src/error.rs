//! Error types for the messaging core.
//!
//! Each component reports its own error type. Only encryption failures at send
//! time and registration failures are meant to reach the user; decryption
//! failures are consumed by the display path and never propagated.

use thiserror::Error;

/// Key pair generation failed. Fatal to registration, retryable.
#[derive(Error, Debug)]
#[error("Key generation failed: {0}")]
pub struct KeyGenerationError(pub String);

/// Errors that block sending a message.
#[derive(Error, Debug)]
pub enum EncryptionError {
    /// The recipient public key could not be parsed or used.
    #[error("Invalid recipient public key: {0}")]
    InvalidPublicKey(String),

    /// The plaintext is larger than a single envelope may carry.
    #[error("Plaintext too long: {len} bytes exceeds the {max} byte limit")]
    PlaintextTooLong {
        /// Length of the rejected plaintext.
        len: usize,
        /// Maximum accepted length.
        max: usize,
    },
}

/// Errors returned by `cipher::decrypt`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecryptionError {
    /// There was nothing to decrypt.
    #[error("Decryption failed: no ciphertext")]
    Absent,

    /// The input is not an envelope produced by this codec.
    #[error("Decryption failed: malformed ciphertext ({0})")]
    Malformed(String),

    /// The envelope was sealed for a different key pair.
    #[error("Decryption failed: ciphertext was not produced for this key")]
    WrongKey,
}

/// Failures on the local key store.
#[derive(Error, Debug)]
pub enum VaultError {
    /// Reading or writing the backing store failed.
    #[error("Storage error: {0}")]
    Storage(#[from] std::io::Error),

    /// The stored record could not be decoded.
    #[error("Corrupt key record: {0}")]
    Corrupt(String),

    /// The slot holds key material for another identity.
    #[error("Stored key belongs to {found}, not {expected}")]
    IdentityMismatch {
        /// Identity the vault is bound to.
        expected: String,
        /// Identity found in the stored record.
        found: String,
    },
}

/// Directory service failures. Logged and non-fatal; retry is up to the caller.
#[derive(Error, Debug)]
pub enum DirectoryError {
    #[error("Failed to connect to directory: {0}")]
    Connect(String),

    #[error("Directory connection closed")]
    Closed,

    #[error("Not connected to directory")]
    NotConnected,

    #[error("Registration timed out after {0} seconds")]
    RegistrationTimeout(u64),

    /// An `error` event arrived before registration completed.
    #[error("Directory rejected registration: {0}")]
    Rejected(String),

    #[error("Session is registered as {current}; tear down before registering {requested}")]
    IdentityChanged {
        /// Identity of the live registration.
        current: String,
        /// Identity that was requested.
        requested: String,
    },

    #[error("Key backup was not acknowledged: {0}")]
    BackupNotAcknowledged(String),

    #[error("Failed to fetch address list: {0}")]
    Addresses(String),

    #[error(transparent)]
    KeyGeneration(#[from] KeyGenerationError),

    #[error(transparent)]
    Vault(#[from] VaultError),
}

/// Email transport and identity provider failures.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unexpected status {status} from {endpoint}")]
    Status {
        /// Endpoint that was called.
        endpoint: String,
        /// HTTP status code returned.
        status: u16,
    },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// A header value would break out of its header line.
    #[error("{name} header contains a line break")]
    InvalidHeader {
        /// Name of the offending header.
        name: &'static str,
    },
}

/// Configuration loading failures.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}
