//! Per-message encryption to a recipient's public key.
//!
//! Envelope layout, before transport encoding:
//!
//! ```text
//! [ version: 1 byte ][ ephemeral_pubkey: 32 bytes ][ sealed payload ]
//! ```
//!
//! The sealed payload is the authenticated `pubky_common` secretbox output
//! under a key derived from an ephemeral Diffie-Hellman exchange. The whole
//! envelope is rendered with [`encode_for_transport`] so it can sit in an
//! email body untouched.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use pkarr::Keypair;
use pubky_common::crypto::{decrypt as open_sealed, encrypt as seal};

use crate::crypto::{derive_envelope_key, shared_secret};
use crate::error::{DecryptionError, EncryptionError};
use crate::keys::{PrivateKey, PublicKey, PUBLIC_KEY_SIZE};

pub const ENVELOPE_VERSION: u8 = 1;

/// Largest plaintext accepted by [`encrypt`], in bytes.
///
/// Bodies are expected to be short. Anything longer is refused rather than
/// truncated.
pub const MAX_PLAINTEXT_LEN: usize = 8 * 1024;

const HEADER_LEN: usize = 1 + PUBLIC_KEY_SIZE;

/// Encrypt `plaintext` so only the holder of `public_key`'s private half can read it
pub fn encrypt(public_key: &PublicKey, plaintext: &str) -> Result<String, EncryptionError> {
    if plaintext.len() > MAX_PLAINTEXT_LEN {
        return Err(EncryptionError::PlaintextTooLong {
            len: plaintext.len(),
            max: MAX_PLAINTEXT_LEN,
        });
    }

    let ephemeral = Keypair::random();
    let ephemeral_pubkey = *ephemeral.public_key().as_bytes();
    let shared = shared_secret(&ephemeral, public_key.as_bytes()).ok_or_else(|| {
        EncryptionError::InvalidPublicKey("key exchange with recipient failed".to_string())
    })?;
    let key = derive_envelope_key(&shared, &ephemeral_pubkey, public_key.as_bytes());

    let sealed = seal(plaintext.as_bytes(), &key);

    let mut envelope = Vec::with_capacity(HEADER_LEN + sealed.len());
    envelope.push(ENVELOPE_VERSION);
    envelope.extend_from_slice(&ephemeral_pubkey);
    envelope.extend_from_slice(&sealed);
    Ok(encode_for_transport(&envelope))
}

/// Parse a PEM public key and encrypt to it
pub fn encrypt_to_pem(public_key_pem: &str, plaintext: &str) -> Result<String, EncryptionError> {
    let public_key = PublicKey::from_pem(public_key_pem)
        .map_err(|e| EncryptionError::InvalidPublicKey(e.to_string()))?;
    encrypt(&public_key, plaintext)
}

/// Decrypt an envelope produced by [`encrypt`]
pub fn decrypt(private_key: &PrivateKey, ciphertext: &str) -> Result<String, DecryptionError> {
    let ciphertext = ciphertext.trim();
    if ciphertext.is_empty() {
        return Err(DecryptionError::Absent);
    }

    let envelope = decode_for_decrypt(ciphertext)?;
    if envelope.len() <= HEADER_LEN {
        return Err(DecryptionError::Malformed("envelope too short".to_string()));
    }
    if envelope[0] != ENVELOPE_VERSION {
        return Err(DecryptionError::Malformed(format!(
            "unknown envelope version {}",
            envelope[0]
        )));
    }

    let mut ephemeral_pubkey = [0u8; PUBLIC_KEY_SIZE];
    ephemeral_pubkey.copy_from_slice(&envelope[1..HEADER_LEN]);

    let keypair = private_key.keypair();
    let shared = shared_secret(&keypair, &ephemeral_pubkey)
        .ok_or_else(|| DecryptionError::Malformed("invalid ephemeral key".to_string()))?;
    let recipient_pubkey = keypair.public_key();
    let key = derive_envelope_key(&shared, &ephemeral_pubkey, recipient_pubkey.as_bytes());

    let plaintext = open_sealed(&envelope[HEADER_LEN..], &key).map_err(|_| DecryptionError::WrongKey)?;
    String::from_utf8(plaintext)
        .map_err(|_| DecryptionError::Malformed("plaintext is not UTF-8".to_string()))
}

fn decode_for_decrypt(ciphertext: &str) -> Result<Vec<u8>, DecryptionError> {
    decode_from_transport(ciphertext).map_err(|e| DecryptionError::Malformed(e.to_string()))
}

/// Text to show for a message body.
///
/// Returns the plaintext when the body decrypts under `private_key`, and the
/// body unchanged otherwise (no key stored, a message sent before the
/// recipient registered, or one from a sender outside the scheme).
pub fn decrypt_or_raw(private_key: Option<&PrivateKey>, body: &str) -> String {
    let Some(private_key) = private_key else {
        return body.to_string();
    };

    match decrypt(private_key, body) {
        Ok(plaintext) => plaintext,
        Err(e) => {
            tracing::debug!("showing raw body: {}", e);
            body.to_string()
        }
    }
}

/// Base64url encode without padding
pub fn encode_for_transport(bytes: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Inverse of [`encode_for_transport`]
pub fn decode_from_transport(encoded: &str) -> Result<Vec<u8>, base64::DecodeError> {
    URL_SAFE_NO_PAD.decode(encoded)
}
