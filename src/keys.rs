//! Key pair value types.
//!
//! Keys are Ed25519 and are converted to X25519 for encryption. Both halves
//! have a PEM string form, which is what the directory stores and what the
//! user is asked to back up.

use std::fmt;

use anyhow::anyhow;
use bip39::{Language, Mnemonic};
use pkarr::Keypair;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::crypto::ed25519_public_to_x25519;
use crate::error::KeyGenerationError;

pub const PUBLIC_KEY_SIZE: usize = 32;
pub const PRIVATE_KEY_SIZE: usize = 32;

// Raw 32-byte keys, not SPKI/PKCS#8, so the generic labels are not used.
pub const PUBLIC_PEM_TAG: &str = "EEMAILER PUBLIC KEY";
pub const PRIVATE_PEM_TAG: &str = "EEMAILER PRIVATE KEY";

/// A user's public key, as registered in the directory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublicKey([u8; PUBLIC_KEY_SIZE]);

impl From<[u8; PUBLIC_KEY_SIZE]> for PublicKey {
    fn from(bytes: [u8; PUBLIC_KEY_SIZE]) -> Self {
        PublicKey(bytes)
    }
}

impl PublicKey {
    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_SIZE] {
        &self.0
    }

    /// Encode in PEM format with tag [`PUBLIC_PEM_TAG`]
    pub fn to_pem(&self) -> String {
        pem::encode(&pem::Pem::new(PUBLIC_PEM_TAG, self.0.to_vec()))
    }

    /// Parse a PEM-encoded public key.
    ///
    /// Rejects keys that are not valid curve points, so a key accepted here
    /// can always be encrypted to.
    pub fn from_pem(pem_str: &str) -> anyhow::Result<Self> {
        let bytes = parse_pem(pem_str, PUBLIC_PEM_TAG)?;
        if ed25519_public_to_x25519(&bytes).is_none() {
            return Err(anyhow!("public key is not a valid curve point"));
        }
        Ok(PublicKey(bytes))
    }
}

/// A user's private key. Never leaves the local client except as a
/// user-initiated backup.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct PrivateKey {
    secret: [u8; PRIVATE_KEY_SIZE],
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PrivateKey([REDACTED])")
    }
}

impl PartialEq for PrivateKey {
    fn eq(&self, other: &Self) -> bool {
        self.secret == other.secret
    }
}

impl Eq for PrivateKey {}

impl PrivateKey {
    pub fn from_bytes(secret: [u8; PRIVATE_KEY_SIZE]) -> Self {
        Self { secret }
    }

    pub(crate) fn keypair(&self) -> Keypair {
        Keypair::from_secret_key(&self.secret)
    }

    /// Derive the matching public key
    pub fn public_key(&self) -> PublicKey {
        PublicKey(*self.keypair().public_key().as_bytes())
    }

    /// Encode in PEM format with tag [`PRIVATE_PEM_TAG`]
    pub fn to_pem(&self) -> String {
        pem::encode(&pem::Pem::new(PRIVATE_PEM_TAG, self.secret.to_vec()))
    }

    pub fn from_pem(pem_str: &str) -> anyhow::Result<Self> {
        Ok(Self::from_bytes(parse_pem(pem_str, PRIVATE_PEM_TAG)?))
    }

    /// Render the key as a 24-word BIP39 phrase for manual backup
    pub fn to_backup_phrase(&self) -> anyhow::Result<String> {
        let mnemonic = Mnemonic::from_entropy_in(Language::English, &self.secret)
            .map_err(|e| anyhow!("Failed to build backup phrase: {}", e))?;
        Ok(mnemonic.to_string())
    }

    /// Recover a key from its backup phrase
    pub fn from_backup_phrase(phrase: &str) -> anyhow::Result<Self> {
        let mnemonic = Mnemonic::parse_in(Language::English, phrase)
            .map_err(|e| anyhow!("Invalid backup phrase: {}", e))?;
        let entropy = mnemonic.to_entropy();
        let secret: [u8; PRIVATE_KEY_SIZE] = entropy
            .as_slice()
            .try_into()
            .map_err(|_| anyhow!("Backup phrase must encode {} bytes", PRIVATE_KEY_SIZE))?;
        Ok(Self::from_bytes(secret))
    }
}

/// A freshly generated or restored key pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPair {
    pub public_key: PublicKey,
    pub private_key: PrivateKey,
}

impl KeyPair {
    /// Generate a new random key pair
    pub fn generate() -> Result<Self, KeyGenerationError> {
        let keypair = Keypair::random();
        let public_key = PublicKey(*keypair.public_key().as_bytes());
        if ed25519_public_to_x25519(public_key.as_bytes()).is_none() {
            return Err(KeyGenerationError(
                "generated public key has no X25519 form".to_string(),
            ));
        }

        Ok(Self {
            public_key,
            private_key: PrivateKey::from_bytes(keypair.secret_key()),
        })
    }

    pub fn from_private_key(private_key: PrivateKey) -> Self {
        Self {
            public_key: private_key.public_key(),
            private_key,
        }
    }
}

fn parse_pem<const N: usize>(pem_str: &str, tag: &str) -> anyhow::Result<[u8; N]> {
    let pem = pem::parse(pem_str).map_err(|e| anyhow!("failed to parse PEM: {}", e))?;
    if pem.tag() != tag {
        return Err(anyhow!("invalid PEM tag, expected {}", tag));
    }

    pem.contents().try_into().map_err(|_| {
        anyhow!(
            "invalid key size in PEM, expected {}, got {}",
            N,
            pem.contents().len()
        )
    })
}
