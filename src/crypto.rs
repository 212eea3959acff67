use curve25519_dalek::edwards::CompressedEdwardsY;
use pkarr::Keypair;
use sha2::{Digest, Sha512};
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret};

/// Domain separation for message envelope keys
const ENVELOPE_KEY_CONTEXT: &str = "eemailer 2024 message envelope key v1";

/// Convert Ed25519 public key to X25519 public key
pub fn ed25519_public_to_x25519(ed_pub: &[u8; 32]) -> Option<X25519PublicKey> {
    let compressed = CompressedEdwardsY(*ed_pub);
    let edwards_point = compressed.decompress()?;
    Some(X25519PublicKey::from(edwards_point.to_montgomery().to_bytes()))
}

/// Convert Ed25519 secret key to X25519 secret key
pub fn ed25519_secret_to_x25519(ed_secret: &[u8; 32]) -> StaticSecret {
    let mut hasher = Sha512::new();
    hasher.update(ed_secret);
    let hash = hasher.finalize();

    let mut x25519_secret_bytes = [0u8; 32];
    x25519_secret_bytes.copy_from_slice(&hash[0..32]);

    // Apply clamping as per RFC 7748
    x25519_secret_bytes[0] &= 248;
    x25519_secret_bytes[31] &= 127;
    x25519_secret_bytes[31] |= 64;

    StaticSecret::from(x25519_secret_bytes)
}

/// Diffie-Hellman between our keypair and another party's Ed25519 public key.
///
/// Returns `None` if the other key is not a valid point or the exchange is
/// non-contributory (low-order point).
pub fn shared_secret(keypair: &Keypair, other_pubkey: &[u8; 32]) -> Option<[u8; 32]> {
    let x25519_secret = ed25519_secret_to_x25519(&keypair.secret_key());
    let other_x25519 = ed25519_public_to_x25519(other_pubkey)?;

    let shared = x25519_secret.diffie_hellman(&other_x25519);
    if !shared.was_contributory() {
        return None;
    }
    Some(*shared.as_bytes())
}

/// Derive the symmetric key that seals one envelope.
///
/// Binds the shared secret to both public keys so an envelope cannot be
/// re-targeted at another recipient.
pub fn derive_envelope_key(
    shared: &[u8; 32],
    ephemeral_pubkey: &[u8; 32],
    recipient_pubkey: &[u8; 32],
) -> [u8; 32] {
    let mut material = Vec::with_capacity(96);
    material.extend_from_slice(shared);
    material.extend_from_slice(ephemeral_pubkey);
    material.extend_from_slice(recipient_pubkey);
    blake3::derive_key(ENVELOPE_KEY_CONTEXT, &material)
}
