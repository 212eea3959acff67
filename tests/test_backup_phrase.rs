use std::sync::Arc;

use anyhow::Result;
use bip39::Mnemonic;
use eemailer::storage::MemoryStore;
use eemailer::{KeyPair, KeyVault, PrivateKey};

const ZERO_PHRASE: &str = "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon art";
const ONES_PHRASE: &str = "zoo zoo zoo zoo zoo zoo zoo zoo zoo zoo zoo zoo zoo zoo zoo zoo zoo zoo zoo zoo zoo zoo zoo vote";

#[test]
fn test_from_backup_phrase_valid() -> Result<()> {
    let key = PrivateKey::from_backup_phrase(ZERO_PHRASE)?;
    assert_eq!(key, PrivateKey::from_bytes([0u8; 32]));
    assert!(!key.public_key().to_pem().is_empty());
    Ok(())
}

#[test]
fn test_from_backup_phrase_deterministic() -> Result<()> {
    // Same phrase should always produce the same key pair
    let key1 = PrivateKey::from_backup_phrase(ZERO_PHRASE)?;
    let key2 = PrivateKey::from_backup_phrase(ZERO_PHRASE)?;
    assert_eq!(key1.public_key(), key2.public_key());
    Ok(())
}

#[test]
fn test_from_backup_phrase_different_phrases() -> Result<()> {
    let key1 = PrivateKey::from_backup_phrase(ZERO_PHRASE)?;
    let key2 = PrivateKey::from_backup_phrase(ONES_PHRASE)?;
    assert_ne!(key1.public_key(), key2.public_key());
    Ok(())
}

#[test]
fn test_from_backup_phrase_invalid() {
    let invalid_cases = vec![
        "invalid mnemonic phrase here",
        "abandon abandon abandon",
        // valid checksum but only 128 bits of entropy
        "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about",
        "",
        // wrong checksum word
        "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon",
    ];

    for invalid in invalid_cases {
        let result = PrivateKey::from_backup_phrase(invalid);
        assert!(result.is_err(), "Should fail for invalid phrase: '{}'", invalid);
    }
}

#[test]
fn test_from_backup_phrase_case_sensitive() {
    let uppercase = ZERO_PHRASE.to_uppercase();
    assert!(
        PrivateKey::from_backup_phrase(&uppercase).is_err(),
        "Uppercase phrase should fail"
    );
}

#[test]
fn test_backup_phrase_matches_bip39_entropy() -> Result<()> {
    let pair = KeyPair::generate()?;
    let phrase = pair.private_key.to_backup_phrase()?;

    let mnemonic = Mnemonic::parse(&phrase)?;
    assert_eq!(mnemonic.word_count(), 24);

    let restored = PrivateKey::from_backup_phrase(&mnemonic.to_string())?;
    assert_eq!(restored.public_key(), pair.public_key);
    Ok(())
}

#[test]
fn test_restore_into_vault() -> Result<()> {
    let store = MemoryStore::new();
    let vault = KeyVault::new(Arc::new(store.clone()), "alice@example.com");
    let pair = KeyPair::generate()?;
    let phrase = pair.private_key.to_backup_phrase()?;

    // Nothing stored, as after logout or on a new device
    assert!(vault.load_private_key()?.is_none());

    let restored = vault.restore_from_phrase(&phrase)?;
    assert_eq!(restored, pair);
    assert_eq!(vault.load_private_key()?, Some(pair.private_key));
    Ok(())
}
