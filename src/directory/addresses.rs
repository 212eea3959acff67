use std::collections::HashMap;

use async_trait::async_trait;

use super::events::DirectoryEntry;
use crate::error::DirectoryError;
use crate::keys::PublicKey;

/// Source of the directory's address list
#[async_trait]
pub trait AddressSource: Send + Sync {
    async fn fetch_addresses(&self) -> Result<Vec<DirectoryEntry>, DirectoryError>;
}

/// `GET {base}/api/addresses`
#[derive(Debug, Clone)]
pub struct HttpAddressSource {
    http: reqwest::Client,
    base_url: String,
}

impl HttpAddressSource {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
        }
    }

    fn url(&self) -> String {
        format!("{}/api/addresses", self.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl AddressSource for HttpAddressSource {
    async fn fetch_addresses(&self) -> Result<Vec<DirectoryEntry>, DirectoryError> {
        let url = self.url();
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| DirectoryError::Addresses(e.to_string()))?;

        if !response.status().is_success() {
            return Err(DirectoryError::Addresses(format!(
                "{} returned {}",
                url,
                response.status()
            )));
        }

        response
            .json::<Vec<DirectoryEntry>>()
            .await
            .map_err(|e| DirectoryError::Addresses(e.to_string()))
    }
}

/// Cached, read-only view of the directory's address list.
///
/// Refreshes are tagged with the epoch they started in; [`AddressBook::invalidate`]
/// bumps the epoch so a refresh that completes after a session ends is dropped.
#[derive(Debug, Default)]
pub struct AddressBook {
    entries: HashMap<String, String>,
    epoch: u64,
}

impl AddressBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Replace the cached list if `epoch` is still current
    pub fn apply(&mut self, epoch: u64, entries: Vec<DirectoryEntry>) -> bool {
        if epoch != self.epoch {
            tracing::debug!(
                "dropping address list from epoch {} (current {})",
                epoch,
                self.epoch
            );
            return false;
        }

        let mut map = HashMap::with_capacity(entries.len());
        for entry in entries {
            if map.contains_key(&entry.user_email) {
                tracing::warn!("directory lists {} more than once, keeping first key", entry.user_email);
                continue;
            }
            map.insert(entry.user_email, entry.public_key);
        }
        self.entries = map;
        true
    }

    /// Drop cached entries and any in-flight refresh
    pub fn invalidate(&mut self) {
        self.entries.clear();
        self.epoch += 1;
    }

    /// PEM public key registered for `email`
    pub fn lookup(&self, email: &str) -> Option<&str> {
        self.entries.get(email).map(String::as_str)
    }

    /// Parsed public key registered for `email`, skipping unparseable entries
    pub fn lookup_key(&self, email: &str) -> Option<PublicKey> {
        let pem = self.lookup(email)?;
        match PublicKey::from_pem(pem) {
            Ok(key) => Some(key),
            Err(e) => {
                tracing::warn!("directory key for {} is unusable: {}", email, e);
                None
            }
        }
    }

    /// Registered addresses, sorted
    pub fn addresses(&self) -> Vec<&str> {
        let mut addresses: Vec<_> = self.entries.keys().map(String::as_str).collect();
        addresses.sort_unstable();
        addresses
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(email: &str, key: &str) -> DirectoryEntry {
        DirectoryEntry {
            user_email: email.to_string(),
            public_key: key.to_string(),
        }
    }

    #[test]
    fn test_apply_and_lookup() {
        let mut book = AddressBook::new();
        assert!(book.apply(book.epoch(), vec![entry("b@x.com", "KB"), entry("a@x.com", "KA")]));
        assert_eq!(book.lookup("a@x.com"), Some("KA"));
        assert_eq!(book.lookup("c@x.com"), None);
        assert_eq!(book.addresses(), vec!["a@x.com", "b@x.com"]);
    }

    #[test]
    fn test_stale_epoch_is_dropped() {
        let mut book = AddressBook::new();
        let epoch = book.epoch();
        book.invalidate();
        assert!(!book.apply(epoch, vec![entry("a@x.com", "KA")]));
        assert!(book.is_empty());
    }

    #[test]
    fn test_duplicate_entries_keep_first() {
        let mut book = AddressBook::new();
        book.apply(0, vec![entry("a@x.com", "first"), entry("a@x.com", "second")]);
        assert_eq!(book.lookup("a@x.com"), Some("first"));
        assert_eq!(book.len(), 1);
    }

    #[test]
    fn test_lookup_key_skips_garbage() {
        let mut book = AddressBook::new();
        let pair = crate::keys::KeyPair::generate().unwrap();
        book.apply(
            0,
            vec![
                entry("a@x.com", &pair.public_key.to_pem()),
                entry("b@x.com", "garbage"),
            ],
        );
        assert_eq!(book.lookup_key("a@x.com"), Some(pair.public_key));
        assert_eq!(book.lookup_key("b@x.com"), None);
    }

    #[test]
    fn test_url_joining() {
        let source = HttpAddressSource::new(reqwest::Client::new(), "http://localhost:3000/");
        assert_eq!(source.url(), "http://localhost:3000/api/addresses");
    }
}
