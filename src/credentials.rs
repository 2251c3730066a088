use crate::error::{ClockworkError, Result};
use keyring::Entry;
use std::collections::HashMap;
use std::sync::Mutex;

pub const ACCESS_TOKEN_KEY: &str = "spotify_access_token";
pub const REFRESH_TOKEN_KEY: &str = "spotify_refresh_token";

const KEYCHAIN_SERVICE: &str = "com.clockwork.spotify";

/// Key-value storage for the OAuth token pair
///
/// A missing key is reported as `Ok(None)`, and deleting a missing key
/// succeeds.
pub trait CredentialStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn delete(&self, key: &str) -> Result<()>;
}

/// Credential store backed by the platform keychain
#[derive(Debug, Default)]
pub struct KeyringStore;

impl KeyringStore {
    pub fn new() -> Self {
        Self
    }
}

impl CredentialStore for KeyringStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let entry = Entry::new(KEYCHAIN_SERVICE, key)?;

        match entry.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(ClockworkError::KeyringError(e)),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let entry = Entry::new(KEYCHAIN_SERVICE, key)?;
        entry.set_password(value)?;
        log::debug!("Stored {} in keychain", key);
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        let entry = Entry::new(KEYCHAIN_SERVICE, key)?;

        match entry.delete_credential() {
            Ok(_) => {
                log::debug!("Removed {} from keychain", key);
                Ok(())
            }
            // Already cleared, not an error
            Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(ClockworkError::KeyringError(e)),
        }
    }
}

/// In-process credential store, nothing survives the process
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, String>>> {
        self.entries
            .lock()
            .map_err(|_| ClockworkError::ConfigError("credential map poisoned".to_string()))
    }
}

impl CredentialStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.lock()?.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.lock()?.remove(key);
        Ok(())
    }
}
