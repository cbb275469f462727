//! Secure token storage.
//!
//! The bearer token lives in the OS credential store (Keychain, Secret
//! Service, Windows Credential Manager) through the `keyring` crate. With
//! the keyring disabled it is kept in the local database instead, so a login
//! survives between CLI invocations.

use keyring::Entry;
use std::sync::Arc;
use tracing::{info, warn};

use crate::db::{self, DbState};
use crate::error::{ColetaError, Result};

pub const SERVICE_NAME: &str = "coleta";

pub const KEY_ACCESS_TOKEN: &str = "access_token";

/// All credential keys managed by this module.
const ALL_KEYS: &[&str] = &[KEY_ACCESS_TOKEN];

pub trait CredentialStore: Send + Sync {
    /// Returns `None` when the entry does not exist or cannot be read.
    fn get(&self, key: &str) -> Option<String>;

    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Silently succeeds when the entry does not exist.
    fn delete(&self, key: &str) -> Result<()>;
}

/// Delete every stored credential.
pub fn clear_all(store: &dyn CredentialStore) -> Result<()> {
    for key in ALL_KEYS {
        store.delete(key)?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// OS keyring
// ---------------------------------------------------------------------------

pub struct KeyringStore {
    service: String,
}

impl KeyringStore {
    pub fn new() -> Self {
        Self::with_service(SERVICE_NAME)
    }

    pub fn with_service(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }
}

impl Default for KeyringStore {
    fn default() -> Self {
        Self::new()
    }
}

fn keyring_error(err: keyring::Error) -> ColetaError {
    ColetaError::Storage(format!("keyring: {err}"))
}

impl CredentialStore for KeyringStore {
    fn get(&self, key: &str) -> Option<String> {
        let entry = match Entry::new(&self.service, key) {
            Ok(e) => e,
            Err(e) => {
                warn!(key, error = %e, "keyring: failed to create entry");
                return None;
            }
        };
        match entry.get_password() {
            Ok(pw) => Some(pw),
            Err(keyring::Error::NoEntry) => None,
            Err(e) => {
                warn!(key, error = %e, "keyring: failed to read credential");
                None
            }
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let entry = Entry::new(&self.service, key).map_err(keyring_error)?;
        entry.set_password(value).map_err(keyring_error)?;
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        let entry = Entry::new(&self.service, key).map_err(keyring_error)?;
        match entry.delete_credential() {
            Ok(()) => Ok(()),
            Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(keyring_error(e)),
        }
    }
}

// ---------------------------------------------------------------------------
// Local database
// ---------------------------------------------------------------------------

const CREDENTIAL_CATEGORY: &str = "credentials";

/// Credentials in `local_settings`, for hosts without a usable keyring.
pub struct SettingsStore {
    db: Arc<DbState>,
}

impl SettingsStore {
    pub fn new(db: Arc<DbState>) -> Self {
        Self { db }
    }
}

impl CredentialStore for SettingsStore {
    fn get(&self, key: &str) -> Option<String> {
        let conn = self.db.lock().ok()?;
        db::get_setting(&conn, CREDENTIAL_CATEGORY, key)
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.db.lock()?;
        db::set_setting(&conn, CREDENTIAL_CATEGORY, key, value)
    }

    fn delete(&self, key: &str) -> Result<()> {
        let conn = self.db.lock()?;
        db::delete_setting(&conn, CREDENTIAL_CATEGORY, key)
    }
}

// ---------------------------------------------------------------------------
// Test store
// ---------------------------------------------------------------------------

#[cfg(test)]
#[derive(Default)]
pub struct MemoryStore {
    entries: std::sync::Mutex<std::collections::HashMap<String, String>>,
}

#[cfg(test)]
impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(test)]
impl CredentialStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries
            .lock()
            .ok()
            .and_then(|map| map.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut map = self
            .entries
            .lock()
            .map_err(|e| ColetaError::Storage(format!("credential lock poisoned: {e}")))?;
        map.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        let mut map = self
            .entries
            .lock()
            .map_err(|e| ColetaError::Storage(format!("credential lock poisoned: {e}")))?;
        map.remove(key);
        Ok(())
    }
}

/// Pick the credential backend. `use_keyring = false` keeps the token in
/// the local database.
pub fn open_store(use_keyring: bool, db: Arc<DbState>) -> Box<dyn CredentialStore> {
    if use_keyring {
        Box::new(KeyringStore::new())
    } else {
        info!("keyring disabled, token is kept in the local database");
        Box::new(SettingsStore::new(db))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_roundtrip() {
        let store = MemoryStore::new();
        assert!(store.get(KEY_ACCESS_TOKEN).is_none());
        store.set(KEY_ACCESS_TOKEN, "tok").unwrap();
        assert_eq!(store.get(KEY_ACCESS_TOKEN).as_deref(), Some("tok"));
        store.delete(KEY_ACCESS_TOKEN).unwrap();
        assert!(store.get(KEY_ACCESS_TOKEN).is_none());
        // deleting a missing entry is fine
        store.delete(KEY_ACCESS_TOKEN).unwrap();
    }

    #[test]
    fn test_clear_all_removes_token() {
        let store = MemoryStore::new();
        store.set(KEY_ACCESS_TOKEN, "tok").unwrap();
        clear_all(&store).unwrap();
        assert!(store.get(KEY_ACCESS_TOKEN).is_none());
    }

    #[test]
    fn test_settings_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let db = Arc::new(db::init(dir.path()).unwrap());
            let store = open_store(false, db);
            store.set(KEY_ACCESS_TOKEN, "tok").unwrap();
        }

        let db = Arc::new(db::init(dir.path()).unwrap());
        let store = open_store(false, db);
        assert_eq!(store.get(KEY_ACCESS_TOKEN).as_deref(), Some("tok"));
        clear_all(store.as_ref()).unwrap();
        assert!(store.get(KEY_ACCESS_TOKEN).is_none());
    }
}
