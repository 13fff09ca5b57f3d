use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use securechat_core::{CredentialError, CredentialStore, Environment, UserCredential};

/// In-memory credential store.
///
/// All state is wrapped in `Arc<Mutex<_>>`, so clones share accounts. The
/// duplicate checks and the insert happen under one lock acquisition.
#[derive(Clone)]
pub struct MemoryCredentialStore<E> {
    env: E,
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    /// Accounts by email
    accounts: HashMap<String, UserCredential>,

    /// Username -> email
    usernames: HashMap<String, String>,
}

impl<E: Environment> MemoryCredentialStore<E> {
    /// Empty store drawing salts from `env`.
    pub fn new(env: E) -> Self {
        Self { env, inner: Arc::new(Mutex::new(Inner::default())) }
    }

    /// Number of registered accounts.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    #[allow(clippy::expect_used)]
    pub fn len(&self) -> usize {
        self.inner.lock().expect("Mutex poisoned").accounts.len()
    }

    /// True if nobody has registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<E: Environment> CredentialStore for MemoryCredentialStore<E> {
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    #[allow(clippy::expect_used)]
    fn register(&self, email: &str, username: &str, password: &str) -> Result<(), CredentialError> {
        let credential = UserCredential::new(email, username, password, self.env.random_array())?;

        let mut inner = self.inner.lock().expect("Mutex poisoned");
        if inner.accounts.contains_key(email) {
            return Err(CredentialError::DuplicateEmail);
        }
        if inner.usernames.contains_key(username) {
            return Err(CredentialError::DuplicateUsername);
        }

        inner.usernames.insert(credential.username.clone(), credential.email.clone());
        inner.accounts.insert(credential.email.clone(), credential);

        tracing::debug!(username, "account registered");
        Ok(())
    }

    #[allow(clippy::expect_used)]
    fn authenticate(&self, email: &str, password: &str) -> Result<String, CredentialError> {
        let inner = self.inner.lock().expect("Mutex poisoned");
        let credential = inner.accounts.get(email).ok_or(CredentialError::NotFound)?;

        if credential.verify(password) {
            Ok(credential.username.clone())
        } else {
            Err(CredentialError::BadPassword)
        }
    }
}

#[cfg(test)]
mod tests {
    use securechat_core::SystemEnv;

    use super::*;

    #[test]
    fn register_then_login() {
        let store = MemoryCredentialStore::new(SystemEnv::new());
        store.register("a@x.com", "alice", "pw1").unwrap();

        assert_eq!(store.authenticate("a@x.com", "pw1").unwrap(), "alice");
        assert_eq!(store.authenticate("a@x.com", "nope"), Err(CredentialError::BadPassword));
        assert_eq!(store.authenticate("b@x.com", "pw1"), Err(CredentialError::NotFound));
    }

    #[test]
    fn duplicates_rejected_without_side_effects() {
        let store = MemoryCredentialStore::new(SystemEnv::new());
        store.register("a@x.com", "alice", "pw1").unwrap();

        assert_eq!(store.register("a@x.com", "alice2", "pw"), Err(CredentialError::DuplicateEmail));
        assert_eq!(store.register("b@x.com", "alice", "pw"), Err(CredentialError::DuplicateUsername));
        assert_eq!(store.len(), 1);
        assert_eq!(store.authenticate("b@x.com", "pw"), Err(CredentialError::NotFound));
    }

    #[test]
    fn clones_share_accounts() {
        let store = MemoryCredentialStore::new(SystemEnv::new());
        let clone = store.clone();

        clone.register("a@x.com", "alice", "pw1").unwrap();
        assert_eq!(store.authenticate("a@x.com", "pw1").unwrap(), "alice");
    }

    #[test]
    fn salts_differ_per_account() {
        let store = MemoryCredentialStore::new(SystemEnv::new());
        store.register("a@x.com", "alice", "same").unwrap();
        store.register("b@x.com", "bob", "same").unwrap();

        let inner = store.inner.lock().unwrap();
        assert_ne!(inner.accounts["a@x.com"].pwd_hash, inner.accounts["b@x.com"].pwd_hash);
    }
}
