//! Redb-backed durable credential store.
//!
//! Uses Redb's ACID transactions with Copy-on-Write for crash safety.
//! Accounts survive server restarts.

use std::{path::Path, sync::Arc};

use redb::{Database, ReadableTable, TableDefinition};
use securechat_core::{CredentialError, CredentialStore, Environment, UserCredential};

/// Table: users
/// Key: email
/// Value: CBOR-encoded UserCredential
const USERS: TableDefinition<&str, &[u8]> = TableDefinition::new("users");

/// Table: usernames
/// Key: username
/// Value: email (key into USERS)
const USERNAMES: TableDefinition<&str, &str> = TableDefinition::new("usernames");

/// Durable credential store backed by Redb.
///
/// Thread-safe through Redb's internal locking; Redb admits one write
/// transaction at a time, which makes registration atomic. Clone is cheap
/// (Arc).
#[derive(Clone)]
pub struct RedbCredentialStore<E> {
    db: Arc<Database>,
    env: E,
}

impl<E: Environment> RedbCredentialStore<E> {
    /// Open or create a Redb database at the given path.
    ///
    /// Creates tables if they don't exist (USERS, USERNAMES).
    ///
    /// # Errors
    ///
    /// Returns `CredentialError::Store` if the database cannot be opened or
    /// created.
    pub fn open(path: impl AsRef<Path>, env: E) -> Result<Self, CredentialError> {
        let db = Database::create(path.as_ref()).map_err(store_error)?;

        let txn = db.begin_write().map_err(store_error)?;
        {
            let _ = txn.open_table(USERS).map_err(store_error)?;
            let _ = txn.open_table(USERNAMES).map_err(store_error)?;
        }
        txn.commit().map_err(store_error)?;

        Ok(Self { db: Arc::new(db), env })
    }
}

impl<E: Environment> CredentialStore for RedbCredentialStore<E> {
    fn register(&self, email: &str, username: &str, password: &str) -> Result<(), CredentialError> {
        let credential = UserCredential::new(email, username, password, self.env.random_array())?;

        let mut bytes = Vec::new();
        ciborium::into_writer(&credential, &mut bytes).map_err(store_error)?;

        let txn = self.db.begin_write().map_err(store_error)?;
        {
            let mut users = txn.open_table(USERS).map_err(store_error)?;
            let mut usernames = txn.open_table(USERNAMES).map_err(store_error)?;

            // Returning early drops the transaction, which aborts it.
            if users.get(email).map_err(store_error)?.is_some() {
                return Err(CredentialError::DuplicateEmail);
            }
            if usernames.get(username).map_err(store_error)?.is_some() {
                return Err(CredentialError::DuplicateUsername);
            }

            users.insert(email, bytes.as_slice()).map_err(store_error)?;
            usernames.insert(username, email).map_err(store_error)?;
        }
        txn.commit().map_err(store_error)?;

        tracing::debug!(username, "account registered");
        Ok(())
    }

    fn authenticate(&self, email: &str, password: &str) -> Result<String, CredentialError> {
        let txn = self.db.begin_read().map_err(store_error)?;
        let users = txn.open_table(USERS).map_err(store_error)?;

        let Some(value) = users.get(email).map_err(store_error)? else {
            return Err(CredentialError::NotFound);
        };
        let credential: UserCredential = ciborium::from_reader(value.value()).map_err(store_error)?;

        if credential.verify(password) {
            Ok(credential.username)
        } else {
            Err(CredentialError::BadPassword)
        }
    }
}

fn store_error(err: impl std::fmt::Display) -> CredentialError {
    CredentialError::Store(err.to_string())
}
