//! Credential gateway.
//!
//! The session layer only sees [`CredentialStore`]. Password hashing lives
//! here, once, in [`UserCredential`]: `pwd_hash = hex(SHA256(salt ‖ pwd))`
//! with a 16-byte random salt, compared in constant time.

use securechat_proto::AuthRequest;
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use thiserror::Error;

/// Salt length in bytes.
pub const SALT_SIZE: usize = 16;

/// Credential store failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CredentialError {
    /// Email already registered.
    #[error("Email already registered")]
    DuplicateEmail,

    /// Username already taken.
    #[error("Username already taken")]
    DuplicateUsername,

    /// No account for this email.
    #[error("Invalid email or password")]
    NotFound,

    /// Password did not match.
    #[error("Invalid email or password")]
    BadPassword,

    /// Request fields were empty.
    #[error("Invalid request: {0}")]
    InvalidInput(&'static str),

    /// Backend failure.
    #[error("Credential store error: {0}")]
    Store(String),
}

/// Stored account record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserCredential {
    /// Account email, unique
    pub email: String,
    /// Display name, unique
    pub username: String,
    /// Random per-user salt
    pub salt: [u8; SALT_SIZE],
    /// Lowercase hex `SHA256(salt ‖ password)`
    pub pwd_hash: String,
}

impl UserCredential {
    /// Hash `password` under `salt`.
    ///
    /// # Errors
    ///
    /// - `CredentialError::InvalidInput` if any field is empty
    pub fn new(
        email: &str,
        username: &str,
        password: &str,
        salt: [u8; SALT_SIZE],
    ) -> Result<Self, CredentialError> {
        if email.is_empty() {
            return Err(CredentialError::InvalidInput("email is empty"));
        }
        if username.is_empty() {
            return Err(CredentialError::InvalidInput("username is empty"));
        }
        if password.is_empty() {
            return Err(CredentialError::InvalidInput("password is empty"));
        }

        Ok(Self {
            email: email.to_string(),
            username: username.to_string(),
            salt,
            pwd_hash: hash_password(&salt, password),
        })
    }

    /// Constant-time check of `password` against the stored hash.
    pub fn verify(&self, password: &str) -> bool {
        let candidate = hash_password(&self.salt, password);
        candidate.as_bytes().ct_eq(self.pwd_hash.as_bytes()).into()
    }
}

/// `hex(SHA256(salt ‖ password))`.
pub fn hash_password(salt: &[u8], password: &str) -> String {
    let mut input = zeroize::Zeroizing::new(Vec::with_capacity(salt.len() + password.len()));
    input.extend_from_slice(salt);
    input.extend_from_slice(password.as_bytes());
    securechat_crypto::sha256_hex(&input)
}

/// Account storage consulted during the Authentication phase.
///
/// Implementations are shared by every connection task, so they must
/// serialize writes internally.
///
/// # Invariants
///
/// - `register` is atomic: after concurrent calls with the same email or
///   username, exactly one succeeds.
/// - Neither method ever stores or logs the plaintext password.
pub trait CredentialStore: Clone + Send + Sync + 'static {
    /// Create an account.
    ///
    /// # Errors
    ///
    /// - `DuplicateEmail` / `DuplicateUsername` on a uniqueness violation
    /// - `InvalidInput` for empty fields
    /// - `Store` on backend failure
    fn register(&self, email: &str, username: &str, password: &str) -> Result<(), CredentialError>;

    /// Check a password and return the account's username.
    ///
    /// # Errors
    ///
    /// - `NotFound` / `BadPassword`; both display identically
    /// - `Store` on backend failure
    fn authenticate(&self, email: &str, password: &str) -> Result<String, CredentialError>;

    /// Dispatch a decrypted credential request; returns the username.
    fn process(&self, request: &AuthRequest) -> Result<String, CredentialError> {
        match request {
            AuthRequest::Register { email, username, pwd } => {
                self.register(email, username, pwd).map(|()| username.clone())
            },
            AuthRequest::Login { email, pwd, .. } => self.authenticate(email, pwd),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_salted_sha256_hex() {
        let salt = [0u8; SALT_SIZE];
        let mut input = salt.to_vec();
        input.extend_from_slice(b"pw1");

        assert_eq!(hash_password(&salt, "pw1"), securechat_crypto::sha256_hex(&input));
        assert_ne!(hash_password(&[1u8; SALT_SIZE], "pw1"), hash_password(&salt, "pw1"));
    }

    #[test]
    fn verify_password() {
        let cred = UserCredential::new("a@x.com", "alice", "pw1", [7u8; SALT_SIZE]).unwrap();
        assert!(cred.verify("pw1"));
        assert!(!cred.verify("pw2"));
        assert!(!cred.verify(""));
    }

    #[test]
    fn empty_fields_rejected() {
        assert_eq!(
            UserCredential::new("", "alice", "pw", [0; SALT_SIZE]),
            Err(CredentialError::InvalidInput("email is empty"))
        );
        assert!(UserCredential::new("a@x.com", "", "pw", [0; SALT_SIZE]).is_err());
        assert!(UserCredential::new("a@x.com", "alice", "", [0; SALT_SIZE]).is_err());
    }

    #[test]
    fn login_failures_are_indistinguishable() {
        assert_eq!(CredentialError::NotFound.to_string(), CredentialError::BadPassword.to_string());
    }
}
