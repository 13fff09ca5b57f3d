//! Credential storage backends.
//!
//! Both implement [`CredentialStore`]: synchronous, `Clone` handles sharing
//! one underlying store, registration atomic with respect to both uniqueness
//! indexes (email and username).
//!
//! - [`MemoryCredentialStore`]: `HashMap`s behind a mutex, for tests and
//!   throw-away servers
//! - [`RedbCredentialStore`]: durable, one redb write transaction per
//!   registration
//!
//! [`CredentialStore`]: securechat_core::CredentialStore

mod memory;
mod redb;

pub use memory::MemoryCredentialStore;

pub use self::redb::RedbCredentialStore;
