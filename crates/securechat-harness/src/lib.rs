//! Deterministic test harness for SecureChat.
//!
//! - [`TestEnv`]: settable clock and seeded RNG behind the `Environment` trait
//! - [`pki()`]: a generated CA with good and deliberately bad certificates
//! - [`pump()`]: runs a client and a server session against each other in
//!   memory, no sockets involved
//!
//! Used as a dev-dependency by every other crate in the workspace.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod env;
pub mod pki;
pub mod pump;

pub use env::{DEFAULT_EPOCH_MS, TestEnv};
pub use pki::{Party, Pki, PkiFiles, pki};
pub use pump::{Exchange, PumpError, TestSession, client_session, handshake, pump, server_session};
pub use securechat_server::storage::MemoryCredentialStore;
