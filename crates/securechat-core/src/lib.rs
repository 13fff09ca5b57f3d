//! SecureChat session core.
//!
//! Everything between the wire codec and the binaries:
//!
//! - [`identity`]: X.509 certificates, trust anchor validation, local keys
//! - [`session`]: the Sans-IO protocol state machine
//! - [`transcript`] and [`receipt`]: the append-only ledger and signed
//!   commitments to it
//! - [`audit`]: offline verification of a ledger against a receipt
//! - [`credentials`]: the account store seam used during authentication
//! - [`channel`] and [`runtime`]: framed tokio I/O and the per-connection
//!   driver
//!
//! # Architecture
//!
//! ```text
//! ┌────────────┐ payloads ┌─────────┐ actions ┌────────┐ frames ┌──────┐
//! │ FrameReader│─────────>│ Session │────────>│ Driver │───────>│ peer │
//! └────────────┘          └─────────┘         └────────┘        └──────┘
//!                              │ append
//!                              v
//!                        ┌────────────┐
//!                        │ Transcript │──> FileSink / MemorySink
//!                        └────────────┘
//! ```
//!
//! Time and randomness come from an [`Environment`], so tests run whole
//! sessions with a fixed clock and seeded RNG.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod audit;
pub mod channel;
pub mod credentials;
pub mod env;
pub mod error;
pub mod identity;
pub mod receipt;
pub mod runtime;
pub mod session;
pub mod system_env;
pub mod transcript;

pub use audit::{AuditReport, EntrySignature, SequenceGap, audit};
pub use channel::{FrameReader, FrameWriter, TransportError};
pub use credentials::{CredentialError, CredentialStore, UserCredential};
pub use env::Environment;
pub use error::{RejectReason, SessionError};
pub use identity::{Certificate, CertificateError, ChainVerification, LocalIdentity};
pub use runtime::{Command, Driver, RuntimeError, SessionEvent};
pub use session::{Credentials, Session, SessionAction, SessionConfig, SessionState};
pub use system_env::SystemEnv;
pub use transcript::{
    FileSink, MemorySink, SessionFiles, Transcript, TranscriptEntry, TranscriptError, TranscriptSink,
};
