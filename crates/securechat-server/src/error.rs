//! Server error types.

use std::fmt;

use securechat_core::{CertificateError, CredentialError, RuntimeError, TranscriptError};

/// Errors that can occur in the server.
#[derive(Debug)]
pub enum ServerError {
    /// Configuration error (invalid bind address, unreadable certificate or
    /// key, etc.).
    ///
    /// These are fatal errors that prevent server startup. Fix configuration
    /// and restart.
    Config(String),

    /// Transport/network error (bind failure, accept failure, I/O error).
    ///
    /// May be transient (network issues) or fatal (bind address in use).
    Transport(String),

    /// Credential store could not be opened.
    Storage(CredentialError),

    /// A connection's session failed.
    ///
    /// Fatal for that connection only; the server keeps serving others.
    Session(RuntimeError),

    /// Receipt could not be written.
    Persistence(TranscriptError),
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "configuration error: {msg}"),
            Self::Transport(msg) => write!(f, "transport error: {msg}"),
            Self::Storage(err) => write!(f, "storage error: {err}"),
            Self::Session(err) => write!(f, "session error: {err}"),
            Self::Persistence(err) => write!(f, "persistence error: {err}"),
        }
    }
}

impl std::error::Error for ServerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Storage(err) => Some(err),
            Self::Session(err) => Some(err),
            Self::Persistence(err) => Some(err),
            Self::Config(_) | Self::Transport(_) => None,
        }
    }
}

impl From<RuntimeError> for ServerError {
    fn from(err: RuntimeError) -> Self {
        Self::Session(err)
    }
}

impl From<CredentialError> for ServerError {
    fn from(err: CredentialError) -> Self {
        Self::Storage(err)
    }
}

impl From<TranscriptError> for ServerError {
    fn from(err: TranscriptError) -> Self {
        Self::Persistence(err)
    }
}

impl From<CertificateError> for ServerError {
    fn from(err: CertificateError) -> Self {
        Self::Config(err.to_string())
    }
}

impl From<std::io::Error> for ServerError {
    fn from(err: std::io::Error) -> Self {
        Self::Transport(err.to_string())
    }
}
