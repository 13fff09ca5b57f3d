use securechat_core::{CertificateError, RuntimeError, TranscriptError};
use thiserror::Error;

/// Client errors.
#[derive(Error, Debug)]
pub enum ClientError {
    /// Our certificate, key or the trust anchor could not be loaded.
    #[error("identity error: {0}")]
    Identity(#[from] CertificateError),

    /// TCP connection to the server failed.
    #[error("failed to connect to {address}: {source}")]
    Connect {
        /// Server address
        address: String,
        /// Underlying error
        source: std::io::Error,
    },

    /// Handshake or data plane failed.
    #[error(transparent)]
    Session(#[from] RuntimeError),

    /// Receipt could not be written.
    #[error("persistence error: {0}")]
    Persistence(#[from] TranscriptError),

    /// Terminal I/O failed.
    #[error("terminal I/O error: {0}")]
    Terminal(#[from] std::io::Error),

    /// The user gave an unusable answer at a prompt.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}
