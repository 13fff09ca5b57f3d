//! Session receipts.
//!
//! A receipt commits its issuer to a transcript: it carries the transcript
//! digest and an RSA signature over the 32 raw digest bytes. Anyone holding
//! the ledger file, the receipt and the issuer's certificate can check the
//! commitment offline (see [`crate::audit`]).

use std::path::Path;

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use securechat_crypto::{RsaPrivateKey, RsaPublicKey, sign};
use securechat_proto::{Peer, SessionReceipt};

use crate::{
    error::SessionError,
    transcript::{Transcript, TranscriptError},
};

/// Sign the current digest of `transcript`.
///
/// `first_seq` and `last_seq` are `0` for an empty transcript.
pub fn issue<S>(
    transcript: &Transcript<S>,
    key: &RsaPrivateKey,
    role: Peer,
) -> Result<SessionReceipt, SessionError> {
    let digest = transcript.digest();
    let sig = sign::sign(key, &digest)?;

    Ok(SessionReceipt {
        peer: role,
        first_seq: transcript.first_seq().unwrap_or(0),
        last_seq: transcript.last_seq().unwrap_or(0),
        transcript_sha256: hex::encode(digest),
        sig: BASE64.encode(sig),
    })
}

/// Check the receipt signature over its own `transcript_sha256`.
///
/// Says nothing about whether the digest matches any local transcript.
/// Malformed hex or base64 counts as a failed verification.
pub fn verify(receipt: &SessionReceipt, key: &RsaPublicKey) -> bool {
    let Ok(digest) = hex::decode(&receipt.transcript_sha256) else {
        return false;
    };
    let Ok(sig) = BASE64.decode(&receipt.sig) else {
        return false;
    };

    sign::verify(key, &digest, &sig).is_ok()
}

/// Write a receipt as pretty JSON (with its `type` field).
pub fn save(receipt: &SessionReceipt, path: impl AsRef<Path>) -> Result<(), TranscriptError> {
    let json = serde_json::to_vec_pretty(&Typed { kind: "receipt", receipt })
        .map_err(|e| TranscriptError::Io(e.to_string()))?;
    std::fs::write(path, json)?;
    Ok(())
}

/// Read a receipt written by [`save`] (or any `receipt` JSON object).
pub fn load(path: impl AsRef<Path>) -> Result<SessionReceipt, TranscriptError> {
    let bytes = std::fs::read(path)?;
    serde_json::from_slice(&bytes).map_err(|e| TranscriptError::Io(e.to_string()))
}

#[derive(serde::Serialize)]
struct Typed<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    #[serde(flatten)]
    receipt: &'a SessionReceipt,
}
