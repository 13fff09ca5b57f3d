//! Offline verification of a transcript ledger against a receipt.
//!
//! Everything here works on files after the session is over: no keys other
//! than public certificates are needed.

use std::collections::HashMap;

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use securechat_crypto::{message_signing_input, sign};
use securechat_proto::SessionReceipt;

use crate::{
    identity::Certificate,
    receipt,
    transcript::{Transcript, TranscriptEntry},
};

/// A sequence number that broke per-signer monotonicity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceGap {
    /// Fingerprint of the signer whose sequence broke
    pub signer: String,
    /// Sequence number that should have followed
    pub expected: u64,
    /// Sequence number found
    pub found: u64,
}

/// Check that each signer's sequence numbers increase by exactly one.
///
/// Messages from the two parties interleave in a transcript, so the check
/// runs independently per signer fingerprint.
pub fn check_sequence(entries: &[TranscriptEntry]) -> Vec<SequenceGap> {
    let mut last: HashMap<&str, u64> = HashMap::new();
    let mut gaps = Vec::new();

    for entry in entries {
        if let Some(previous) = last.get(entry.signer.as_str()) {
            let expected = previous.saturating_add(1);
            if entry.seqno != expected {
                gaps.push(SequenceGap {
                    signer: entry.signer.clone(),
                    expected,
                    found: entry.seqno,
                });
            }
        }
        last.insert(entry.signer.as_str(), entry.seqno);
    }

    gaps
}

/// Outcome of verifying one entry's signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntrySignature {
    /// Signature verified under the named certificate
    Valid,
    /// Signature (or its encoding) did not verify
    Invalid,
    /// No supplied certificate has the entry's fingerprint
    UnknownSigner,
}

/// Verify one entry against the certificate its fingerprint names.
pub fn verify_entry(entry: &TranscriptEntry, certificates: &[Certificate]) -> EntrySignature {
    let Some(cert) = certificates.iter().find(|c| c.fingerprint() == entry.signer) else {
        return EntrySignature::UnknownSigner;
    };

    let (Ok(ct), Ok(sig)) = (BASE64.decode(&entry.ct), BASE64.decode(&entry.sig)) else {
        return EntrySignature::Invalid;
    };

    let input = message_signing_input(entry.seqno, entry.ts, &ct);
    match sign::verify(cert.public_key(), &input, &sig) {
        Ok(()) => EntrySignature::Valid,
        Err(_) => EntrySignature::Invalid,
    }
}

/// Full offline audit result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditReport {
    /// Number of ledger entries
    pub entries: usize,
    /// Digest recomputed from the ledger
    pub computed_digest: String,
    /// Per-signer sequence breaks
    pub sequence_gaps: Vec<SequenceGap>,
    /// Recomputed digest equals the receipt's (case-insensitive)
    pub digest_matches: bool,
    /// Receipt's `first_seq`/`last_seq` agree with the ledger
    pub range_matches: bool,
    /// Receipt signature verifies under the issuer certificate
    pub receipt_signature_valid: bool,
    /// Per-entry signature results, when requested
    pub entry_signatures: Option<Vec<(u64, EntrySignature)>>,
}

impl AuditReport {
    /// All checks passed. Unknown signers count as failures.
    pub fn is_valid(&self) -> bool {
        let entries_ok = self
            .entry_signatures
            .as_ref()
            .is_none_or(|results| results.iter().all(|(_, r)| *r == EntrySignature::Valid));

        self.sequence_gaps.is_empty()
            && self.digest_matches
            && self.range_matches
            && self.receipt_signature_valid
            && entries_ok
    }
}

/// Audit `transcript` against `receipt`.
///
/// `issuer` is the certificate of the party that signed the receipt.
/// When `certificates` is non-empty every entry's signature is checked
/// against the certificate its fingerprint names.
pub fn audit<S>(
    transcript: &Transcript<S>,
    receipt: &SessionReceipt,
    issuer: &Certificate,
    certificates: &[Certificate],
) -> AuditReport {
    let computed_digest = transcript.digest_hex();

    let entry_signatures = (!certificates.is_empty()).then(|| {
        transcript
            .entries()
            .iter()
            .map(|entry| (entry.seqno, verify_entry(entry, certificates)))
            .collect()
    });

    AuditReport {
        entries: transcript.len(),
        sequence_gaps: check_sequence(transcript.entries()),
        digest_matches: computed_digest.eq_ignore_ascii_case(&receipt.transcript_sha256),
        range_matches: transcript.first_seq().unwrap_or(0) == receipt.first_seq
            && transcript.last_seq().unwrap_or(0) == receipt.last_seq,
        receipt_signature_valid: receipt::verify(receipt, issuer.public_key()),
        entry_signatures,
        computed_digest,
    }
}

/// Confirm that appending a forged line changes the digest.
///
/// Returns the original and modified digests.
pub fn tamper_check<S>(transcript: &Transcript<S>) -> (String, String) {
    let forged = TranscriptEntry {
        seqno: 999,
        ts: 9_999_999_999_999,
        ct: "fake_ciphertext".to_string(),
        sig: "fake_signature".to_string(),
        signer: "fake_fingerprint".to_string(),
    };

    let mut lines: Vec<String> = transcript.entries().iter().map(TranscriptEntry::to_line).collect();
    lines.push(forged.to_line());

    let modified = hex::encode(securechat_crypto::sha256(lines.join("\n").as_bytes()));
    (transcript.digest_hex(), modified)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(seqno: u64, signer: &str) -> TranscriptEntry {
        TranscriptEntry {
            seqno,
            ts: 0,
            ct: String::new(),
            sig: String::new(),
            signer: signer.to_string(),
        }
    }

    #[test]
    fn interleaved_signers_are_independent() {
        let entries = vec![entry(1, "a"), entry(1, "b"), entry(2, "a"), entry(2, "b"), entry(3, "a")];
        assert!(check_sequence(&entries).is_empty());
    }

    #[test]
    fn repeated_seqno_detected() {
        let entries = vec![entry(1, "a"), entry(1, "a")];
        assert_eq!(
            check_sequence(&entries),
            vec![SequenceGap { signer: "a".to_string(), expected: 2, found: 1 }]
        );
    }

    #[test]
    fn skipped_seqno_detected() {
        let entries = vec![entry(1, "a"), entry(3, "a")];
        assert_eq!(check_sequence(&entries).len(), 1);
    }

    #[test]
    fn unknown_signer_reported() {
        assert_eq!(verify_entry(&entry(1, "nobody"), &[]), EntrySignature::UnknownSigner);
    }
}
