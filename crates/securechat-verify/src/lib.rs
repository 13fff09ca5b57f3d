//! Offline verification of SecureChat ledgers and session receipts.
//!
//! Works only from files left behind by a finished session: the transcript
//! ledger, a receipt JSON file and public certificates. No network and no
//! private keys.
//!
//! Checks, in order:
//!
//! 1. Ledger parses; per-signer sequence numbers increase by exactly one
//! 2. Receipt digest and range match the ledger; receipt signature verifies
//!    under one of the supplied certificates
//! 3. Optionally, every entry's signature under the certificate its
//!    fingerprint names
//! 4. Optionally, appending a forged line changes the digest

#![forbid(unsafe_code)]
#![deny(missing_docs)]

use std::{
    fmt::Write as _,
    fs,
    path::{Path, PathBuf},
};

use securechat_core::{
    Certificate, CertificateError, EntrySignature, Transcript, TranscriptError,
    audit::{self, SequenceGap},
    receipt,
};
use securechat_proto::SessionReceipt;
use thiserror::Error;

/// Verifier errors. These stop verification before any verdict.
#[derive(Error, Debug)]
pub enum VerifyError {
    /// No `client_*.txt` ledger in the transcript directory.
    #[error("no transcript found in {0}")]
    NoTranscript(PathBuf),

    /// Ledger or receipt could not be read or parsed.
    #[error(transparent)]
    Transcript(#[from] TranscriptError),

    /// A certificate could not be loaded.
    #[error(transparent)]
    Certificate(#[from] CertificateError),

    /// A check that needs certificates was requested without any.
    #[error("certificate required for {0}")]
    MissingCertificate(&'static str),
}

/// What to verify.
#[derive(Debug, Clone, Default)]
pub struct VerifyOptions {
    /// Ledger file; the newest `client_*.txt` in `transcript_dir` if unset
    pub transcript: Option<PathBuf>,
    /// Where to look for the newest ledger
    pub transcript_dir: PathBuf,
    /// Receipt JSON file
    pub receipt: Option<PathBuf>,
    /// Certificates (PEM) for the receipt issuer and entry signers
    pub certificates: Vec<PathBuf>,
    /// Verify every entry signature
    pub verify_messages: bool,
    /// Confirm that appending a forged line changes the digest
    pub test_modification: bool,
}

/// Receipt checks against the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiptCheck {
    /// Receipt file
    pub path: PathBuf,
    /// The receipt as loaded
    pub receipt: SessionReceipt,
    /// Ledger digest equals the receipt's
    pub digest_matches: bool,
    /// `first_seq`/`last_seq` agree with the ledger
    pub range_matches: bool,
    /// Fingerprint of the certificate whose key verified the signature
    pub issuer: Option<String>,
}

/// Result of a verification run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verification {
    /// Ledger that was checked
    pub transcript: PathBuf,
    /// Number of entries
    pub entries: usize,
    /// Recomputed ledger digest (hex)
    pub digest: String,
    /// Per-signer sequence breaks
    pub sequence_gaps: Vec<SequenceGap>,
    /// Receipt result, when a receipt was given
    pub receipt: Option<ReceiptCheck>,
    /// Per-entry signature results, when requested
    pub entry_signatures: Option<Vec<(u64, EntrySignature)>>,
    /// Original and forged digests, when requested
    pub modification: Option<(String, String)>,
}

impl Verification {
    /// Every requested check passed.
    pub fn passed(&self) -> bool {
        let receipt_ok = self
            .receipt
            .as_ref()
            .is_none_or(|r| r.digest_matches && r.range_matches && r.issuer.is_some());
        let entries_ok = self
            .entry_signatures
            .as_ref()
            .is_none_or(|results| results.iter().all(|(_, r)| *r == EntrySignature::Valid));
        let modification_ok = self.modification.as_ref().is_none_or(|(before, after)| before != after);

        self.sequence_gaps.is_empty() && receipt_ok && entries_ok && modification_ok
    }

    /// Human-readable report.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Transcript: {}", self.transcript.display());
        let _ = writeln!(out, "Entries: {}", self.entries);
        let _ = writeln!(out, "SHA-256: {}", self.digest);

        if self.sequence_gaps.is_empty() {
            let _ = writeln!(out, "Sequence: ok");
        }
        for gap in &self.sequence_gaps {
            let _ = writeln!(
                out,
                "Sequence: signer {} expected {}, found {}",
                short(&gap.signer),
                gap.expected,
                gap.found
            );
        }

        if let Some(check) = &self.receipt {
            let r = &check.receipt;
            let _ = writeln!(
                out,
                "Receipt: {} ({}, seq {}..{})",
                check.path.display(),
                r.peer,
                r.first_seq,
                r.last_seq
            );
            let _ = writeln!(out, "  digest: {}", verdict(check.digest_matches, "match", "MISMATCH"));
            let _ = writeln!(out, "  range: {}", verdict(check.range_matches, "match", "MISMATCH"));
            match &check.issuer {
                Some(fingerprint) => {
                    let _ = writeln!(out, "  signature: valid ({})", short(fingerprint));
                },
                None => {
                    let _ = writeln!(out, "  signature: INVALID");
                },
            }
        }

        if let Some(results) = &self.entry_signatures {
            let _ = writeln!(out, "Messages:");
            for (seqno, result) in results {
                let text = match result {
                    EntrySignature::Valid => "valid",
                    EntrySignature::Invalid => "INVALID",
                    EntrySignature::UnknownSigner => "UNKNOWN SIGNER",
                };
                let _ = writeln!(out, "  seqno {seqno}: {text}");
            }
        }

        if let Some((before, after)) = &self.modification {
            let _ = writeln!(
                out,
                "Modification: {} ({} -> {})",
                verdict(before != after, "digest changed", "DIGEST UNCHANGED"),
                short(before),
                short(after)
            );
        }

        let _ = writeln!(out, "Result: {}", verdict(self.passed(), "PASS", "FAIL"));
        out
    }
}

fn verdict(ok: bool, pass: &'static str, fail: &'static str) -> &'static str {
    if ok { pass } else { fail }
}

fn short(hex: &str) -> &str {
    hex.get(..16).unwrap_or(hex)
}

/// Newest `client_*.txt` ledger in `dir`, by modification time.
pub fn latest_transcript(dir: &Path) -> Result<PathBuf, VerifyError> {
    let entries = fs::read_dir(dir).map_err(|_| VerifyError::NoTranscript(dir.to_path_buf()))?;

    entries
        .filter_map(Result::ok)
        .filter(|entry| {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            name.starts_with("client_") && name.ends_with(".txt")
        })
        .filter_map(|entry| {
            let modified = entry.metadata().and_then(|m| m.modified()).ok()?;
            Some((modified, entry.path()))
        })
        .max()
        .map(|(_, path)| path)
        .ok_or_else(|| VerifyError::NoTranscript(dir.to_path_buf()))
}

/// Run every check `options` asks for.
pub fn verify(options: &VerifyOptions) -> Result<Verification, VerifyError> {
    let path = match &options.transcript {
        Some(path) => path.clone(),
        None => latest_transcript(&options.transcript_dir)?,
    };
    tracing::debug!(transcript = %path.display(), "loading ledger");
    let transcript = Transcript::load(&path)?;

    let certificates = options
        .certificates
        .iter()
        .map(Certificate::load)
        .collect::<Result<Vec<_>, _>>()?;

    let receipt = match &options.receipt {
        Some(receipt_path) => {
            let Some(first) = certificates.first() else {
                return Err(VerifyError::MissingCertificate("receipt verification"));
            };
            let loaded = receipt::load(receipt_path)?;
            let issuer = certificates.iter().find(|c| receipt::verify(&loaded, c.public_key()));

            // Any certificate works for the digest and range checks.
            let report = audit::audit(&transcript, &loaded, issuer.unwrap_or(first), &[]);
            Some(ReceiptCheck {
                path: receipt_path.clone(),
                digest_matches: report.digest_matches,
                range_matches: report.range_matches,
                issuer: issuer.map(|c| c.fingerprint().to_string()),
                receipt: loaded,
            })
        },
        None => None,
    };

    let entry_signatures = if options.verify_messages {
        if certificates.is_empty() {
            return Err(VerifyError::MissingCertificate("message verification"));
        }
        Some(
            transcript
                .entries()
                .iter()
                .map(|entry| (entry.seqno, audit::verify_entry(entry, &certificates)))
                .collect(),
        )
    } else {
        None
    };

    let verification = Verification {
        entries: transcript.len(),
        digest: transcript.digest_hex(),
        sequence_gaps: audit::check_sequence(transcript.entries()),
        receipt,
        entry_signatures,
        modification: options.test_modification.then(|| audit::tamper_check(&transcript)),
        transcript: path,
    };

    tracing::info!(
        entries = verification.entries,
        passed = verification.passed(),
        "verification finished"
    );
    Ok(verification)
}
