//! Append-only transcript ledger.
//!
//! Each accepted or sent chat message becomes one line:
//!
//! ```text
//! seqno|ts|ct_b64|sig_b64|signer_fingerprint_hex
//! ```
//!
//! The digest is `SHA256(join("\n", lines))` in append order, so the empty
//! transcript hashes to `SHA256("")`. Lines are written through a
//! [`TranscriptSink`] before they are recorded in memory: a line that was not
//! persisted is never covered by a receipt.

use std::{
    fs::{File, OpenOptions},
    io::{BufRead, BufReader, Write},
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use securechat_crypto::{hash::DIGEST_SIZE, sha256};
use securechat_proto::{ChatMessage, Peer};
use thiserror::Error;

/// Transcript persistence and parsing errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TranscriptError {
    /// Underlying file operation failed.
    #[error("transcript I/O error: {0}")]
    Io(String),

    /// A ledger line did not have five `|`-separated fields.
    #[error("malformed transcript line {line}: {reason}")]
    Malformed {
        /// 1-based line number
        line: usize,
        /// What was wrong
        reason: String,
    },
}

impl From<std::io::Error> for TranscriptError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// One transcript line.
///
/// Ciphertext and signature are kept as the exact base64 text that went over
/// the wire, so the ledger reproduces byte-for-byte what was signed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptEntry {
    /// Sender sequence number
    pub seqno: u64,
    /// Sender timestamp (ms)
    pub ts: u64,
    /// Base64 ciphertext
    pub ct: String,
    /// Base64 signature
    pub sig: String,
    /// Fingerprint of the signing certificate
    pub signer: String,
}

impl TranscriptEntry {
    /// Build an entry for a chat message signed by `signer`.
    pub fn from_message(message: &ChatMessage, signer: &str) -> Self {
        Self {
            seqno: message.seqno,
            ts: message.ts,
            ct: message.ct.clone(),
            sig: message.sig.clone(),
            signer: signer.to_string(),
        }
    }

    /// Ledger line without trailing newline.
    pub fn to_line(&self) -> String {
        format!("{}|{}|{}|{}|{}", self.seqno, self.ts, self.ct, self.sig, self.signer)
    }

    /// Parse a ledger line. `line_no` is only used in errors.
    pub fn parse_line(line: &str, line_no: usize) -> Result<Self, TranscriptError> {
        let malformed = |reason: &str| TranscriptError::Malformed { line: line_no, reason: reason.to_string() };

        let fields: Vec<&str> = line.split('|').collect();
        let [seqno, ts, ct, sig, signer] = fields.as_slice() else {
            return Err(malformed("expected 5 fields"));
        };

        Ok(Self {
            seqno: seqno.parse().map_err(|_| malformed("invalid seqno"))?,
            ts: ts.parse().map_err(|_| malformed("invalid timestamp"))?,
            ct: (*ct).to_string(),
            sig: (*sig).to_string(),
            signer: (*signer).to_string(),
        })
    }
}

/// Durable destination for transcript lines.
///
/// # Invariants
///
/// - Post: when `append_line` returns `Ok`, the line is durable to the
///   extent the sink promises (file sink: flushed and `sync_data`ed).
pub trait TranscriptSink: Send + 'static {
    /// Persist one line (without newline).
    fn append_line(&mut self, line: &str) -> Result<(), TranscriptError>;
}

/// Append-only file sink.
///
/// The file is created on first append, so sessions that never reach the
/// data plane leave nothing behind.
#[derive(Debug)]
pub struct FileSink {
    path: PathBuf,
    file: Option<File>,
}

impl FileSink {
    /// Sink writing to `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), file: None }
    }

    /// Ledger file path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TranscriptSink for FileSink {
    fn append_line(&mut self, line: &str) -> Result<(), TranscriptError> {
        if self.file.is_none() {
            if let Some(parent) = self.path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            self.file = Some(OpenOptions::new().create(true).append(true).open(&self.path)?);
        }
        let Some(file) = self.file.as_mut() else {
            return Err(TranscriptError::Io("transcript file not open".to_string()));
        };

        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;
        file.flush()?;
        file.sync_data()?;
        Ok(())
    }
}

/// In-memory sink. Clones share the same buffer.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    lines: Arc<Mutex<Vec<String>>>,
}

impl MemorySink {
    /// Empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of persisted lines.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned. Acceptable for test code.
    #[allow(clippy::expect_used)]
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().expect("Mutex poisoned").clone()
    }
}

impl TranscriptSink for MemorySink {
    fn append_line(&mut self, line: &str) -> Result<(), TranscriptError> {
        self.lines
            .lock()
            .map_err(|_| TranscriptError::Io("sink mutex poisoned".to_string()))?
            .push(line.to_string());
        Ok(())
    }
}

/// Where one session's artifacts live.
///
/// All three share the stem `<role>_<unix_ms>_<tag_hex>` inside the
/// transcript directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionFiles {
    /// Ledger (`.txt`)
    pub transcript: PathBuf,
    /// Our receipt (`.receipt.json`)
    pub receipt: PathBuf,
    /// Peer receipt (`.peer-receipt.json`)
    pub peer_receipt: PathBuf,
}

impl SessionFiles {
    /// Paths for a session started at `now_ms`. `tag` keeps concurrent
    /// sessions started in the same millisecond apart.
    pub fn new(dir: &Path, role: Peer, now_ms: u64, tag: [u8; 4]) -> Self {
        let stem = format!("{role}_{now_ms}_{}", hex::encode(tag));
        Self {
            transcript: dir.join(format!("{stem}.txt")),
            receipt: dir.join(format!("{stem}.receipt.json")),
            peer_receipt: dir.join(format!("{stem}.peer-receipt.json")),
        }
    }
}

/// Ordered transcript backed by a sink.
#[derive(Debug)]
pub struct Transcript<S> {
    sink: S,
    entries: Vec<TranscriptEntry>,
    lines: Vec<String>,
}

impl<S: TranscriptSink> Transcript<S> {
    /// Empty transcript writing through `sink`.
    pub fn new(sink: S) -> Self {
        Self { sink, entries: Vec::new(), lines: Vec::new() }
    }

    /// Persist `entry`, then record it.
    ///
    /// # Errors
    ///
    /// - `TranscriptError::Io` if the sink fails; the entry is not recorded
    pub fn append(&mut self, entry: TranscriptEntry) -> Result<(), TranscriptError> {
        let line = entry.to_line();
        self.sink.append_line(&line)?;

        self.lines.push(line);
        self.entries.push(entry);
        Ok(())
    }

    /// The sink.
    pub fn sink(&self) -> &S {
        &self.sink
    }
}

impl<S> Transcript<S> {
    /// `SHA256(join("\n", lines))`.
    pub fn digest(&self) -> [u8; DIGEST_SIZE] {
        sha256(self.lines.join("\n").as_bytes())
    }

    /// Lowercase hex of [`Transcript::digest`].
    pub fn digest_hex(&self) -> String {
        hex::encode(self.digest())
    }

    /// Sequence number of the first entry.
    pub fn first_seq(&self) -> Option<u64> {
        self.entries.first().map(|e| e.seqno)
    }

    /// Sequence number of the last entry.
    pub fn last_seq(&self) -> Option<u64> {
        self.entries.last().map(|e| e.seqno)
    }

    /// Entries in append order.
    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if nothing has been appended.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Transcript<MemorySink> {
    /// Read a ledger file back into memory for offline verification.
    ///
    /// Blank lines are skipped. The loaded transcript writes further appends
    /// to a fresh [`MemorySink`], never to the file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, TranscriptError> {
        let reader = BufReader::new(File::open(path)?);
        let mut transcript = Self::new(MemorySink::new());

        for (index, line) in reader.lines().enumerate() {
            let line = line?;
            let line = line.trim_end_matches('\r');
            if line.is_empty() {
                continue;
            }
            transcript.append(TranscriptEntry::parse_line(line, index + 1)?)?;
        }

        Ok(transcript)
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn entry(seqno: u64) -> TranscriptEntry {
        TranscriptEntry {
            seqno,
            ts: 1_700_000_000_000 + seqno,
            ct: "Y3Q=".to_string(),
            sig: "c2ln".to_string(),
            signer: "ab".repeat(32),
        }
    }

    #[test]
    fn empty_transcript_digest() {
        let transcript = Transcript::new(MemorySink::new());
        assert_eq!(
            transcript.digest_hex(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(transcript.first_seq(), None);
        assert_eq!(transcript.last_seq(), None);
    }

    #[test]
    fn line_format() {
        let line = entry(1).to_line();
        assert_eq!(line, format!("1|1700000000001|Y3Q=|c2ln|{}", "ab".repeat(32)));
        assert_eq!(TranscriptEntry::parse_line(&line, 1).unwrap(), entry(1));
    }

    #[test]
    fn digest_joins_lines_with_newline() {
        let mut transcript = Transcript::new(MemorySink::new());
        transcript.append(entry(1)).unwrap();
        transcript.append(entry(2)).unwrap();

        let expected = sha256(format!("{}\n{}", entry(1).to_line(), entry(2).to_line()).as_bytes());
        assert_eq!(transcript.digest(), expected);
        assert_eq!(transcript.first_seq(), Some(1));
        assert_eq!(transcript.last_seq(), Some(2));
    }

    #[test]
    fn sink_sees_every_line() {
        let sink = MemorySink::new();
        let mut transcript = Transcript::new(sink.clone());
        transcript.append(entry(1)).unwrap();

        assert_eq!(sink.lines(), vec![entry(1).to_line()]);
    }

    #[test]
    fn malformed_lines_rejected() {
        assert!(TranscriptEntry::parse_line("1|2|3", 4).is_err());
        assert!(TranscriptEntry::parse_line("x|2|ct|sig|fp", 1).is_err());
        assert!(TranscriptEntry::parse_line("1|2|ct|sig|fp|extra", 1).is_err());
    }

    #[test]
    fn file_sink_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("client.txt");

        let mut transcript = Transcript::new(FileSink::new(&path));
        assert!(!path.exists());

        transcript.append(entry(1)).unwrap();
        transcript.append(entry(2)).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents, format!("{}\n{}\n", entry(1).to_line(), entry(2).to_line()));

        let loaded = Transcript::load(&path).unwrap();
        assert_eq!(loaded.entries(), transcript.entries());
        assert_eq!(loaded.digest(), transcript.digest());
    }

    #[test]
    fn session_file_names_share_a_stem() {
        let files = SessionFiles::new(Path::new("/tmp/t"), Peer::Client, 1_700_000_000_000, [0xde, 0xad, 0xbe, 0xef]);

        assert_eq!(files.transcript, Path::new("/tmp/t/client_1700000000000_deadbeef.txt"));
        assert_eq!(files.receipt, Path::new("/tmp/t/client_1700000000000_deadbeef.receipt.json"));
        assert_eq!(files.peer_receipt, Path::new("/tmp/t/client_1700000000000_deadbeef.peer-receipt.json"));
    }

    struct FailingSink;

    impl TranscriptSink for FailingSink {
        fn append_line(&mut self, _line: &str) -> Result<(), TranscriptError> {
            Err(TranscriptError::Io("disk full".to_string()))
        }
    }

    #[test]
    fn failed_persist_is_not_recorded() {
        let mut transcript = Transcript::new(FailingSink);
        assert!(transcript.append(entry(1)).is_err());
        assert!(transcript.is_empty());
    }

    proptest! {
        #[test]
        fn digest_is_idempotent_and_append_sensitive(count in 0u64..20) {
            let mut transcript = Transcript::new(MemorySink::new());
            for seqno in 1..=count {
                transcript.append(entry(seqno)).unwrap();
            }

            let before = transcript.digest();
            prop_assert_eq!(before, transcript.digest());

            transcript.append(entry(count + 1)).unwrap();
            prop_assert_ne!(before, transcript.digest());
        }
    }
}
