//! Fuzz target for ledger line parsing
//!
//! The offline verifier reads ledgers that may have been edited by hand.
//! Parsing must return an error, never panic, and a parsed entry must
//! print back to the same line.

#![no_main]

use libfuzzer_sys::fuzz_target;
use securechat_core::TranscriptEntry;

fuzz_target!(|data: &[u8]| {
    let Ok(line) = std::str::from_utf8(data) else {
        return;
    };

    if let Ok(entry) = TranscriptEntry::parse_line(line, 1) {
        let printed = entry.to_line();
        let reparsed = TranscriptEntry::parse_line(&printed, 1).expect("printed line must parse");
        assert_eq!(reparsed, entry);
    }
});
