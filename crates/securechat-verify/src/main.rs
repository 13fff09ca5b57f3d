//! SecureChat offline verifier.
//!
//! # Usage
//!
//! ```bash
//! # Newest client ledger, sequence and digest only
//! securechat-verify
//!
//! # Full audit against the server's receipt
//! securechat-verify --transcript transcripts/client_1718000000000_1a2b3c4d.txt \
//!     --receipt transcripts/client_1718000000000_1a2b3c4d.peer-receipt.json \
//!     --cert certs/server.crt --cert certs/client.crt \
//!     --verify-messages --test-modification
//! ```
//!
//! Exits 0 when every requested check passes, 1 otherwise.

use std::{io::Write, path::PathBuf, process::ExitCode};

use clap::Parser;
use securechat_verify::{VerifyOptions, verify};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Verify a SecureChat transcript and session receipt
#[derive(Parser, Debug)]
#[command(name = "securechat-verify")]
#[command(about = "Verify a SecureChat transcript and session receipt")]
#[command(version)]
struct Args {
    /// Transcript ledger (default: newest client_*.txt in the transcript directory)
    #[arg(long)]
    transcript: Option<PathBuf>,

    /// Directory searched when no transcript is given
    #[arg(long, env = "TRANSCRIPT_DIR", default_value = "transcripts")]
    transcript_dir: PathBuf,

    /// Session receipt (JSON)
    #[arg(long)]
    receipt: Option<PathBuf>,

    /// Certificate (PEM) of the receipt issuer or a message signer; repeatable
    #[arg(long = "cert")]
    certificates: Vec<PathBuf>,

    /// Verify every message signature
    #[arg(long)]
    verify_messages: bool,

    /// Confirm that editing the ledger changes its digest
    #[arg(long)]
    test_modification: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    log_level: String,
}

fn main() -> ExitCode {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let options = VerifyOptions {
        transcript: args.transcript,
        transcript_dir: args.transcript_dir,
        receipt: args.receipt,
        certificates: args.certificates,
        verify_messages: args.verify_messages,
        test_modification: args.test_modification,
    };

    match verify(&options) {
        Ok(verification) => {
            let _ = std::io::stdout().write_all(verification.render().as_bytes());
            if verification.passed() { ExitCode::SUCCESS } else { ExitCode::FAILURE }
        },
        Err(e) => {
            tracing::error!("Verification failed: {}", e);
            let _ = writeln!(std::io::stderr(), "Error: {e}");
            ExitCode::FAILURE
        },
    }
}
