//! SecureChat client binary.
//!
//! # Usage
//!
//! ```bash
//! securechat-client --host 127.0.0.1 --port 8888 \
//!     --ca-cert certs/ca.crt --cert certs/client.crt --key certs/client.key
//! ```
//!
//! Every flag also reads an environment variable (`SERVER_HOST`,
//! `CLIENT_CERT_PATH`, ...). Logs go to stderr so they do not interleave
//! with the chat.

use std::path::PathBuf;

use clap::Parser;
use securechat_client::{Client, ClientConfig, ClientError, SessionSummary, prompt};
use securechat_core::{ChainVerification, SessionConfig, SystemEnv};
use tokio::{
    io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader},
    sync::mpsc,
};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// SecureChat interactive client
#[derive(Parser, Debug)]
#[command(name = "securechat-client")]
#[command(about = "SecureChat interactive client")]
#[command(version)]
struct Args {
    /// Server host
    #[arg(long, env = "SERVER_HOST", default_value = "127.0.0.1")]
    host: String,

    /// Server port
    #[arg(short, long, env = "SERVER_PORT", default_value_t = 8888)]
    port: u16,

    /// Expected server certificate Common Name
    #[arg(long, env = "SERVER_CN", default_value = "server.local")]
    server_cn: String,

    /// Trust anchor certificate (PEM)
    #[arg(long, env = "CA_CERT_PATH", default_value = "certs/ca.crt")]
    ca_cert: PathBuf,

    /// Client certificate (PEM)
    #[arg(short, long, env = "CLIENT_CERT_PATH", default_value = "certs/client.crt")]
    cert: PathBuf,

    /// Client private key (PEM)
    #[arg(short, long, env = "CLIENT_KEY_PATH", default_value = "certs/client.key")]
    key: PathBuf,

    /// Directory for the transcript and receipts
    #[arg(long, env = "TRANSCRIPT_DIR", default_value = "transcripts")]
    transcript_dir: PathBuf,

    /// Log certificate signature failures instead of rejecting
    #[arg(long)]
    lenient_chain: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    log_level: String,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let code = match run(args).await {
        Ok(()) => 0,
        Err(e) => {
            tracing::error!("{e}");
            let _ = tokio::io::stderr().write_all(format!("Error: {e}\n").as_bytes()).await;
            1
        },
    };

    // The stdin reader thread cannot be cancelled; exiting here keeps the
    // runtime from waiting on it.
    std::process::exit(code);
}

async fn run(args: Args) -> Result<(), ClientError> {
    let config = ClientConfig {
        server_address: format!("{}:{}", args.host, args.port),
        ca_cert_path: args.ca_cert,
        cert_path: args.cert,
        key_path: args.key,
        transcript_dir: args.transcript_dir,
        session: SessionConfig {
            expected_peer_name: Some(args.server_cn),
            chain_verification: if args.lenient_chain {
                ChainVerification::Lenient
            } else {
                ChainVerification::Strict
            },
            ..SessionConfig::default()
        },
    };

    let client = Client::new(config, SystemEnv::new())?;
    let mut stdout = tokio::io::stdout();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    let credentials = prompt::credentials(&mut lines, &mut stdout).await?;
    let (connection, mut events) = client.connect(credentials).await?;

    let (commands, commands_rx) = mpsc::channel(32);
    tokio::spawn(async move {
        while let Ok(Some(line)) = lines.next_line().await {
            let Some(command) = prompt::parse_line(&line) else {
                continue;
            };
            if commands.send(command).await.is_err() {
                break;
            }
        }
        // EOF drops the sender, which ends the session.
    });

    let printer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(event) = events.recv().await {
            if let Some(text) = prompt::render(&event) {
                if stdout.write_all(format!("{text}\n").as_bytes()).await.is_err() {
                    break;
                }
                let _ = stdout.flush().await;
            }
        }
    });

    let summary = connection.run(commands_rx).await?;
    let _ = printer.await;

    report(&mut stdout, &summary).await?;
    Ok(())
}

async fn report<W: AsyncWrite + Unpin>(out: &mut W, summary: &SessionSummary) -> Result<(), ClientError> {
    let mut text = format!(
        "\n=== Session Summary ===\nUser: {}\nMessages: {}\nTranscript SHA-256: {}\n",
        summary.username, summary.messages, summary.digest
    );
    for (label, path) in [
        ("Transcript", &summary.transcript),
        ("Receipt", &summary.receipt),
        ("Server receipt", &summary.peer_receipt),
    ] {
        if let Some(path) = path {
            text.push_str(&format!("{label}: {}\n", path.display()));
        }
    }

    out.write_all(text.as_bytes()).await?;
    out.flush().await?;
    Ok(())
}
