//! SecureChat server binary.
//!
//! # Usage
//!
//! ```bash
//! # Accounts kept in memory (lost on restart)
//! securechat-server --ca-cert certs/ca.crt --cert certs/server.crt --key certs/server.key
//!
//! # Durable accounts
//! securechat-server --credential-db securechat.redb
//! ```
//!
//! Every flag also reads an environment variable (`SERVER_HOST`,
//! `SERVER_PORT`, `CA_CERT_PATH`, ...).

use std::path::PathBuf;

use clap::Parser;
use securechat_core::{ChainVerification, SessionConfig, SystemEnv};
use securechat_server::{MemoryCredentialStore, RedbCredentialStore, Server, ServerRuntimeConfig};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// SecureChat protocol server
#[derive(Parser, Debug)]
#[command(name = "securechat-server")]
#[command(about = "SecureChat protocol server")]
#[command(version)]
struct Args {
    /// Host to bind to
    #[arg(long, env = "SERVER_HOST", default_value = "127.0.0.1")]
    host: String,

    /// Port to bind to
    #[arg(short, long, env = "SERVER_PORT", default_value_t = 8888)]
    port: u16,

    /// Trust anchor certificate (PEM)
    #[arg(long, env = "CA_CERT_PATH", default_value = "certs/ca.crt")]
    ca_cert: PathBuf,

    /// Server certificate (PEM)
    #[arg(short, long, env = "SERVER_CERT_PATH", default_value = "certs/server.crt")]
    cert: PathBuf,

    /// Server private key (PEM)
    #[arg(short, long, env = "SERVER_KEY_PATH", default_value = "certs/server.key")]
    key: PathBuf,

    /// Directory for transcripts and receipts
    #[arg(long, env = "TRANSCRIPT_DIR", default_value = "transcripts")]
    transcript_dir: PathBuf,

    /// Redb database for accounts; in-memory when absent
    #[arg(long, env = "CREDENTIAL_DB")]
    credential_db: Option<PathBuf>,

    /// Require client certificates to carry this Common Name
    #[arg(long, env = "CLIENT_CN")]
    client_cn: Option<String>,

    /// Log certificate signature failures instead of rejecting
    #[arg(long)]
    lenient_chain: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    tracing::info!("SecureChat server starting");

    let chain_verification = if args.lenient_chain {
        tracing::warn!("Certificate signature checks are advisory (--lenient-chain)");
        tracing::warn!("This is NOT suitable for production use!");
        ChainVerification::Lenient
    } else {
        ChainVerification::Strict
    };

    let config = ServerRuntimeConfig {
        bind_address: format!("{}:{}", args.host, args.port),
        ca_cert_path: args.ca_cert,
        cert_path: args.cert,
        key_path: args.key,
        transcript_dir: args.transcript_dir,
        session: SessionConfig {
            chain_verification,
            expected_peer_name: args.client_cn,
            ..Default::default()
        },
    };

    tracing::info!("Binding to {}", config.bind_address);
    tracing::info!("Transcripts in {}", config.transcript_dir.display());

    let env = SystemEnv::new();
    match args.credential_db {
        Some(path) => {
            tracing::info!("Accounts stored in {}", path.display());
            let store = RedbCredentialStore::open(&path, env.clone())?;
            let server = Server::bind(config, env, store).await?;
            tracing::info!("Server listening on {}", server.local_addr()?);
            server.run().await?;
        },
        None => {
            tracing::warn!("No credential database given - accounts are kept in memory");
            let store = MemoryCredentialStore::new(env.clone());
            let server = Server::bind(config, env, store).await?;
            tracing::info!("Server listening on {}", server.local_addr()?);
            server.run().await?;
        },
    }

    Ok(())
}
