//! SecureChat server.
//!
//! Production "glue" around [`securechat_core`]'s Sans-IO [`Session`]: a
//! Tokio TCP accept loop, one task per connection, each with its own session,
//! transcript file and receipts. The only state shared between connections
//! is the credential store.
//!
//! # Components
//!
//! - [`Server`]: listener plus shared context, spawns connection tasks
//! - [`storage`]: memory and redb [`CredentialStore`]s
//! - [`ServerRuntimeConfig`]: paths, bind address and session tunables

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod error;
pub mod storage;

use std::{
    net::SocketAddr,
    path::{Path, PathBuf},
    sync::Arc,
};

pub use error::ServerError;
use securechat_core::{
    Certificate, CredentialStore, Driver, Environment, FileSink, LocalIdentity, Session,
    SessionConfig, SessionEvent, SessionFiles, TranscriptSink, receipt,
};
use securechat_proto::Peer;
pub use storage::{MemoryCredentialStore, RedbCredentialStore};
use tokio::{
    net::{TcpListener, TcpStream},
    sync::mpsc,
};

/// Server configuration for the production runtime.
#[derive(Debug, Clone)]
pub struct ServerRuntimeConfig {
    /// Address to bind to (e.g., "127.0.0.1:8888")
    pub bind_address: String,
    /// Trust anchor (PEM)
    pub ca_cert_path: PathBuf,
    /// Server certificate (PEM)
    pub cert_path: PathBuf,
    /// Server private key (PEM, PKCS#8 or PKCS#1)
    pub key_path: PathBuf,
    /// Directory for transcripts and receipts
    pub transcript_dir: PathBuf,
    /// Per-session tunables
    pub session: SessionConfig,
}

impl Default for ServerRuntimeConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:8888".to_string(),
            ca_cert_path: PathBuf::from("certs/ca.crt"),
            cert_path: PathBuf::from("certs/server.crt"),
            key_path: PathBuf::from("certs/server.key"),
            transcript_dir: PathBuf::from("transcripts"),
            session: SessionConfig::default(),
        }
    }
}

/// Everything a connection task needs, shared read-only.
struct Context<E, C> {
    env: E,
    store: C,
    identity: Arc<LocalIdentity>,
    anchor: Arc<Certificate>,
    transcript_dir: PathBuf,
    session: SessionConfig,
}

/// Production SecureChat server.
pub struct Server<E, C> {
    listener: TcpListener,
    context: Arc<Context<E, C>>,
}

impl<E: Environment, C: CredentialStore> Server<E, C> {
    /// Load the identity and trust anchor, then bind the listener.
    pub async fn bind(config: ServerRuntimeConfig, env: E, store: C) -> Result<Self, ServerError> {
        let identity = LocalIdentity::load(&config.cert_path, &config.key_path)?;
        let anchor = Certificate::load(&config.ca_cert_path)?;

        let listener = TcpListener::bind(&config.bind_address).await.map_err(|e| {
            ServerError::Transport(format!("failed to bind '{}': {e}", config.bind_address))
        })?;

        tracing::info!(
            subject = identity.certificate().common_name().unwrap_or("<none>"),
            fingerprint = %identity.certificate().fingerprint(),
            "server identity loaded"
        );

        Ok(Self {
            listener,
            context: Arc::new(Context {
                env,
                store,
                identity: Arc::new(identity),
                anchor: Arc::new(anchor),
                transcript_dir: config.transcript_dir,
                session: config.session,
            }),
        })
    }

    /// Local address the server is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        self.listener
            .local_addr()
            .map_err(|e| ServerError::Transport(format!("failed to get local address: {e}")))
    }

    /// Accept connections until the task is cancelled.
    pub async fn run(self) -> Result<(), ServerError> {
        loop {
            match self.listener.accept().await {
                Ok((stream, peer)) => {
                    let context = Arc::clone(&self.context);

                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, peer, &*context).await {
                            tracing::error!(%peer, "Connection error: {}", e);
                        }
                    });
                },
                Err(e) => {
                    tracing::error!("Accept error: {}", e);
                },
            }
        }
    }
}

/// Serve one client from `hello` to receipts.
async fn handle_connection<E: Environment, C: CredentialStore>(
    stream: TcpStream,
    peer: SocketAddr,
    context: &Context<E, C>,
) -> Result<(), ServerError> {
    tracing::info!(%peer, "connection accepted");

    let files = SessionFiles::new(
        &context.transcript_dir,
        Peer::Server,
        context.env.wall_clock_ms(),
        context.env.random_array(),
    );
    let session = Session::server(
        context.env.clone(),
        context.session.clone(),
        Arc::clone(&context.identity),
        Arc::clone(&context.anchor),
        FileSink::new(&files.transcript),
    );

    let (reader, writer) = stream.into_split();
    let (events_tx, mut events) = mpsc::unbounded_channel();
    let mut driver = Driver::new(session, reader, writer, events_tx);

    let username = driver.server_handshake(&context.store).await?;
    tracing::info!(%peer, username = %username, "session established");

    // The server never quits on its own; the sender stays alive until the
    // client ends the session.
    let (_commands, commands_rx) = mpsc::channel(1);
    let result = driver.run(commands_rx).await;

    while let Ok(event) = events.try_recv() {
        log_event(peer, &username, &event);
    }

    let session = driver.into_session();
    persist_receipts(&session, &files)?;

    tracing::info!(
        %peer,
        messages = session.transcript().len(),
        digest = %session.transcript().digest_hex(),
        "session ended"
    );
    result.map_err(ServerError::from)
}

fn log_event(peer: SocketAddr, username: &str, event: &SessionEvent) {
    match event {
        SessionEvent::Message { seqno, plaintext } => {
            tracing::info!(%peer, username, seqno, "message received");
            tracing::debug!(%peer, username, seqno, text = %plaintext, "message text");
        },
        SessionEvent::Rejected { seqno, reason } => {
            tracing::warn!(%peer, username, seqno, reason = %reason, "message rejected");
        },
        SessionEvent::PeerReceipt { verified, matches_local, .. } => {
            tracing::info!(%peer, username, verified, matches_local, "client receipt received");
        },
        SessionEvent::Closed { reason } => tracing::debug!(%peer, reason = %reason, "closed"),
        _ => {},
    }
}

fn persist_receipts<E: Environment, S: TranscriptSink>(
    session: &Session<E, S>,
    files: &SessionFiles,
) -> Result<(), ServerError> {
    if let Some(receipt) = session.our_receipt() {
        ensure_dir(&files.receipt)?;
        receipt::save(receipt, &files.receipt)?;
    }
    if let Some(receipt) = session.peer_receipt() {
        ensure_dir(&files.peer_receipt)?;
        receipt::save(receipt, &files.peer_receipt)?;
    }
    Ok(())
}

fn ensure_dir(path: &Path) -> Result<(), ServerError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    Ok(())
}
