use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use securechat_core::{
    Certificate, Command, Credentials, Driver, Environment, FileSink, LocalIdentity, Session,
    SessionConfig, SessionEvent, SessionFiles, TranscriptError, receipt,
    session::DEFAULT_SERVER_NAME,
};
use securechat_proto::{Peer, SessionReceipt};
use tokio::{
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    sync::mpsc,
};

use crate::ClientError;

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server address (`host:port`)
    pub server_address: String,
    /// Trust anchor (PEM)
    pub ca_cert_path: PathBuf,
    /// Client certificate (PEM)
    pub cert_path: PathBuf,
    /// Client private key (PEM)
    pub key_path: PathBuf,
    /// Directory for the transcript and receipts
    pub transcript_dir: PathBuf,
    /// Per-session tunables; `expected_peer_name` is the server CN
    pub session: SessionConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_address: "127.0.0.1:8888".to_string(),
            ca_cert_path: PathBuf::from("certs/ca.crt"),
            cert_path: PathBuf::from("certs/client.crt"),
            key_path: PathBuf::from("certs/client.key"),
            transcript_dir: PathBuf::from("transcripts"),
            session: SessionConfig {
                expected_peer_name: Some(DEFAULT_SERVER_NAME.to_string()),
                ..SessionConfig::default()
            },
        }
    }
}

/// Client with its identity loaded, ready to open sessions.
pub struct Client<E> {
    config: ClientConfig,
    env: E,
    identity: Arc<LocalIdentity>,
    anchor: Arc<Certificate>,
}

impl<E: Environment> Client<E> {
    /// Load our certificate, key and the trust anchor.
    pub fn new(config: ClientConfig, env: E) -> Result<Self, ClientError> {
        let identity = LocalIdentity::load(&config.cert_path, &config.key_path)?;
        let anchor = Certificate::load(&config.ca_cert_path)?;

        tracing::debug!(
            subject = identity.certificate().common_name().unwrap_or("<none>"),
            fingerprint = %identity.certificate().fingerprint(),
            "client identity loaded"
        );

        Ok(Self { config, env, identity: Arc::new(identity), anchor: Arc::new(anchor) })
    }

    /// Build from an already loaded identity.
    pub fn with_identity(
        config: ClientConfig,
        env: E,
        identity: Arc<LocalIdentity>,
        anchor: Arc<Certificate>,
    ) -> Self {
        Self { config, env, identity, anchor }
    }

    /// Configuration in use.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Connect and run the handshake through authentication and key
    /// agreement.
    ///
    /// Returns the open connection and the event stream; the
    /// [`SessionEvent::Established`] event is already queued.
    pub async fn connect(
        &self,
        credentials: Credentials,
    ) -> Result<(Connection<E>, mpsc::UnboundedReceiver<SessionEvent>), ClientError> {
        let address = &self.config.server_address;
        let stream = TcpStream::connect(address)
            .await
            .map_err(|source| ClientError::Connect { address: address.clone(), source })?;
        tracing::info!(server = %address, "connected");

        let files = SessionFiles::new(
            &self.config.transcript_dir,
            Peer::Client,
            self.env.wall_clock_ms(),
            self.env.random_array(),
        );
        let session = Session::client(
            self.env.clone(),
            self.config.session.clone(),
            Arc::clone(&self.identity),
            Arc::clone(&self.anchor),
            credentials,
            FileSink::new(&files.transcript),
        );

        let (reader, writer) = stream.into_split();
        let (events_tx, events) = mpsc::unbounded_channel();
        let mut driver = Driver::new(session, reader, writer, events_tx);

        let username = driver.client_handshake().await?;
        tracing::info!(username = %username, "session established");

        Ok((Connection { driver, files, username }, events))
    }
}

/// An established session.
pub struct Connection<E> {
    driver: Driver<E, FileSink, OwnedReadHalf, OwnedWriteHalf>,
    files: SessionFiles,
    username: String,
}

/// What a finished session left behind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    /// Authenticated username
    pub username: String,
    /// Number of transcript lines
    pub messages: usize,
    /// Final transcript digest (hex)
    pub digest: String,
    /// Transcript file, present once a message was recorded
    pub transcript: Option<PathBuf>,
    /// Our receipt file
    pub receipt: Option<PathBuf>,
    /// Server receipt file
    pub peer_receipt: Option<PathBuf>,
}

impl<E: Environment> Connection<E> {
    /// Authenticated username.
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Where this session's files go.
    pub fn files(&self) -> &SessionFiles {
        &self.files
    }

    /// Run the chat until the session closes, then persist receipts.
    ///
    /// Dropping every `commands` sender ends the session like
    /// [`Command::Quit`].
    pub async fn run(mut self, commands: mpsc::Receiver<Command>) -> Result<SessionSummary, ClientError> {
        let result = self.driver.run(commands).await;

        let session = self.driver.into_session();
        let transcript_path = self.files.transcript.clone();

        let receipt_path = session.our_receipt().map(|r| save(r, &self.files.receipt)).transpose()?;
        let peer_receipt_path =
            session.peer_receipt().map(|r| save(r, &self.files.peer_receipt)).transpose()?;
        result?;

        let summary = SessionSummary {
            username: self.username,
            messages: session.transcript().len(),
            digest: session.transcript().digest_hex(),
            transcript: transcript_path.exists().then_some(transcript_path),
            receipt: receipt_path,
            peer_receipt: peer_receipt_path,
        };
        tracing::info!(messages = summary.messages, digest = %summary.digest, "session finished");
        Ok(summary)
    }
}

fn save(receipt: &SessionReceipt, path: &Path) -> Result<PathBuf, ClientError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(TranscriptError::from)?;
    }
    receipt::save(receipt, path)?;
    Ok(path.to_path_buf())
}
