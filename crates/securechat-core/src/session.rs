//! Session state machine.
//!
//! Action-based, Sans-IO: callers feed frame payloads and local intents in,
//! the session returns [`SessionAction`]s for the driver to execute. No
//! sockets, no clocks, no OS randomness (those come from the
//! [`Environment`]).
//!
//! # State Machine
//!
//! ```text
//! ┌──────┐ start  ┌──────────────┐ hello/server_hello ┌─────────────────┐
//! │ Init │───────>│ ControlPlane │───────────────────>│ TempKeyExchange │
//! └──────┘        └──────────────┘                    └─────────────────┘
//!                                                              │ dh_client/dh_server
//!                                                              v
//! ┌──────────────┐ dh_client/dh_server ┌──────────────┐  ┌────────────────┐
//! │  DataPlane   │<────────────────────│ KeyAgreement │<─│ Authentication │
//! └──────────────┘                     └──────────────┘  └────────────────┘
//!        │ quit / receipt / finish()            status "success"
//!        v
//! ┌────────────────┐ both receipts ┌────────┐
//! │ NonRepudiation │──────────────>│ Closed │
//! └────────────────┘               └────────┘
//! ```
//!
//! Any fatal error moves the session to `Closed` from any state. There are no
//! backward transitions and no retries.
//!
//! # Roles
//!
//! The client speaks first (`hello`) and initiates both DH exchanges. The
//! server validates, answers, consults the credential store through
//! [`SessionAction::Authenticate`], and acknowledges every accepted chat
//! message.

use std::{sync::Arc, time::Duration};

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use bytes::Bytes;
use securechat_crypto::{
    DhParams, EphemeralKeyPair, SharedKey, message_signing_input, sign, symmetric,
};
use securechat_proto::{
    AuthRequest, ChatMessage, DhClient, DhServer, Hello, Message, Peer, ProtocolError, ServerHello,
    SessionReceipt, Status, StatusKind,
};
use zeroize::Zeroizing;

use crate::{
    credentials::CredentialError,
    env::Environment,
    error::{RejectReason, SessionError},
    identity::{self, Certificate, ChainVerification, LocalIdentity},
    receipt,
    transcript::{Transcript, TranscriptEntry, TranscriptSink},
};

/// Default freshness window for chat timestamps (5 minutes).
pub const DEFAULT_FRESHNESS_WINDOW_MS: u64 = 300_000;

/// Default handshake timeout (30 seconds).
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

/// Default wait for the peer receipt after ours is sent (10 seconds).
pub const DEFAULT_RECEIPT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default data plane poll interval (1 second).
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Common Name clients expect on the server certificate by default.
pub const DEFAULT_SERVER_NAME: &str = "server.local";

/// Nonce size for `hello`, `server_hello` and `login`.
pub const NONCE_SIZE: usize = 32;

/// Session phases, strictly ordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SessionState {
    /// Created, nothing exchanged
    Init,
    /// Certificate exchange in progress
    ControlPlane,
    /// First DH exchange (temporary key) in progress
    TempKeyExchange,
    /// Encrypted credential request in flight
    Authentication,
    /// Second DH exchange (session key) in progress
    KeyAgreement,
    /// Chat messages flowing
    DataPlane,
    /// Our receipt sent, waiting for the peer's
    NonRepudiation,
    /// Terminal
    Closed,
}

/// Session tunables.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Issuer signature policy for peer certificates
    pub chain_verification: ChainVerification,
    /// Required peer Common Name, if any
    pub expected_peer_name: Option<String>,
    /// Maximum `|now - ts|` for inbound chat messages
    pub freshness_window_ms: u64,
    /// Deadline for reaching the data plane
    pub handshake_timeout: Duration,
    /// Wait for the peer receipt once ours is sent
    pub receipt_timeout: Duration,
    /// Data plane wake-up interval when idle
    pub poll_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            chain_verification: ChainVerification::Strict,
            expected_peer_name: None,
            freshness_window_ms: DEFAULT_FRESHNESS_WINDOW_MS,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            receipt_timeout: DEFAULT_RECEIPT_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

/// What the client asks for in the Authentication phase.
///
/// Passwords are zeroized when the value is dropped, which happens as soon
/// as the credential request has been encrypted.
#[derive(Clone)]
pub enum Credentials {
    /// Create an account
    Register {
        /// Account email
        email: String,
        /// Requested username
        username: String,
        /// Password
        password: Zeroizing<String>,
    },
    /// Sign in to an existing account
    Login {
        /// Account email
        email: String,
        /// Password
        password: Zeroizing<String>,
    },
}

impl Credentials {
    /// Registration request.
    pub fn register(email: impl Into<String>, username: impl Into<String>, password: impl Into<String>) -> Self {
        Self::Register {
            email: email.into(),
            username: username.into(),
            password: Zeroizing::new(password.into()),
        }
    }

    /// Login request.
    pub fn login(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self::Login { email: email.into(), password: Zeroizing::new(password.into()) }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Register { email, username, .. } => f
                .debug_struct("Register")
                .field("email", email)
                .field("username", username)
                .finish_non_exhaustive(),
            Self::Login { email, .. } => {
                f.debug_struct("Login").field("email", email).finish_non_exhaustive()
            },
        }
    }
}

/// Actions for the driver to execute, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionAction {
    /// Write a JSON message frame
    Send(Message),
    /// Write a raw frame (the base64 credential blob)
    SendRaw(Bytes),
    /// Server: check the request against the credential store, then call
    /// [`Session::complete_authentication`]
    Authenticate(AuthRequest),
    /// Handshake finished; the data plane is open
    Established {
        /// Authenticated account
        username: String,
    },
    /// Verified, decrypted inbound chat message
    Deliver {
        /// Sender sequence number
        seqno: u64,
        /// Plaintext
        plaintext: String,
    },
    /// Server acknowledged one of our messages
    Acknowledged {
        /// Acknowledged sequence number
        seqno: u64,
    },
    /// Inbound chat message rejected; the peer has been told
    Rejected {
        /// Claimed sequence number
        seqno: u64,
        /// First failing check
        reason: RejectReason,
    },
    /// Peer rejected one of our messages
    PeerError {
        /// Peer's error text (`CODE: detail`)
        message: String,
    },
    /// Our receipt, already queued for sending
    ReceiptIssued(SessionReceipt),
    /// Peer receipt arrived
    PeerReceipt {
        /// The receipt
        receipt: SessionReceipt,
        /// Signature verified under the peer certificate
        verified: bool,
        /// Digest equals our own transcript digest
        matches_local: bool,
    },
    /// Close the connection
    Close {
        /// Log-friendly reason
        reason: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AuthKind {
    Register,
    Login,
}

/// One protocol session with one peer.
///
/// # Invariants
///
/// - `state` only moves forward.
/// - The temporary key exists only between the first DH exchange and the
///   authentication verdict.
/// - `next_send_seq` and `expected_seq` start at 1 and only grow.
/// - Every sent or accepted chat message is in the transcript before any
///   action referring to it is returned.
pub struct Session<E, S> {
    env: E,
    role: Peer,
    config: SessionConfig,
    identity: Arc<LocalIdentity>,
    trust_anchor: Arc<Certificate>,
    state: SessionState,

    local_nonce: [u8; NONCE_SIZE],
    peer_nonce: Option<Vec<u8>>,
    peer: Option<Certificate>,

    credentials: Option<Credentials>,
    pending_auth: Option<AuthKind>,
    requested_username: Option<String>,
    username: Option<String>,

    pending_dh: Option<EphemeralKeyPair>,
    temp_key: Option<SharedKey>,
    session_key: Option<SharedKey>,

    next_send_seq: u64,
    expected_seq: u64,
    transcript: Transcript<S>,

    local_finished: bool,
    our_receipt: Option<SessionReceipt>,
    peer_receipt: Option<SessionReceipt>,
}

impl<E: Environment, S: TranscriptSink> Session<E, S> {
    /// Client session that will authenticate with `credentials`.
    pub fn client(
        env: E,
        config: SessionConfig,
        identity: Arc<LocalIdentity>,
        trust_anchor: Arc<Certificate>,
        credentials: Credentials,
        sink: S,
    ) -> Self {
        let mut session = Self::new(env, Peer::Client, config, identity, trust_anchor, sink);
        session.credentials = Some(credentials);
        session
    }

    /// Server session for one accepted connection.
    pub fn server(
        env: E,
        config: SessionConfig,
        identity: Arc<LocalIdentity>,
        trust_anchor: Arc<Certificate>,
        sink: S,
    ) -> Self {
        Self::new(env, Peer::Server, config, identity, trust_anchor, sink)
    }

    fn new(
        env: E,
        role: Peer,
        config: SessionConfig,
        identity: Arc<LocalIdentity>,
        trust_anchor: Arc<Certificate>,
        sink: S,
    ) -> Self {
        let local_nonce = env.random_array();
        Self {
            env,
            role,
            config,
            identity,
            trust_anchor,
            state: SessionState::Init,
            local_nonce,
            peer_nonce: None,
            peer: None,
            credentials: None,
            pending_auth: None,
            requested_username: None,
            username: None,
            pending_dh: None,
            temp_key: None,
            session_key: None,
            next_send_seq: 1,
            expected_seq: 1,
            transcript: Transcript::new(sink),
            local_finished: false,
            our_receipt: None,
            peer_receipt: None,
        }
    }

    /// Begin the handshake.
    ///
    /// Client: sends `hello`. Server: starts waiting for one.
    pub fn start(&mut self) -> Result<Vec<SessionAction>, SessionError> {
        self.require(SessionState::Init)?;
        self.state = SessionState::ControlPlane;

        match self.role {
            Peer::Client => {
                tracing::debug!(role = %self.role, "sending hello");
                Ok(vec![SessionAction::Send(Message::Hello(Hello {
                    client_cert: self.identity.certificate().pem().to_string(),
                    nonce: BASE64.encode(self.local_nonce),
                }))])
            },
            Peer::Server => Ok(Vec::new()),
        }
    }

    /// Process one inbound frame payload.
    ///
    /// # Errors
    ///
    /// Any error is fatal: the session is `Closed` when this returns `Err`.
    /// Use [`SessionError::notify_peer`] to decide whether to report it.
    pub fn handle_payload(&mut self, payload: &[u8]) -> Result<Vec<SessionAction>, SessionError> {
        if self.state == SessionState::Closed {
            return Err(SessionError::Closed);
        }

        let result = if self.role == Peer::Server && self.state == SessionState::Authentication {
            self.handle_auth_blob(payload)
        } else {
            Message::decode(payload).map_err(SessionError::from).and_then(|m| self.handle_message(m))
        };

        result.map_err(|err| self.fail(err))
    }

    fn handle_message(&mut self, message: Message) -> Result<Vec<SessionAction>, SessionError> {
        use SessionState::{Authentication, ControlPlane, DataPlane, KeyAgreement, NonRepudiation, TempKeyExchange};

        match (self.role, self.state, message) {
            (Peer::Server, ControlPlane, Message::Hello(hello)) => self.handle_hello(hello),
            (Peer::Client, ControlPlane, Message::ServerHello(hello)) => self.handle_server_hello(hello),

            (Peer::Server, TempKeyExchange | KeyAgreement, Message::DhClient(dh)) => {
                self.handle_dh_client(dh)
            },
            (Peer::Client, TempKeyExchange | KeyAgreement, Message::DhServer(dh)) => {
                self.handle_dh_server(&dh)
            },

            (Peer::Client, Authentication, Message::Status(status)) => self.handle_auth_status(status),

            (_, DataPlane, Message::Chat(chat)) => self.handle_chat(chat),
            (_, NonRepudiation, Message::Chat(chat)) => {
                tracing::debug!(role = %self.role, seqno = chat.seqno, "dropping chat after local finish");
                Ok(Vec::new())
            },
            (_, DataPlane | NonRepudiation, Message::Status(status)) => Ok(self.handle_status(status)),
            (_, DataPlane | NonRepudiation, Message::Quit) => self.handle_quit(),
            (_, DataPlane | NonRepudiation, Message::Receipt(receipt)) => self.handle_receipt(receipt),

            (_, state, Message::Status(status)) if status.status == StatusKind::Error => {
                tracing::warn!(role = %self.role, ?state, message = ?status.message, "peer aborted handshake");
                Err(SessionError::Peer(status.message.unwrap_or_default()))
            },
            (_, state, message) => {
                Err(SessionError::UnexpectedMessage { state, message: message.kind() })
            },
        }
    }

    fn handle_hello(&mut self, hello: Hello) -> Result<Vec<SessionAction>, SessionError> {
        let cert = self.validate_peer(&hello.client_cert)?;
        self.peer_nonce = Some(decode_nonce(&hello.nonce)?);

        tracing::info!(
            role = %self.role,
            peer = cert.common_name().unwrap_or("<none>"),
            fingerprint = %cert.fingerprint(),
            "client certificate accepted"
        );
        self.peer = Some(cert);
        self.state = SessionState::TempKeyExchange;

        Ok(vec![SessionAction::Send(Message::ServerHello(ServerHello {
            server_cert: self.identity.certificate().pem().to_string(),
            nonce: BASE64.encode(self.local_nonce),
        }))])
    }

    fn handle_server_hello(&mut self, hello: ServerHello) -> Result<Vec<SessionAction>, SessionError> {
        let cert = self.validate_peer(&hello.server_cert)?;
        self.peer_nonce = Some(decode_nonce(&hello.nonce)?);

        tracing::info!(
            role = %self.role,
            peer = cert.common_name().unwrap_or("<none>"),
            fingerprint = %cert.fingerprint(),
            "server certificate accepted"
        );
        self.peer = Some(cert);
        self.state = SessionState::TempKeyExchange;

        Ok(vec![self.start_key_exchange()])
    }

    fn validate_peer(&self, pem: &str) -> Result<Certificate, SessionError> {
        let cert = Certificate::from_pem(pem)?;
        identity::validate(
            &cert,
            &self.trust_anchor,
            self.config.expected_peer_name.as_deref(),
            self.env.wall_clock_secs(),
            self.config.chain_verification,
        )?;
        Ok(cert)
    }

    /// Initiator half of a DH exchange. Fresh key pair every call.
    fn start_key_exchange(&mut self) -> SessionAction {
        let params = DhParams::modp_3072();
        let pair = EphemeralKeyPair::generate(params, self.env.random_array());

        let message = Message::DhClient(DhClient {
            g: pair.params().g.clone(),
            p: pair.params().p.clone(),
            a: pair.public().clone(),
        });
        self.pending_dh = Some(pair);

        SessionAction::Send(message)
    }

    /// Responder half of a DH exchange.
    fn respond_key_exchange(&mut self, dh: DhClient) -> Result<(SharedKey, SessionAction), SessionError> {
        let params = DhParams { p: dh.p, g: dh.g };
        params.validate()?;
        params.validate_public(&dh.a)?;

        let pair = EphemeralKeyPair::generate(params, self.env.random_array());
        let reply = Message::DhServer(DhServer { b: pair.public().clone() });
        let key = pair.derive_shared_key(&dh.a)?;

        Ok((key, SessionAction::Send(reply)))
    }

    fn handle_dh_client(&mut self, dh: DhClient) -> Result<Vec<SessionAction>, SessionError> {
        let (key, reply) = self.respond_key_exchange(dh)?;

        if self.state == SessionState::TempKeyExchange {
            self.temp_key = Some(key);
            self.state = SessionState::Authentication;
            tracing::debug!(role = %self.role, "temporary key established");
            return Ok(vec![reply]);
        }

        self.session_key = Some(key);
        self.state = SessionState::DataPlane;
        let username = self.username.clone().unwrap_or_default();
        tracing::info!(role = %self.role, username = %username, "session key established");

        Ok(vec![reply, SessionAction::Established { username }])
    }

    fn handle_dh_server(&mut self, dh: &DhServer) -> Result<Vec<SessionAction>, SessionError> {
        let pair = self.pending_dh.take().ok_or(SessionError::UnexpectedMessage {
            state: self.state,
            message: "dh_server",
        })?;
        let key = pair.derive_shared_key(&dh.b)?;

        if self.state == SessionState::TempKeyExchange {
            let blob = self.seal_credentials(&key)?;
            self.state = SessionState::Authentication;
            tracing::debug!(role = %self.role, "credential request sent");
            return Ok(vec![SessionAction::SendRaw(blob)]);
        }

        self.session_key = Some(key);
        self.state = SessionState::DataPlane;
        let username = self.username.clone().unwrap_or_default();
        tracing::info!(role = %self.role, username = %username, "session key established");

        Ok(vec![SessionAction::Established { username }])
    }

    /// Encrypt the credential request under the temporary key. The key and
    /// the credentials are dropped when this returns.
    fn seal_credentials(&mut self, key: &SharedKey) -> Result<Bytes, SessionError> {
        let credentials = self.credentials.take().ok_or(SessionError::InvalidState {
            expected: SessionState::TempKeyExchange,
            actual: self.state,
        })?;

        let request = match credentials {
            Credentials::Register { email, username, password } => {
                self.pending_auth = Some(AuthKind::Register);
                self.requested_username = Some(username.clone());
                AuthRequest::Register { email, username, pwd: password.to_string() }
            },
            Credentials::Login { email, password } => {
                self.pending_auth = Some(AuthKind::Login);
                let nonce: [u8; NONCE_SIZE] = self.env.random_array();
                AuthRequest::Login { email, pwd: password.to_string(), nonce: BASE64.encode(nonce) }
            },
        };

        let plaintext = Zeroizing::new(request.to_json()?);
        let ciphertext = symmetric::encrypt(key.as_bytes(), &plaintext)?;

        Ok(Bytes::from(BASE64.encode(ciphertext)))
    }

    fn handle_auth_blob(&mut self, payload: &[u8]) -> Result<Vec<SessionAction>, SessionError> {
        if self.pending_auth.is_some() {
            return Err(SessionError::UnexpectedMessage { state: self.state, message: "credentials" });
        }

        let key = self.temp_key.as_ref().ok_or(SessionError::InvalidState {
            expected: SessionState::Authentication,
            actual: self.state,
        })?;

        let text = std::str::from_utf8(payload)
            .map_err(|_| SessionError::AuthenticationFailed("credential blob is not text".to_string()))?;
        let ciphertext = BASE64
            .decode(text.trim())
            .map_err(|_| SessionError::AuthenticationFailed("credential blob is not base64".to_string()))?;
        let plaintext = Zeroizing::new(symmetric::decrypt(key.as_bytes(), &ciphertext)?);
        let request = AuthRequest::from_json(&plaintext)?;

        self.pending_auth = Some(match request {
            AuthRequest::Register { .. } => AuthKind::Register,
            AuthRequest::Login { .. } => AuthKind::Login,
        });
        tracing::debug!(role = %self.role, email = %request.email(), "credential request received");

        Ok(vec![SessionAction::Authenticate(request)])
    }

    /// Server: report the credential store verdict for the pending request.
    ///
    /// Success moves to `KeyAgreement`. Failure sends the error status and
    /// closes. The temporary key is discarded either way.
    pub fn complete_authentication(
        &mut self,
        outcome: Result<String, CredentialError>,
    ) -> Result<Vec<SessionAction>, SessionError> {
        if self.role != Peer::Server || self.state != SessionState::Authentication {
            return Err(SessionError::InvalidState {
                expected: SessionState::Authentication,
                actual: self.state,
            });
        }
        let Some(kind) = self.pending_auth else {
            return Err(SessionError::InvalidState {
                expected: SessionState::Authentication,
                actual: self.state,
            });
        };

        self.temp_key = None;

        match outcome {
            Ok(username) => {
                let status = match kind {
                    AuthKind::Register => Status::success("Registration successful"),
                    AuthKind::Login => Status::success("Login successful").with_username(&username),
                };
                tracing::info!(role = %self.role, username = %username, ?kind, "authentication succeeded");

                self.username = Some(username);
                self.state = SessionState::KeyAgreement;
                Ok(vec![SessionAction::Send(status.into())])
            },
            Err(err) => {
                tracing::warn!(role = %self.role, error = %err, ?kind, "authentication failed");

                self.close_internal();
                Ok(vec![
                    SessionAction::Send(Status::error(err.to_string()).into()),
                    SessionAction::Close { reason: format!("authentication failed: {err}") },
                ])
            },
        }
    }

    fn handle_auth_status(&mut self, status: Status) -> Result<Vec<SessionAction>, SessionError> {
        match status.status {
            StatusKind::Success => {
                let username = status
                    .username
                    .or_else(|| self.requested_username.take())
                    .unwrap_or_default();
                tracing::info!(
                    role = %self.role,
                    username = %username,
                    message = status.message.as_deref().unwrap_or(""),
                    "authenticated"
                );

                self.username = Some(username);
                self.state = SessionState::KeyAgreement;
                Ok(vec![self.start_key_exchange()])
            },
            StatusKind::Error | StatusKind::Ack => {
                Err(SessionError::AuthenticationFailed(status.message.unwrap_or_default()))
            },
        }
    }

    /// Encrypt and sign `plaintext` as message `seqno` stamped `ts`.
    ///
    /// Pure: touches neither counters nor the transcript. [`Session::send_chat`]
    /// is the normal way to send.
    pub fn seal_chat(&self, seqno: u64, ts: u64, plaintext: &str) -> Result<ChatMessage, SessionError> {
        let key = self.session_key.as_ref().ok_or(SessionError::InvalidState {
            expected: SessionState::DataPlane,
            actual: self.state,
        })?;

        let ct = symmetric::encrypt(key.as_bytes(), plaintext.as_bytes())?;
        let sig = sign::sign(self.identity.private_key(), &message_signing_input(seqno, ts, &ct))?;

        Ok(ChatMessage { seqno, ts, ct: BASE64.encode(ct), sig: BASE64.encode(sig) })
    }

    /// Send a chat message with the next sequence number.
    ///
    /// The message is in the transcript before the send action is returned.
    pub fn send_chat(&mut self, plaintext: &str) -> Result<Vec<SessionAction>, SessionError> {
        if self.state != SessionState::DataPlane || self.local_finished {
            return Err(SessionError::InvalidState {
                expected: SessionState::DataPlane,
                actual: self.state,
            });
        }

        let seqno = self.next_send_seq;
        let message = self.seal_chat(seqno, self.env.wall_clock_ms(), plaintext)?;

        let signer = self.identity.certificate().fingerprint().to_string();
        self.transcript
            .append(TranscriptEntry::from_message(&message, &signer))
            .map_err(|err| self.fail(err.into()))?;
        self.next_send_seq += 1;

        tracing::debug!(role = %self.role, seqno, "chat message sent");
        Ok(vec![SessionAction::Send(Message::Chat(message))])
    }

    fn handle_chat(&mut self, chat: ChatMessage) -> Result<Vec<SessionAction>, SessionError> {
        let seqno = chat.seqno;

        let plaintext = match self.check_chat(&chat) {
            Ok(plaintext) => plaintext,
            Err(reason) => {
                tracing::warn!(role = %self.role, seqno, code = reason.code(), "chat message rejected");
                return Ok(vec![
                    SessionAction::Send(Status::error(reason.to_string()).into()),
                    SessionAction::Rejected { seqno, reason },
                ]);
            },
        };

        let signer = self.peer.as_ref().map(|c| c.fingerprint().to_string()).unwrap_or_default();
        self.transcript.append(TranscriptEntry::from_message(&chat, &signer))?;
        self.expected_seq += 1;

        tracing::debug!(role = %self.role, seqno, "chat message accepted");

        let mut actions = vec![SessionAction::Deliver { seqno, plaintext }];
        if self.role == Peer::Server {
            actions.push(SessionAction::Send(Status::ack(seqno).into()));
        }
        Ok(actions)
    }

    /// Sequence, freshness, signature, decryption. First failure wins.
    fn check_chat(&self, chat: &ChatMessage) -> Result<String, RejectReason> {
        let expected = self.expected_seq;
        if chat.seqno < expected {
            return Err(RejectReason::Replay { expected, got: chat.seqno });
        }
        if chat.seqno > expected {
            return Err(RejectReason::OutOfOrder { expected, got: chat.seqno });
        }

        let skew_ms = self.env.wall_clock_ms().abs_diff(chat.ts);
        if skew_ms > self.config.freshness_window_ms {
            return Err(RejectReason::Stale { skew_ms });
        }

        let peer = self.peer.as_ref().ok_or(RejectReason::SignatureInvalid)?;
        let ct = BASE64.decode(&chat.ct).map_err(|_| RejectReason::SignatureInvalid)?;
        let sig = BASE64.decode(&chat.sig).map_err(|_| RejectReason::SignatureInvalid)?;
        sign::verify(peer.public_key(), &message_signing_input(chat.seqno, chat.ts, &ct), &sig)
            .map_err(|_| RejectReason::SignatureInvalid)?;

        let key = self.session_key.as_ref().ok_or(RejectReason::Undecryptable)?;
        let plaintext =
            symmetric::decrypt(key.as_bytes(), &ct).map_err(|_| RejectReason::Undecryptable)?;
        String::from_utf8(plaintext).map_err(|_| RejectReason::Undecryptable)
    }

    fn handle_status(&mut self, status: Status) -> Vec<SessionAction> {
        match status.status {
            StatusKind::Ack => match status.seqno {
                Some(seqno) => vec![SessionAction::Acknowledged { seqno }],
                None => Vec::new(),
            },
            StatusKind::Error => {
                let message = status.message.unwrap_or_default();
                tracing::warn!(role = %self.role, message = %message, "peer rejected message");
                vec![SessionAction::PeerError { message }]
            },
            StatusKind::Success => Vec::new(),
        }
    }

    fn handle_quit(&mut self) -> Result<Vec<SessionAction>, SessionError> {
        tracing::info!(role = %self.role, "peer quit");
        if self.local_finished { Ok(Vec::new()) } else { self.finish_internal(false) }
    }

    fn handle_receipt(&mut self, receipt: SessionReceipt) -> Result<Vec<SessionAction>, SessionError> {
        let verified = self.peer.as_ref().is_some_and(|peer| receipt::verify(&receipt, peer.public_key()));
        let matches_local = receipt.transcript_sha256.eq_ignore_ascii_case(&self.transcript.digest_hex());

        if verified {
            tracing::info!(role = %self.role, matches_local, "peer receipt verified");
        } else {
            tracing::warn!(role = %self.role, "peer receipt signature invalid");
        }

        self.peer_receipt = Some(receipt.clone());
        let mut actions = vec![SessionAction::PeerReceipt { receipt, verified, matches_local }];

        if !self.local_finished {
            actions.extend(self.finish_internal(false)?);
        }
        if self.state != SessionState::Closed {
            self.close_internal();
            actions.push(SessionAction::Close { reason: "session complete".to_string() });
        }
        Ok(actions)
    }

    /// End our side of the data plane.
    ///
    /// The client sends `quit` first. Both sides then issue and send their
    /// receipt. Idempotent once the data plane is left.
    pub fn finish(&mut self) -> Result<Vec<SessionAction>, SessionError> {
        match self.state {
            SessionState::DataPlane if !self.local_finished => {
                self.finish_internal(self.role == Peer::Client)
            },
            SessionState::DataPlane | SessionState::NonRepudiation | SessionState::Closed => Ok(Vec::new()),
            actual => Err(SessionError::InvalidState { expected: SessionState::DataPlane, actual }),
        }
    }

    fn finish_internal(&mut self, send_quit: bool) -> Result<Vec<SessionAction>, SessionError> {
        let mut actions = Vec::new();
        if send_quit {
            actions.push(SessionAction::Send(Message::Quit));
        }

        let receipt = receipt::issue(&self.transcript, self.identity.private_key(), self.role)?;
        tracing::info!(
            role = %self.role,
            first_seq = receipt.first_seq,
            last_seq = receipt.last_seq,
            digest = %receipt.transcript_sha256,
            "receipt issued"
        );

        self.local_finished = true;
        self.state = SessionState::NonRepudiation;
        self.our_receipt = Some(receipt.clone());

        actions.push(SessionAction::Send(Message::Receipt(receipt.clone())));
        actions.push(SessionAction::ReceiptIssued(receipt));

        if self.peer_receipt.is_some() {
            self.close_internal();
            actions.push(SessionAction::Close { reason: "session complete".to_string() });
        }
        Ok(actions)
    }

    /// Close immediately (transport gone, timeout, local abort).
    pub fn close(&mut self, reason: impl Into<String>) -> Vec<SessionAction> {
        if self.state == SessionState::Closed {
            return Vec::new();
        }
        self.close_internal();
        vec![SessionAction::Close { reason: reason.into() }]
    }

    fn close_internal(&mut self) {
        self.state = SessionState::Closed;
        self.pending_dh = None;
        self.temp_key = None;
        self.session_key = None;
        self.credentials = None;
    }

    fn fail(&mut self, err: SessionError) -> SessionError {
        tracing::debug!(role = %self.role, state = ?self.state, error = %err, "session failed");
        self.close_internal();
        err
    }

    fn require(&self, expected: SessionState) -> Result<(), SessionError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(SessionError::InvalidState { expected, actual: self.state })
        }
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Our role.
    pub fn role(&self) -> Peer {
        self.role
    }

    /// Session tunables.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Authenticated username, once known.
    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    /// Validated peer certificate.
    pub fn peer_certificate(&self) -> Option<&Certificate> {
        self.peer.as_ref()
    }

    /// Peer nonce from the hello exchange (recorded, not bound into keys).
    pub fn peer_nonce(&self) -> Option<&[u8]> {
        self.peer_nonce.as_deref()
    }

    /// Transcript so far.
    pub fn transcript(&self) -> &Transcript<S> {
        &self.transcript
    }

    /// Sequence number the next inbound message must carry.
    pub fn expected_seq(&self) -> u64 {
        self.expected_seq
    }

    /// Sequence number our next message will carry.
    pub fn next_send_seq(&self) -> u64 {
        self.next_send_seq
    }

    /// Our receipt, once issued.
    pub fn our_receipt(&self) -> Option<&SessionReceipt> {
        self.our_receipt.as_ref()
    }

    /// Peer receipt, once received.
    pub fn peer_receipt(&self) -> Option<&SessionReceipt> {
        self.peer_receipt.as_ref()
    }

    /// True while the temporary (credential) key is held.
    pub fn has_temporary_key(&self) -> bool {
        self.temp_key.is_some()
    }

    /// True once the session key is established (and not yet discarded).
    pub fn has_session_key(&self) -> bool {
        self.session_key.is_some()
    }

    /// True in the terminal state.
    pub fn is_closed(&self) -> bool {
        self.state == SessionState::Closed
    }
}

/// Hello nonces must be base64 of exactly [`NONCE_SIZE`] bytes.
fn decode_nonce(text: &str) -> Result<Vec<u8>, SessionError> {
    let nonce = BASE64
        .decode(text.trim())
        .map_err(|e| ProtocolError::Malformed(format!("invalid nonce encoding: {e}")))?;
    if nonce.len() != NONCE_SIZE {
        return Err(ProtocolError::Malformed(format!(
            "nonce is {} bytes, expected {NONCE_SIZE}",
            nonce.len()
        ))
        .into());
    }
    Ok(nonce)
}

impl<E, S> std::fmt::Debug for Session<E, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("role", &self.role)
            .field("state", &self.state)
            .field("username", &self.username)
            .field("next_send_seq", &self.next_send_seq)
            .field("expected_seq", &self.expected_seq)
            .finish_non_exhaustive()
    }
}
