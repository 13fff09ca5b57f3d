//! Async driver for a [`Session`].
//!
//! The driver owns the framed stream and the session, executes
//! [`SessionAction`]s and forwards what the application cares about as
//! [`SessionEvent`]s. One driver per connection; a single task does all the
//! reading, writing and state mutation, so no locking is involved.
//!
//! ```text
//!   Command ──mpsc──> ┌────────┐ ──frames──> peer
//!                     │ Driver │
//!   SessionEvent <─── └────────┘ <─frames─── peer
//! ```

use std::collections::VecDeque;

use securechat_proto::{AuthRequest, Frame, Message, SessionReceipt, Status};
use thiserror::Error;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    sync::mpsc,
    time::Instant,
};

use crate::{
    channel::{FrameReader, FrameWriter, TransportError},
    credentials::{CredentialError, CredentialStore},
    env::Environment,
    error::{RejectReason, SessionError},
    session::{Session, SessionAction, SessionState},
    transcript::TranscriptSink,
};

/// Driver failures. All of them end the connection.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Stream failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Session hit a fatal error.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// Data plane not reached within the handshake timeout.
    #[error("handshake timed out")]
    HandshakeTimeout,

    /// Session closed before the operation completed.
    #[error("session closed: {0}")]
    Closed(String),
}

/// Local intents fed to [`Driver::run`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Send a chat message
    Chat(String),
    /// End the session (quit + receipt exchange)
    Quit,
}

/// What the application hears about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Data plane open
    Established {
        /// Authenticated account
        username: String,
    },
    /// Verified inbound chat message
    Message {
        /// Sender sequence number
        seqno: u64,
        /// Plaintext
        plaintext: String,
    },
    /// Our message acknowledged by the server
    Acknowledged {
        /// Sequence number
        seqno: u64,
    },
    /// Inbound message rejected
    Rejected {
        /// Claimed sequence number
        seqno: u64,
        /// Reason sent to the peer
        reason: RejectReason,
    },
    /// Peer rejected one of ours
    PeerError {
        /// `CODE: detail`
        message: String,
    },
    /// Our receipt was sent
    ReceiptIssued(SessionReceipt),
    /// Peer receipt received
    PeerReceipt {
        /// The receipt
        receipt: SessionReceipt,
        /// Signature valid under the peer certificate
        verified: bool,
        /// Digest equals ours
        matches_local: bool,
    },
    /// Connection closed
    Closed {
        /// Why
        reason: String,
    },
}

type Authenticate<'a> = &'a (dyn Fn(&AuthRequest) -> Result<String, CredentialError> + Sync);

/// Drives one session over one byte stream.
pub struct Driver<E, S, R, W> {
    session: Session<E, S>,
    reader: FrameReader<R>,
    writer: FrameWriter<W>,
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl<E, S, R, W> Driver<E, S, R, W>
where
    E: Environment,
    S: TranscriptSink,
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    /// Wrap a fresh session and the two stream halves.
    ///
    /// Events are dropped silently once the receiver is gone.
    pub fn new(
        session: Session<E, S>,
        reader: R,
        writer: W,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Self {
        Self {
            session,
            reader: FrameReader::new(reader),
            writer: FrameWriter::new(writer),
            events,
        }
    }

    /// Client handshake. Returns the authenticated username.
    pub async fn client_handshake(&mut self) -> Result<String, RuntimeError> {
        self.handshake(None).await
    }

    /// Server handshake, consulting `store` for the credential request.
    /// Returns the authenticated username.
    pub async fn server_handshake<C: CredentialStore>(&mut self, store: &C) -> Result<String, RuntimeError> {
        let authenticate = |request: &AuthRequest| store.process(request);
        self.handshake(Some(&authenticate)).await
    }

    async fn handshake(&mut self, authenticate: Option<Authenticate<'_>>) -> Result<String, RuntimeError> {
        let timeout = self.session.config().handshake_timeout;

        match tokio::time::timeout(timeout, self.handshake_inner(authenticate)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(role = %self.session.role(), state = ?self.session.state(), "handshake timed out");
                let actions = self.session.close("handshake timeout");
                self.execute(actions, None).await?;
                Err(RuntimeError::HandshakeTimeout)
            },
        }
    }

    async fn handshake_inner(&mut self, authenticate: Option<Authenticate<'_>>) -> Result<String, RuntimeError> {
        let actions = self.session.start()?;
        self.execute(actions, authenticate).await?;

        loop {
            match self.session.state() {
                SessionState::DataPlane => {
                    return Ok(self.session.username().unwrap_or_default().to_string());
                },
                SessionState::Closed => {
                    return Err(RuntimeError::Closed("closed during handshake".to_string()));
                },
                _ => {},
            }

            let frame = match self.reader.read_frame().await {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    let actions = self.session.close("peer disconnected");
                    self.execute(actions, None).await?;
                    return Err(RuntimeError::Closed("peer disconnected during handshake".to_string()));
                },
                Err(err) => return Err(self.transport_failed(err).await),
            };
            self.handle_frame(&frame, authenticate).await?;
        }
    }

    /// Run the data plane until the session closes.
    ///
    /// Waits on inbound frames, `commands` and a poll tick. Dropping the
    /// command sender counts as [`Command::Quit`]. Once our receipt is out,
    /// the peer's must arrive within the receipt timeout.
    pub async fn run(&mut self, mut commands: mpsc::Receiver<Command>) -> Result<(), RuntimeError> {
        let config = self.session.config().clone();
        let mut ticker = tokio::time::interval(config.poll_interval);
        let mut commands_open = true;
        let mut receipt_deadline: Option<Instant> = None;

        loop {
            match self.session.state() {
                SessionState::Closed => return Ok(()),
                SessionState::NonRepudiation if receipt_deadline.is_none() => {
                    receipt_deadline = Some(Instant::now() + config.receipt_timeout);
                },
                _ => {},
            }

            tokio::select! {
                frame = self.reader.read_frame() => match frame {
                    Ok(Some(frame)) => self.handle_frame(&frame, None).await?,
                    Err(err) => return Err(self.transport_failed(err).await),
                    Ok(None) => {
                        tracing::info!(role = %self.session.role(), "peer disconnected");
                        let actions = self.session.close("peer disconnected");
                        self.execute(actions, None).await?;
                    },
                },
                command = commands.recv(), if commands_open => match command {
                    Some(Command::Chat(text)) => self.send_chat(&text).await?,
                    Some(Command::Quit) | None => {
                        commands_open = command.is_some();
                        let actions = self.session.finish()?;
                        self.execute(actions, None).await?;
                    },
                },
                _ = ticker.tick() => {
                    if receipt_deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                        tracing::warn!(role = %self.session.role(), "peer receipt not received");
                        let actions = self.session.close("timed out waiting for peer receipt");
                        self.execute(actions, None).await?;
                    }
                },
            }
        }
    }

    async fn send_chat(&mut self, text: &str) -> Result<(), RuntimeError> {
        match self.session.send_chat(text) {
            Ok(actions) => self.execute(actions, None).await,
            Err(SessionError::InvalidState { actual, .. }) => {
                tracing::warn!(role = %self.session.role(), state = ?actual, "chat dropped: data plane not open");
                Ok(())
            },
            Err(err) => Err(err.into()),
        }
    }

    /// Close the session after a read failure; the stream is unusable.
    async fn transport_failed(&mut self, err: TransportError) -> RuntimeError {
        tracing::warn!(role = %self.session.role(), error = %err, "transport failed");
        let actions = self.session.close(err.to_string());
        if let Err(close_err) = self.execute(actions, None).await {
            tracing::debug!(error = %close_err, "close after transport failure");
        }
        err.into()
    }

    async fn handle_frame(&mut self, frame: &Frame, authenticate: Option<Authenticate<'_>>) -> Result<(), RuntimeError> {
        match self.session.handle_payload(&frame.payload) {
            Ok(actions) => self.execute(actions, authenticate).await,
            Err(err) => {
                tracing::warn!(role = %self.session.role(), error = %err, "session failed");
                if err.notify_peer() {
                    let status = Message::from(Status::error(err.to_string()));
                    if let Err(send_err) = self.writer.write_message(&status).await {
                        tracing::debug!(error = %send_err, "could not report error to peer");
                    }
                }
                self.emit(SessionEvent::Closed { reason: err.to_string() });
                Err(err.into())
            },
        }
    }

    async fn execute(
        &mut self,
        actions: Vec<SessionAction>,
        authenticate: Option<Authenticate<'_>>,
    ) -> Result<(), RuntimeError> {
        let mut queue = VecDeque::from(actions);

        while let Some(action) = queue.pop_front() {
            match action {
                SessionAction::Send(message) => self.writer.write_message(&message).await?,
                SessionAction::SendRaw(payload) => self.writer.write_frame(&Frame::new(payload)).await?,
                SessionAction::Authenticate(request) => {
                    let outcome = match authenticate {
                        Some(authenticate) => authenticate(&request),
                        None => Err(CredentialError::Store("no credential store".to_string())),
                    };
                    queue.extend(self.session.complete_authentication(outcome)?);
                },
                SessionAction::Established { username } => {
                    self.emit(SessionEvent::Established { username });
                },
                SessionAction::Deliver { seqno, plaintext } => {
                    self.emit(SessionEvent::Message { seqno, plaintext });
                },
                SessionAction::Acknowledged { seqno } => self.emit(SessionEvent::Acknowledged { seqno }),
                SessionAction::Rejected { seqno, reason } => {
                    self.emit(SessionEvent::Rejected { seqno, reason });
                },
                SessionAction::PeerError { message } => self.emit(SessionEvent::PeerError { message }),
                SessionAction::ReceiptIssued(receipt) => self.emit(SessionEvent::ReceiptIssued(receipt)),
                SessionAction::PeerReceipt { receipt, verified, matches_local } => {
                    self.emit(SessionEvent::PeerReceipt { receipt, verified, matches_local });
                },
                SessionAction::Close { reason } => {
                    tracing::info!(role = %self.session.role(), reason = %reason, "closing connection");
                    if let Err(err) = self.writer.shutdown().await {
                        tracing::debug!(error = %err, "shutdown failed");
                    }
                    self.emit(SessionEvent::Closed { reason });
                },
            }
        }

        Ok(())
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    /// The session.
    pub fn session(&self) -> &Session<E, S> {
        &self.session
    }

    /// Consume the driver, keeping the session (receipts, transcript).
    pub fn into_session(self) -> Session<E, S> {
        self.session
    }
}
