//! In-memory session pairs.
//!
//! Connects a client and a server [`Session`] without sockets: every `Send`
//! action is encoded to a frame payload and handed to the other side, every
//! `Authenticate` is answered from a credential store. Everything else is
//! recorded per side for assertions.

use std::collections::VecDeque;

use bytes::Bytes;
use securechat_core::{
    CredentialStore, Credentials, MemorySink, Session, SessionAction, SessionConfig, SessionError,
    session::DEFAULT_SERVER_NAME,
};
use securechat_proto::Peer;

use crate::{env::TestEnv, pki::pki};

/// In-memory session with the fixture identities.
pub type TestSession = Session<TestEnv, MemorySink>;

/// Client session with `CN=client.local`, expecting `server.local`.
pub fn client_session(env: &TestEnv, credentials: Credentials) -> TestSession {
    let config = SessionConfig {
        expected_peer_name: Some(DEFAULT_SERVER_NAME.to_string()),
        ..SessionConfig::default()
    };
    Session::client(
        env.clone(),
        config,
        pki().client.identity(),
        pki().anchor(),
        credentials,
        MemorySink::new(),
    )
}

/// Server session with `CN=server.local`.
pub fn server_session(env: &TestEnv) -> TestSession {
    Session::server(
        env.clone(),
        SessionConfig::default(),
        pki().server.identity(),
        pki().anchor(),
        MemorySink::new(),
    )
}

/// Non-transport actions observed on each side.
#[derive(Debug, Default)]
pub struct Exchange {
    /// Actions emitted by the client
    pub client: Vec<SessionAction>,
    /// Actions emitted by the server
    pub server: Vec<SessionAction>,
    /// Every payload that crossed the wire, in order, tagged by sender
    pub wire: Vec<(Peer, Bytes)>,
}

impl Exchange {
    fn record(&mut self, origin: Peer, action: SessionAction) {
        match origin {
            Peer::Client => self.client.push(action),
            Peer::Server => self.server.push(action),
        }
    }

    fn merge(&mut self, other: Exchange) {
        self.client.extend(other.client);
        self.server.extend(other.server);
        self.wire.extend(other.wire);
    }
}

/// A session failed while pumping.
#[derive(Debug)]
pub struct PumpError {
    /// Side whose session returned the error
    pub side: Peer,
    /// The error
    pub error: SessionError,
    /// What happened before the failure
    pub exchange: Exchange,
}

/// Deliver `actions` emitted by `origin` until both sides are quiet.
pub fn pump<S: CredentialStore>(
    client: &mut TestSession,
    server: &mut TestSession,
    store: &S,
    origin: Peer,
    actions: Vec<SessionAction>,
) -> Result<Exchange, PumpError> {
    let mut exchange = Exchange::default();
    let mut queue: VecDeque<(Peer, SessionAction)> =
        actions.into_iter().map(|a| (origin, a)).collect();

    while let Some((from, action)) = queue.pop_front() {
        let payload = match action {
            SessionAction::Send(message) => match message.encode() {
                Ok(bytes) => Bytes::from(bytes),
                Err(err) => {
                    return Err(PumpError { side: from, error: err.into(), exchange });
                },
            },
            SessionAction::SendRaw(bytes) => bytes,
            SessionAction::Authenticate(request) => {
                match server.complete_authentication(store.process(&request)) {
                    Ok(more) => queue.extend(more.into_iter().map(|a| (Peer::Server, a))),
                    Err(error) => return Err(PumpError { side: Peer::Server, error, exchange }),
                }
                continue;
            },
            other => {
                exchange.record(from, other);
                continue;
            },
        };

        exchange.wire.push((from, payload.clone()));

        let to = from.other();
        let receiver = match to {
            Peer::Client => &mut *client,
            Peer::Server => &mut *server,
        };
        if receiver.is_closed() {
            continue;
        }
        match receiver.handle_payload(&payload) {
            Ok(more) => queue.extend(more.into_iter().map(|a| (to, a))),
            Err(error) => return Err(PumpError { side: to, error, exchange }),
        }
    }

    Ok(exchange)
}

/// Start both sessions and run the handshake to completion.
pub fn handshake<S: CredentialStore>(
    client: &mut TestSession,
    server: &mut TestSession,
    store: &S,
) -> Result<Exchange, PumpError> {
    let server_actions = server.start().map_err(|error| PumpError {
        side: Peer::Server,
        error,
        exchange: Exchange::default(),
    })?;
    let mut exchange = pump(client, server, store, Peer::Server, server_actions)?;

    let client_actions = client.start().map_err(|error| PumpError {
        side: Peer::Client,
        error,
        exchange: Exchange::default(),
    })?;
    exchange.merge(pump(client, server, store, Peer::Client, client_actions)?);

    Ok(exchange)
}
