//! Session state machine tests.
//!
//! Client and server sessions run against each other in memory through the
//! harness pump; no sockets, deterministic clock and randomness.

use std::{sync::Arc, time::Duration};

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use securechat_core::{
    CredentialError, CredentialStore, Credentials, LocalIdentity, MemorySink, RejectReason,
    Session, SessionAction, SessionConfig, SessionError, SessionState, receipt,
};
use securechat_crypto::{message_signing_input, sign};
use securechat_harness::{
    MemoryCredentialStore, TestEnv, TestSession, client_session, handshake, pki, pump,
    server_session,
};
use securechat_proto::{ChatMessage, Hello, Message, Peer, ProtocolError, ServerHello, Status};

struct Pair {
    env: TestEnv,
    store: MemoryCredentialStore<TestEnv>,
    client: TestSession,
    server: TestSession,
}

impl Pair {
    fn new(seed: u64, credentials: Credentials) -> Self {
        let env = TestEnv::new(seed);
        Self {
            store: MemoryCredentialStore::new(env.clone()),
            client: client_session(&env, credentials),
            server: server_session(&env),
            env,
        }
    }

    /// Fresh pair, handshake completed with a registered account.
    fn established(seed: u64) -> Self {
        let mut pair = Self::new(seed, Credentials::register("alice@example.com", "alice", "pw"));
        pair.handshake().unwrap();
        pair
    }

    fn handshake(&mut self) -> Result<securechat_harness::Exchange, securechat_harness::PumpError> {
        handshake(&mut self.client, &mut self.server, &self.store)
    }

    fn client_chat(&mut self, text: &str) -> securechat_harness::Exchange {
        let actions = self.client.send_chat(text).unwrap();
        pump(&mut self.client, &mut self.server, &self.store, Peer::Client, actions).unwrap()
    }

    /// Deliver a hand-built chat message to the server.
    fn inject(&mut self, chat: ChatMessage) -> Vec<SessionAction> {
        let payload = Message::Chat(chat).encode().unwrap();
        self.server.handle_payload(&payload).unwrap()
    }
}

fn rejection(actions: &[SessionAction]) -> RejectReason {
    match actions {
        [SessionAction::Send(Message::Status(status)), SessionAction::Rejected { reason, .. }] => {
            assert_eq!(status.message.as_deref(), Some(reason.to_string().as_str()));
            reason.clone()
        },
        other => panic!("expected a rejection, got {other:?}"),
    }
}

#[test]
fn register_reaches_data_plane() {
    let pair = Pair::established(1);

    assert_eq!(pair.client.state(), SessionState::DataPlane);
    assert_eq!(pair.server.state(), SessionState::DataPlane);
    assert_eq!(pair.client.username(), Some("alice"));
    assert_eq!(pair.server.username(), Some("alice"));
    assert_eq!(pair.store.len(), 1);

    assert_eq!(pair.client.peer_certificate(), Some(&pki().server.certificate));
    assert_eq!(pair.server.peer_certificate(), Some(&pki().client.certificate));
    assert_eq!(pair.server.peer_nonce().map(<[u8]>::len), Some(32));
    assert_eq!(pair.client.peer_nonce().map(<[u8]>::len), Some(32));
}

/// INVARIANT: the temporary key never outlives the Authentication phase.
#[test]
fn temporary_key_discarded_after_authentication() {
    let pair = Pair::established(2);

    assert!(!pair.client.has_temporary_key());
    assert!(!pair.server.has_temporary_key());
    assert!(pair.client.has_session_key());
    assert!(pair.server.has_session_key());
}

#[test]
fn handshake_wire_order() {
    let mut pair = Pair::new(3, Credentials::register("alice@example.com", "alice", "pw"));
    let exchange = pair.handshake().unwrap();

    let kinds: Vec<(Peer, String)> = exchange
        .wire
        .iter()
        .map(|(from, payload)| {
            let kind = Message::decode(payload).map_or("credentials", |m| m.kind());
            (*from, kind.to_string())
        })
        .collect();

    let expected = [
        (Peer::Client, "hello"),
        (Peer::Server, "server_hello"),
        (Peer::Client, "dh_client"),
        (Peer::Server, "dh_server"),
        (Peer::Client, "credentials"),
        (Peer::Server, "status"),
        (Peer::Client, "dh_client"),
        (Peer::Server, "dh_server"),
    ];
    let expected: Vec<(Peer, String)> =
        expected.iter().map(|(p, k)| (*p, (*k).to_string())).collect();
    assert_eq!(kinds, expected);

    let established = |actions: &[SessionAction]| {
        actions.iter().any(|a| matches!(a, SessionAction::Established { username } if username == "alice"))
    };
    assert!(established(&exchange.client));
    assert!(established(&exchange.server));
}

#[test]
fn credentials_never_cross_the_wire_in_clear() {
    let mut pair = Pair::new(4, Credentials::register("alice@example.com", "alice", "hunter2-secret"));
    let exchange = pair.handshake().unwrap();

    for (_, payload) in &exchange.wire {
        let text = String::from_utf8_lossy(payload);
        assert!(!text.contains("hunter2-secret"));
        assert!(!text.contains("alice@example.com"));
    }
}

#[test]
fn login_after_register() {
    let env = TestEnv::new(5);
    let store = MemoryCredentialStore::new(env.clone());
    store.register("bob@example.com", "bob", "pw-b").unwrap();

    let mut client = client_session(&env, Credentials::login("bob@example.com", "pw-b"));
    let mut server = server_session(&env);
    handshake(&mut client, &mut server, &store).unwrap();

    assert_eq!(client.state(), SessionState::DataPlane);
    assert_eq!(client.username(), Some("bob"));
    assert_eq!(server.username(), Some("bob"));
}

#[test]
fn wrong_password_closes_both_sides() {
    let env = TestEnv::new(6);
    let store = MemoryCredentialStore::new(env.clone());
    store.register("bob@example.com", "bob", "pw-b").unwrap();

    let mut client = client_session(&env, Credentials::login("bob@example.com", "wrong"));
    let mut server = server_session(&env);
    let err = handshake(&mut client, &mut server, &store).unwrap_err();

    assert_eq!(err.side, Peer::Client);
    assert_eq!(
        err.error,
        SessionError::AuthenticationFailed(CredentialError::BadPassword.to_string())
    );
    assert!(client.is_closed());
    assert!(server.is_closed());
    assert!(!server.has_temporary_key());
}

#[test]
fn duplicate_registration_refused() {
    let env = TestEnv::new(7);
    let store = MemoryCredentialStore::new(env.clone());
    store.register("alice@example.com", "alice", "pw").unwrap();

    let credentials = Credentials::register("other@example.com", "alice", "pw");
    let mut client = client_session(&env, credentials);
    let mut server = server_session(&env);
    let err = handshake(&mut client, &mut server, &store).unwrap_err();

    assert_eq!(err.error, SessionError::AuthenticationFailed("Username already taken".to_string()));
    assert_eq!(store.len(), 1);
}

#[test]
fn chat_delivered_acknowledged_and_recorded() {
    let mut pair = Pair::established(8);
    let exchange = pair.client_chat("hi");

    assert_eq!(exchange.server, vec![SessionAction::Deliver { seqno: 1, plaintext: "hi".to_string() }]);
    assert_eq!(exchange.client, vec![SessionAction::Acknowledged { seqno: 1 }]);

    assert_eq!(pair.client.next_send_seq(), 2);
    assert_eq!(pair.server.expected_seq(), 2);

    // Both ledgers hold the same line, attributed to the client certificate.
    let client_lines = pair.client.transcript().sink().lines();
    let server_lines = pair.server.transcript().sink().lines();
    assert_eq!(client_lines.len(), 1);
    assert_eq!(client_lines, server_lines);
    assert!(client_lines[0].starts_with("1|"));
    assert!(client_lines[0].ends_with(pki().client.certificate.fingerprint()));
    assert_eq!(pair.client.transcript().digest_hex(), pair.server.transcript().digest_hex());
}

/// INVARIANT: a replayed message is rejected and the ledger is unchanged.
#[test]
fn replay_rejected() {
    let mut pair = Pair::established(9);
    let exchange = pair.client_chat("hi");
    let (_, original) = exchange.wire.iter().find(|(from, _)| *from == Peer::Client).unwrap();

    let actions = pair.server.handle_payload(original).unwrap();
    let reason = rejection(&actions);

    assert_eq!(reason, RejectReason::Replay { expected: 2, got: 1 });
    insta::assert_snapshot!(reason.to_string(), @"REPLAY: Expected seqno 2, got 1");
    assert_eq!(pair.server.transcript().len(), 1);
    assert_eq!(pair.server.expected_seq(), 2);
    assert_eq!(pair.server.state(), SessionState::DataPlane);
}

/// A resend that reuses an accepted seqno is refused even with fresh
/// content and a valid signature.
#[test]
fn resend_with_used_seqno_rejected() {
    let mut pair = Pair::new(30, Credentials::register("a@x.com", "alice", "pw1"));
    pair.handshake().unwrap();
    pair.client_chat("hi");

    let bye = pair.client.seal_chat(1, pair.env.now_ms(), "bye").unwrap();
    let reason = rejection(&pair.inject(bye));
    assert_eq!(reason, RejectReason::Replay { expected: 2, got: 1 });
    assert_eq!(pair.server.transcript().len(), 1);

    let actions = pair.client.finish().unwrap();
    pump(&mut pair.client, &mut pair.server, &pair.store, Peer::Client, actions).unwrap();

    let ours = pair.client.our_receipt().unwrap();
    let theirs = pair.client.peer_receipt().unwrap();
    assert_eq!((ours.first_seq, ours.last_seq), (1, 1));
    assert_eq!((theirs.first_seq, theirs.last_seq), (1, 1));
    assert!(receipt::verify(ours, pki().client.certificate.public_key()));
    assert!(receipt::verify(theirs, pki().server.certificate.public_key()));
}

#[test]
fn out_of_order_rejected() {
    let mut pair = Pair::established(10);
    let chat = pair.client.seal_chat(5, pair.env.now_ms(), "early").unwrap();

    let reason = rejection(&pair.inject(chat));

    assert_eq!(reason, RejectReason::OutOfOrder { expected: 1, got: 5 });
    assert_eq!(reason.code(), "REPLAY");
    assert!(pair.server.transcript().is_empty());
}

#[test]
fn stale_message_rejected() {
    let mut pair = Pair::established(11);
    let old = pair.env.now_ms() - 300_001;
    let chat = pair.client.seal_chat(1, old, "old news").unwrap();

    let reason = rejection(&pair.inject(chat));

    assert_eq!(reason, RejectReason::Stale { skew_ms: 300_001 });
    assert!(reason.to_string().starts_with("STALE: "));
    assert_eq!(pair.server.expected_seq(), 1);
}

#[test]
fn message_from_the_future_is_stale_too() {
    let mut pair = Pair::established(12);
    let ahead = pair.env.now_ms() + 300_001;
    let chat = pair.client.seal_chat(1, ahead, "tomorrow").unwrap();

    assert_eq!(rejection(&pair.inject(chat)).code(), "STALE");
}

#[test]
fn freshness_window_is_inclusive() {
    let mut pair = Pair::established(13);
    let edge = pair.env.now_ms() - 300_000;
    let chat = pair.client.seal_chat(1, edge, "just in time").unwrap();

    let actions = pair.inject(chat);
    assert!(matches!(&actions[0], SessionAction::Deliver { seqno: 1, .. }));
}

#[test]
fn clock_advance_makes_in_flight_message_stale() {
    let mut pair = Pair::established(14);
    let chat = pair.client.seal_chat(1, pair.env.now_ms(), "slow").unwrap();

    pair.env.advance(Duration::from_secs(301));

    assert_eq!(rejection(&pair.inject(chat)).code(), "STALE");
}

#[test]
fn tampered_ciphertext_fails_signature() {
    let mut pair = Pair::established(15);
    let mut chat = pair.client.seal_chat(1, pair.env.now_ms(), "original").unwrap();

    let mut ct = BASE64.decode(&chat.ct).unwrap();
    ct[0] ^= 0x01;
    chat.ct = BASE64.encode(ct);

    let reason = rejection(&pair.inject(chat));
    assert_eq!(reason, RejectReason::SignatureInvalid);
    insta::assert_snapshot!(reason.to_string(), @"SIG_FAIL: Signature verification failed");
}

#[test]
fn mangled_signature_fails() {
    let mut pair = Pair::established(16);
    let mut chat = pair.client.seal_chat(1, pair.env.now_ms(), "x").unwrap();
    chat.sig = "not base64!".to_string();

    assert_eq!(rejection(&pair.inject(chat)), RejectReason::SignatureInvalid);
}

#[test]
fn undecryptable_message_rejected() {
    let mut pair = Pair::established(17);
    let ts = pair.env.now_ms();

    // Correctly signed, but 15 bytes cannot be an AES block sequence.
    let ct = vec![0xAB; 15];
    let sig = sign::sign(&pki().client.private_key, &message_signing_input(1, ts, &ct)).unwrap();
    let chat = ChatMessage { seqno: 1, ts, ct: BASE64.encode(ct), sig: BASE64.encode(sig) };

    let reason = rejection(&pair.inject(chat));
    assert_eq!(reason, RejectReason::Undecryptable);
    assert_eq!(reason.code(), "DECRYPT_FAIL");
}

/// INVARIANT: checks run sequence first, so a replayed message with a bad
/// signature is reported as a replay.
#[test]
fn sequence_checked_before_signature() {
    let mut pair = Pair::established(18);
    pair.client_chat("one");

    let mut chat = pair.client.seal_chat(1, pair.env.now_ms(), "again").unwrap();
    chat.sig = BASE64.encode([0u8; 4]);

    assert_eq!(rejection(&pair.inject(chat)), RejectReason::Replay { expected: 2, got: 1 });
}

#[test]
fn rejection_reported_to_sender() {
    let mut pair = Pair::established(19);
    let chat = pair.client.seal_chat(3, pair.env.now_ms(), "skip").unwrap();

    let actions = vec![SessionAction::Send(Message::Chat(chat))];
    let exchange = pump(&mut pair.client, &mut pair.server, &pair.store, Peer::Client, actions).unwrap();

    assert_eq!(
        exchange.client,
        vec![SessionAction::PeerError { message: "REPLAY: Expected seqno 1, got 3".to_string() }]
    );
    assert_eq!(pair.client.state(), SessionState::DataPlane);
}

#[test]
fn receipts_exchanged_and_verified() {
    let mut pair = Pair::established(20);
    pair.client_chat("one");
    pair.client_chat("two");

    let actions = pair.client.finish().unwrap();
    assert_eq!(actions[0], SessionAction::Send(Message::Quit));
    let exchange = pump(&mut pair.client, &mut pair.server, &pair.store, Peer::Client, actions).unwrap();

    assert!(pair.client.is_closed());
    assert!(pair.server.is_closed());
    assert!(!pair.client.has_session_key());

    let ours = pair.client.our_receipt().unwrap();
    let theirs = pair.client.peer_receipt().unwrap();
    assert_eq!(ours.peer, Peer::Client);
    assert_eq!(theirs.peer, Peer::Server);
    assert_eq!((ours.first_seq, ours.last_seq), (1, 2));
    assert_eq!(ours.transcript_sha256, theirs.transcript_sha256);

    assert!(receipt::verify(ours, pki().client.certificate.public_key()));
    assert!(receipt::verify(theirs, pki().server.certificate.public_key()));
    assert!(!receipt::verify(theirs, pki().client.certificate.public_key()));

    let peer_receipt_seen = |actions: &[SessionAction]| {
        actions.iter().any(|a| {
            matches!(a, SessionAction::PeerReceipt { verified: true, matches_local: true, .. })
        })
    };
    assert!(peer_receipt_seen(&exchange.client));
    assert!(peer_receipt_seen(&exchange.server));
}

#[test]
fn empty_session_receipt_covers_nothing() {
    let mut pair = Pair::established(21);

    let actions = pair.client.finish().unwrap();
    pump(&mut pair.client, &mut pair.server, &pair.store, Peer::Client, actions).unwrap();

    let receipt = pair.server.our_receipt().unwrap();
    assert_eq!((receipt.first_seq, receipt.last_seq), (0, 0));
    assert_eq!(
        receipt.transcript_sha256,
        "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
    );
}

#[test]
fn finish_is_idempotent_and_stops_sending() {
    let mut pair = Pair::established(22);

    let first = pair.client.finish().unwrap();
    assert!(!first.is_empty());
    assert_eq!(pair.client.state(), SessionState::NonRepudiation);

    assert!(pair.client.finish().unwrap().is_empty());
    assert!(matches!(pair.client.send_chat("late"), Err(SessionError::InvalidState { .. })));
}

#[test]
fn chat_after_local_finish_is_dropped() {
    let mut pair = Pair::established(23);
    let chat = pair.client.seal_chat(1, pair.env.now_ms(), "crossing").unwrap();

    // Server quits first (its receipt is pending on the wire).
    let _ = pair.server.finish().unwrap();
    assert_eq!(pair.server.state(), SessionState::NonRepudiation);

    assert!(pair.inject(chat).is_empty());
    assert!(pair.server.transcript().is_empty());
}

#[test]
fn close_is_final() {
    let mut pair = Pair::established(24);

    let actions = pair.client.close("user abort");
    assert_eq!(actions, vec![SessionAction::Close { reason: "user abort".to_string() }]);
    assert!(pair.client.close("again").is_empty());
    assert!(!pair.client.has_session_key());

    let status = Message::from(Status::ack(1)).encode().unwrap();
    assert_eq!(pair.client.handle_payload(&status), Err(SessionError::Closed));
}

#[test]
fn unexpected_message_is_fatal() {
    let env = TestEnv::new(25);
    let mut server = server_session(&env);
    server.start().unwrap();

    let payload = Message::Quit.encode().unwrap();
    let err = server.handle_payload(&payload).unwrap_err();

    assert_eq!(err, SessionError::UnexpectedMessage { state: SessionState::ControlPlane, message: "quit" });
    assert!(err.notify_peer());
    assert!(server.is_closed());
}

#[test]
fn garbage_payload_is_fatal() {
    let env = TestEnv::new(26);
    let mut server = server_session(&env);
    server.start().unwrap();

    assert!(matches!(server.handle_payload(b"{not json"), Err(SessionError::Protocol(_))));
    assert!(server.is_closed());
}

#[test]
fn bad_hello_nonce_is_fatal() {
    let short = BASE64.encode([7u8; 16]);
    for nonce in ["%%% not base64 %%%", short.as_str(), ""] {
        let env = TestEnv::new(31);
        let mut server = server_session(&env);
        server.start().unwrap();

        let hello = Message::Hello(Hello {
            client_cert: pki().client.certificate.pem().to_string(),
            nonce: nonce.to_string(),
        });
        let err = server.handle_payload(&hello.encode().unwrap()).unwrap_err();

        assert!(matches!(err, SessionError::Protocol(ProtocolError::Malformed(_))), "{nonce}: {err}");
        assert!(err.notify_peer());
        assert!(server.is_closed());
        assert_eq!(server.peer_nonce(), None);
    }
}

#[test]
fn bad_server_hello_nonce_is_fatal() {
    let long = BASE64.encode([7u8; 33]);
    for nonce in ["%%% not base64 %%%", long.as_str()] {
        let env = TestEnv::new(32);
        let mut client = client_session(&env, Credentials::login("a@x.com", "pw"));
        client.start().unwrap();

        let hello = Message::ServerHello(ServerHello {
            server_cert: pki().server.certificate.pem().to_string(),
            nonce: nonce.to_string(),
        });
        let err = client.handle_payload(&hello.encode().unwrap()).unwrap_err();

        assert!(matches!(err, SessionError::Protocol(ProtocolError::Malformed(_))), "{nonce}: {err}");
        assert!(client.is_closed());
        assert_eq!(client.peer_nonce(), None);
    }
}

#[test]
fn misnamed_server_rejected_by_client() {
    let env = TestEnv::new(27);
    let store = MemoryCredentialStore::new(env.clone());
    let identity = Arc::new(
        LocalIdentity::new(pki().misnamed_server.clone(), pki().server.private_key.clone()).unwrap(),
    );

    let mut client = client_session(&env, Credentials::register("a@x.com", "alice", "pw"));
    let mut server =
        Session::server(env.clone(), SessionConfig::default(), identity, pki().anchor(), MemorySink::new());

    let err = handshake(&mut client, &mut server, &store).unwrap_err();
    assert_eq!(err.side, Peer::Client);
    assert!(err.error.to_string().starts_with("BAD_CERT: CN mismatch"));
    assert!(store.is_empty());
}

#[test]
fn expired_client_rejected_by_server() {
    let env = TestEnv::new(28);
    let store = MemoryCredentialStore::new(env.clone());
    let identity = Arc::new(
        LocalIdentity::new(pki().expired_client.clone(), pki().client.private_key.clone()).unwrap(),
    );

    let mut client = Session::client(
        env.clone(),
        SessionConfig::default(),
        identity,
        pki().anchor(),
        Credentials::register("a@x.com", "alice", "pw"),
        MemorySink::new(),
    );
    let mut server = server_session(&env);

    let err = handshake(&mut client, &mut server, &store).unwrap_err();
    assert_eq!(err.side, Peer::Server);
    assert!(matches!(err.error, SessionError::BadCertificate(_)));
    assert!(server.is_closed());
}

#[test]
fn start_twice_is_invalid() {
    let env = TestEnv::new(29);
    let mut client = client_session(&env, Credentials::login("a@x.com", "pw"));

    client.start().unwrap();
    assert!(matches!(client.start(), Err(SessionError::InvalidState { .. })));
}
