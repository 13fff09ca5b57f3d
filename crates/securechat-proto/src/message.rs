//! JSON wire messages.
//!
//! Every message except [`Status`] is a JSON object with a `type`
//! discriminator. Status replies carry a `status` field instead. The
//! credential request ([`AuthRequest`]) is never sent in the clear: it is
//! serialized, encrypted, and shipped as base64 text.

use num_bigint::BigUint;
use serde::{Deserialize, Serialize};

use crate::{
    Frame,
    errors::{ProtocolError, Result},
};

/// Client hello: certificate and freshness nonce.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hello {
    /// PEM encoded client certificate
    pub client_cert: String,
    /// Base64 encoded 32-byte nonce
    pub nonce: String,
}

/// Server reply to [`Hello`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerHello {
    /// PEM encoded server certificate
    pub server_cert: String,
    /// Base64 encoded 32-byte nonce
    pub nonce: String,
}

/// DH initiator parameters and public value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DhClient {
    /// Generator
    #[serde(with = "crate::decimal")]
    pub g: BigUint,
    /// Prime modulus
    #[serde(with = "crate::decimal")]
    pub p: BigUint,
    /// Initiator public value `g^a mod p`
    #[serde(rename = "A", with = "crate::decimal")]
    pub a: BigUint,
}

/// DH responder public value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DhServer {
    /// Responder public value `g^b mod p`
    #[serde(rename = "B", with = "crate::decimal")]
    pub b: BigUint,
}

/// Sequenced, encrypted, signed application message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Sender sequence number, starting at 1
    pub seqno: u64,
    /// Sender wall clock, milliseconds since the Unix epoch
    pub ts: u64,
    /// Base64 AES-128 ciphertext
    pub ct: String,
    /// Base64 RSA signature over `seqno ‖ ts ‖ ct`
    pub sig: String,
}

/// Which side issued a [`SessionReceipt`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Peer {
    /// Connecting party
    Client,
    /// Accepting party
    Server,
}

impl Peer {
    /// Lowercase wire name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Client => "client",
            Self::Server => "server",
        }
    }

    /// The opposite side.
    #[must_use]
    pub fn other(self) -> Self {
        match self {
            Self::Client => Self::Server,
            Self::Server => Self::Client,
        }
    }
}

impl std::fmt::Display for Peer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Signed commitment to a transcript digest.
///
/// `first_seq` and `last_seq` are `0` when the transcript is empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionReceipt {
    /// Issuing side
    pub peer: Peer,
    /// Sequence number of the first transcript entry
    pub first_seq: u64,
    /// Sequence number of the last transcript entry
    pub last_seq: u64,
    /// Lowercase hex SHA-256 of the transcript
    pub transcript_sha256: String,
    /// Base64 RSA signature over the raw digest bytes
    pub sig: String,
}

/// End of the sender's message stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quit {}

/// Outcome carried by a [`Status`] reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusKind {
    /// Request accepted
    Success,
    /// Request rejected; `message` holds the reason
    Error,
    /// Chat message accepted; `seqno` names it
    Ack,
}

/// Untyped status reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    /// Outcome
    pub status: StatusKind,
    /// Human readable detail, error codes prefix it (`REPLAY: ...`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Authenticated username on login success
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Acknowledged sequence number
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seqno: Option<u64>,
}

impl Status {
    /// `{"status":"success","message":...}`
    #[must_use]
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            status: StatusKind::Success,
            message: Some(message.into()),
            username: None,
            seqno: None,
        }
    }

    /// `{"status":"error","message":...}`
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self { status: StatusKind::Error, message: Some(message.into()), username: None, seqno: None }
    }

    /// `{"status":"ack","seqno":n}`
    #[must_use]
    pub fn ack(seqno: u64) -> Self {
        Self { status: StatusKind::Ack, message: None, username: None, seqno: Some(seqno) }
    }

    /// Attach the authenticated username.
    #[must_use]
    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }
}

/// Credential request, encrypted under the temporary key before sending.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum AuthRequest {
    /// Create a new account
    Register {
        /// Account email, unique
        email: String,
        /// Display name, unique
        username: String,
        /// Plaintext password
        pwd: String,
    },
    /// Authenticate an existing account
    Login {
        /// Account email
        email: String,
        /// Plaintext password
        pwd: String,
        /// Base64 encoded 32-byte nonce
        nonce: String,
    },
}

impl AuthRequest {
    /// Serialize to JSON bytes (the plaintext that gets encrypted).
    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parse decrypted JSON bytes.
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Email the request refers to.
    #[must_use]
    pub fn email(&self) -> &str {
        match self {
            Self::Register { email, .. } | Self::Login { email, .. } => email,
        }
    }
}

impl std::fmt::Debug for AuthRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Register { email, username, .. } => f
                .debug_struct("Register")
                .field("email", email)
                .field("username", username)
                .field("pwd", &"<redacted>")
                .finish(),
            Self::Login { email, nonce, .. } => f
                .debug_struct("Login")
                .field("email", email)
                .field("pwd", &"<redacted>")
                .field("nonce", nonce)
                .finish(),
        }
    }
}

/// Every typed JSON message the session layer exchanges.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// `hello`
    Hello(Hello),
    /// `server_hello`
    ServerHello(ServerHello),
    /// `dh_client`
    DhClient(DhClient),
    /// `dh_server`
    DhServer(DhServer),
    /// `msg`
    Chat(ChatMessage),
    /// `receipt`
    Receipt(SessionReceipt),
    /// `quit`
    Quit,
    /// Untyped `{status: ...}` reply
    Status(Status),
}

#[derive(Serialize)]
struct Typed<'a, T> {
    #[serde(rename = "type")]
    kind: &'static str,
    #[serde(flatten)]
    body: &'a T,
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    status: Option<serde::de::IgnoredAny>,
}

impl Message {
    /// Wire discriminator (`"status"` for status replies).
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Hello(_) => "hello",
            Self::ServerHello(_) => "server_hello",
            Self::DhClient(_) => "dh_client",
            Self::DhServer(_) => "dh_server",
            Self::Chat(_) => "msg",
            Self::Receipt(_) => "receipt",
            Self::Quit => "quit",
            Self::Status(_) => "status",
        }
    }

    /// Serialize to JSON bytes.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let kind = self.kind();
        let bytes = match self {
            Self::Hello(body) => serde_json::to_vec(&Typed { kind, body })?,
            Self::ServerHello(body) => serde_json::to_vec(&Typed { kind, body })?,
            Self::DhClient(body) => serde_json::to_vec(&Typed { kind, body })?,
            Self::DhServer(body) => serde_json::to_vec(&Typed { kind, body })?,
            Self::Chat(body) => serde_json::to_vec(&Typed { kind, body })?,
            Self::Receipt(body) => serde_json::to_vec(&Typed { kind, body })?,
            Self::Quit => serde_json::to_vec(&Typed { kind, body: &Quit {} })?,
            Self::Status(body) => serde_json::to_vec(body)?,
        };
        Ok(bytes)
    }

    /// Parse JSON bytes.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::Malformed` for invalid JSON, missing fields, or an
    ///   object with neither `type` nor `status`
    /// - `ProtocolError::UnknownType` for an unrecognized `type`
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let envelope: Envelope = serde_json::from_slice(bytes)?;

        let Some(kind) = envelope.kind else {
            if envelope.status.is_some() {
                return Ok(Self::Status(serde_json::from_slice(bytes)?));
            }
            return Err(ProtocolError::Malformed("missing type".to_string()));
        };

        let message = match kind.as_str() {
            "hello" => Self::Hello(serde_json::from_slice(bytes)?),
            "server_hello" => Self::ServerHello(serde_json::from_slice(bytes)?),
            "dh_client" => Self::DhClient(serde_json::from_slice(bytes)?),
            "dh_server" => Self::DhServer(serde_json::from_slice(bytes)?),
            "msg" => Self::Chat(serde_json::from_slice(bytes)?),
            "receipt" => Self::Receipt(serde_json::from_slice(bytes)?),
            "quit" => Self::Quit,
            _ => return Err(ProtocolError::UnknownType(kind)),
        };
        Ok(message)
    }

    /// Encode into a [`Frame`].
    pub fn to_frame(&self) -> Result<Frame> {
        Ok(Frame::new(self.encode()?))
    }
}

impl From<Status> for Message {
    fn from(status: Status) -> Self {
        Self::Status(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn json(message: &Message) -> String {
        String::from_utf8(message.encode().unwrap()).unwrap()
    }

    #[test]
    fn chat_message_wire_format() {
        let message = Message::Chat(ChatMessage {
            seqno: 1,
            ts: 1_700_000_000_000,
            ct: "Y3Q=".to_string(),
            sig: "c2ln".to_string(),
        });

        insta::assert_snapshot!(json(&message), @r#"{"type":"msg","seqno":1,"ts":1700000000000,"ct":"Y3Q=","sig":"c2ln"}"#);
    }

    #[test]
    fn dh_client_integers_are_bare_numbers() {
        let p = BigUint::parse_bytes(b"340282366920938463463374607431768211507", 10).unwrap();
        let message = Message::DhClient(DhClient { g: BigUint::from(2u8), p: p.clone(), a: p });

        insta::assert_snapshot!(json(&message), @r#"{"type":"dh_client","g":2,"p":340282366920938463463374607431768211507,"A":340282366920938463463374607431768211507}"#);
    }

    #[test]
    fn dh_values_survive_round_trip() {
        let big = BigUint::from(3u8).pow(1200);
        let message = Message::DhServer(DhServer { b: big });

        let decoded = Message::decode(&message.encode().unwrap()).unwrap();
        assert_eq!(decoded, message);
    }

    #[test]
    fn dh_rejects_negative_and_string_values() {
        assert!(Message::decode(br#"{"type":"dh_server","B":-5}"#).is_err());
        assert!(Message::decode(br#"{"type":"dh_server","B":"5"}"#).is_err());
        assert!(Message::decode(br#"{"type":"dh_server","B":1.5}"#).is_err());
    }

    #[test]
    fn receipt_wire_format() {
        let message = Message::Receipt(SessionReceipt {
            peer: Peer::Server,
            first_seq: 0,
            last_seq: 0,
            transcript_sha256: "ab".to_string(),
            sig: "c2ln".to_string(),
        });

        insta::assert_snapshot!(json(&message), @r#"{"type":"receipt","peer":"server","first_seq":0,"last_seq":0,"transcript_sha256":"ab","sig":"c2ln"}"#);
    }

    #[test]
    fn quit_wire_format() {
        insta::assert_snapshot!(json(&Message::Quit), @r#"{"type":"quit"}"#);
        assert_eq!(Message::decode(br#"{"type":"quit"}"#).unwrap(), Message::Quit);
    }

    #[test]
    fn status_replies_have_no_type() {
        insta::assert_snapshot!(json(&Status::ack(3).into()), @r#"{"status":"ack","seqno":3}"#);
        insta::assert_snapshot!(
            json(&Status::success("Login successful").with_username("alice").into()),
            @r#"{"status":"success","message":"Login successful","username":"alice"}"#
        );

        let decoded = Message::decode(br#"{"status":"error","message":"REPLAY: Expected seqno 2, got 1"}"#)
            .unwrap();
        assert_eq!(decoded, Message::Status(Status::error("REPLAY: Expected seqno 2, got 1")));
    }

    #[test]
    fn unknown_type_rejected() {
        let result = Message::decode(br#"{"type":"teleport"}"#);
        assert_eq!(result, Err(ProtocolError::UnknownType("teleport".to_string())));
    }

    #[test]
    fn untyped_object_rejected() {
        assert!(matches!(Message::decode(b"{}"), Err(ProtocolError::Malformed(_))));
        assert!(matches!(Message::decode(b"not json"), Err(ProtocolError::Malformed(_))));
    }

    #[test]
    fn auth_request_tagged_by_type() {
        let register = AuthRequest::Register {
            email: "a@x.com".to_string(),
            username: "alice".to_string(),
            pwd: "pw1".to_string(),
        };
        let bytes = register.to_json().unwrap();

        insta::assert_snapshot!(
            String::from_utf8(bytes.clone()).unwrap(),
            @r#"{"type":"register","email":"a@x.com","username":"alice","pwd":"pw1"}"#
        );
        assert_eq!(AuthRequest::from_json(&bytes).unwrap(), register);
    }

    #[test]
    fn auth_request_debug_redacts_password() {
        let login = AuthRequest::Login {
            email: "a@x.com".to_string(),
            pwd: "hunter2".to_string(),
            nonce: "bm9uY2U=".to_string(),
        };

        let debug = format!("{login:?}");
        assert!(!debug.contains("hunter2"));
        assert_eq!(login.email(), "a@x.com");
    }
}
