//! SecureChat wire protocol.
//!
//! Two layers:
//!
//! - [`Frame`]: `u32` big-endian length prefix + payload, the only structure
//!   the byte stream knows about
//! - [`Message`]: JSON objects carried in frame payloads, discriminated by a
//!   `type` field (status replies by a `status` field)
//!
//! Nothing here touches keys or sockets. Encryption and signatures are applied
//! by the session layer to the string fields of [`ChatMessage`] and
//! [`SessionReceipt`].

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod decimal;
pub mod errors;
pub mod frame;
pub mod message;

pub use errors::{ProtocolError, Result};
pub use frame::Frame;
pub use message::{
    AuthRequest, ChatMessage, DhClient, DhServer, Hello, Message, Peer, Quit, ServerHello,
    SessionReceipt, Status, StatusKind,
};
pub use num_bigint::BigUint;
