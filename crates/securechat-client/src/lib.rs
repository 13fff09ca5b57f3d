//! SecureChat client.
//!
//! Connects to a server over TCP, authenticates with a certificate plus
//! email/password, then sends chat messages typed by the user. The session
//! itself is [`securechat_core`]'s Sans-IO [`Session`] under a
//! [`Driver`]; this crate supplies the socket, the terminal and the files.
//!
//! # Components
//!
//! - [`Client`]: identity and configuration, opens [`Connection`]s
//! - [`Connection`]: one established session, runs the chat and persists
//!   receipts
//! - [`prompt`]: credential prompts, chat input parsing, event rendering
//!
//! [`Session`]: securechat_core::Session
//! [`Driver`]: securechat_core::Driver

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod client;
mod error;
pub mod prompt;

pub use client::{Client, ClientConfig, Connection, SessionSummary};
pub use error::ClientError;
