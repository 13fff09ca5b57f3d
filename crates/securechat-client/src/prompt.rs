//! Terminal interaction: credential prompts, chat input and event rendering.
//!
//! Generic over the reader and writer so the same code drives stdin/stdout
//! and in-memory buffers in tests.

use securechat_core::{Command, Credentials, SessionEvent};
use tokio::io::{AsyncBufRead, AsyncWrite, AsyncWriteExt, Lines};

use crate::ClientError;

/// Ask for register/login and the matching fields.
///
/// Answers are trimmed. Empty answers and unknown choices are errors; the
/// session would be refused by the server anyway.
pub async fn credentials<R, W>(input: &mut Lines<R>, output: &mut W) -> Result<Credentials, ClientError>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    output.write_all(b"\n=== Authentication ===\n").await?;
    let choice = ask(input, output, "Register (r) or Login (l)? ").await?.to_lowercase();

    match choice.as_str() {
        "r" | "register" => {
            let email = ask(input, output, "Email: ").await?;
            let username = ask(input, output, "Username: ").await?;
            let password = ask(input, output, "Password: ").await?;
            Ok(Credentials::register(email, username, password))
        },
        "l" | "login" => {
            let email = ask(input, output, "Email: ").await?;
            let password = ask(input, output, "Password: ").await?;
            Ok(Credentials::login(email, password))
        },
        other => Err(ClientError::InvalidInput(format!("expected 'r' or 'l', got '{other}'"))),
    }
}

async fn ask<R, W>(input: &mut Lines<R>, output: &mut W, question: &str) -> Result<String, ClientError>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    output.write_all(question.as_bytes()).await?;
    output.flush().await?;

    let Some(line) = input.next_line().await? else {
        return Err(ClientError::InvalidInput("input closed".to_string()));
    };
    let answer = line.trim();
    if answer.is_empty() {
        return Err(ClientError::InvalidInput(format!("empty answer to '{}'", question.trim())));
    }
    Ok(answer.to_string())
}

/// Interpret one line typed during the chat.
///
/// `quit` (any case) ends the session; blank lines are ignored.
pub fn parse_line(line: &str) -> Option<Command> {
    let text = line.trim();
    if text.is_empty() {
        None
    } else if text.eq_ignore_ascii_case("quit") {
        Some(Command::Quit)
    } else {
        Some(Command::Chat(text.to_string()))
    }
}

/// Text shown to the user for an event, if any.
pub fn render(event: &SessionEvent) -> Option<String> {
    match event {
        SessionEvent::Established { username } => Some(format!(
            "Logged in as {username}.\n\n=== Chat Session ===\nType messages to send, or 'quit' to exit."
        )),
        SessionEvent::Message { plaintext, .. } => Some(format!("Server: {plaintext}")),
        SessionEvent::Acknowledged { .. } | SessionEvent::ReceiptIssued(_) => None,
        SessionEvent::Rejected { seqno, reason } => Some(format!("Dropped message {seqno}: {reason}")),
        SessionEvent::PeerError { message } => Some(format!("Error: {message}")),
        SessionEvent::PeerReceipt { verified, matches_local, .. } => Some(match (verified, matches_local) {
            (true, true) => "Server receipt verified; transcripts match.".to_string(),
            (true, false) => "Server receipt verified, but its digest differs from ours!".to_string(),
            (false, _) => "Server receipt signature INVALID!".to_string(),
        }),
        SessionEvent::Closed { reason } => Some(format!("Session closed: {reason}")),
    }
}
