//! Outbound chat notifications.
//!
//! The engine only sees [`NotificationGateway`]; [`TelegramGateway`] is the
//! production implementation. With the `testing` feature, `RecordingGateway`
//! records calls for tests.

#[cfg(any(test, feature = "testing"))]
mod mocks;
mod telegram;

#[cfg(any(test, feature = "testing"))]
pub use mocks::{RecordingGateway, SentMessage};
pub use telegram::TelegramGateway;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[cfg(any(test, feature = "testing"))]
use mockall::automock;

/// Identifier the chat service assigns to a delivered message.
pub type MessageId = i64;

/// Text formatting requested from the chat service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ParseMode {
    #[serde(rename = "HTML")]
    Html,
    MarkdownV2,
}

impl ParseMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParseMode::Html => "HTML",
            ParseMode::MarkdownV2 => "MarkdownV2",
        }
    }
}

impl fmt::Display for ParseMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ParseMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "HTML" => Ok(ParseMode::Html),
            "MarkdownV2" => Ok(ParseMode::MarkdownV2),
            other => Err(other.to_string()),
        }
    }
}

/// Chat target, accepted from config as either a string or an integer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChatId {
    Numeric(i64),
    Handle(String),
}

impl fmt::Display for ChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChatId::Numeric(id) => write!(f, "{id}"),
            ChatId::Handle(handle) => f.write_str(handle),
        }
    }
}

/// A fully rendered message ready to be delivered.
#[derive(Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub bot_token: String,
    pub chat_id: ChatId,
    pub text: String,
    pub parse_mode: Option<ParseMode>,
}

// Debug is hand-written to keep the bot token out of logs.
impl fmt::Debug for OutgoingMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutgoingMessage")
            .field("bot_token", &"<redacted>")
            .field("chat_id", &self.chat_id)
            .field("text", &self.text)
            .field("parse_mode", &self.parse_mode)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("chat service rejected the message ({status}): {description}")]
    Remote { status: u16, description: String },

    #[error("unexpected response: {0}")]
    InvalidResponse(String),
}

#[cfg_attr(any(test, feature = "testing"), automock)]
#[async_trait]
pub trait NotificationGateway: Send + Sync {
    /// Deliver one message. No retries are attempted.
    async fn send(&self, message: &OutgoingMessage) -> Result<MessageId, NotificationError>;
}
