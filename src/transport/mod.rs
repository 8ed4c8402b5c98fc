//! The authenticated transport seam.
//!
//! The engine never speaks MTProto itself. It drives a live, already
//! authenticated client through the [`Transport`] trait: subscribe to a chat's
//! updates, send text, and press inline buttons. Login, session persistence and
//! reconnection belong to whoever implements the trait.
//!
//! [`memory::InMemoryTransport`] is an in-process implementation paired with a
//! scriptable bot handle, used to exercise scenarios without a network.

pub mod memory;

use crate::error::TransportResult;
use async_trait::async_trait;
use std::fmt;
use tokio::sync::mpsc;

/// Telegram message identifier within a chat.
pub type MessageId = i64;

/// Stream of raw updates for one chat.
///
/// An `Err` item is terminal: the transport sends it once and closes the
/// channel afterwards.
pub type UpdateStream = mpsc::Receiver<TransportResult<RawUpdate>>;

/// Handle to the chat with the bot under test.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChatRef {
    peer: String,
}

impl ChatRef {
    /// Build a chat reference from a bot username. The `@` prefix is added when
    /// missing.
    pub fn new(peer: impl Into<String>) -> Self {
        let peer = peer.into();
        let peer = peer.trim();
        let peer = if peer.starts_with('@') {
            peer.to_string()
        } else {
            format!("@{peer}")
        };
        Self { peer }
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }
}

impl fmt::Display for ChatRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.peer)
    }
}

/// An inline keyboard button as delivered by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawButton {
    pub text: String,
    /// Callback payload bound to the button.
    pub data: Vec<u8>,
}

impl RawButton {
    pub fn new(text: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            text: text.into(),
            data: data.into(),
        }
    }
}

/// A message sent by the bot, including its inline keyboard rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    pub id: MessageId,
    pub text: String,
    pub buttons: Vec<Vec<RawButton>>,
}

/// One inbound update for the subscribed chat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawUpdate {
    NewMessage(RawMessage),
    MessageEdited(RawMessage),
    /// The bot's answer to a callback query. Transports surface it on the update
    /// stream so it can be correlated like any other reply.
    CallbackAnswer {
        message_id: MessageId,
        text: Option<String>,
        alert: bool,
    },
}

/// A live, authenticated client connection.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Open a fresh update stream for `chat`. A previous stream for the same
    /// chat may stop receiving updates once a new one is opened.
    async fn subscribe(&self, chat: &ChatRef) -> TransportResult<UpdateStream>;

    /// Send a plain text message and return its message id.
    async fn send_text(&self, chat: &ChatRef, text: &str) -> TransportResult<MessageId>;

    /// Press the inline button carrying `data` on message `message_id`.
    async fn invoke_callback(
        &self,
        chat: &ChatRef,
        message_id: MessageId,
        data: &[u8],
    ) -> TransportResult<()>;

    /// Whether the underlying connection is currently up.
    fn is_connected(&self) -> bool;
}
