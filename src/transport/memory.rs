//! In-process transport with a scriptable bot on the other end.
//!
//! [`InMemoryTransport`] implements [`Transport`] over tokio channels. The
//! paired [`BotHandle`] plays the bot: it receives every user action and pushes
//! replies, edits and callback answers back onto the subscribed update stream.

use super::{ChatRef, MessageId, RawButton, RawMessage, RawUpdate, Transport, UpdateStream};
use crate::error::{TransportError, TransportResult};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

const UPDATE_BUFFER: usize = 256;

/// Something the user side did, as seen by the bot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserAction {
    Text {
        id: MessageId,
        text: String,
        at: Instant,
    },
    Callback {
        message_id: MessageId,
        data: Vec<u8>,
        at: Instant,
    },
}

impl UserAction {
    /// When the action reached the bot.
    pub fn at(&self) -> Instant {
        match self {
            UserAction::Text { at, .. } | UserAction::Callback { at, .. } => *at,
        }
    }

    /// The message text, or the callback payload decoded as UTF-8.
    pub fn text(&self) -> String {
        match self {
            UserAction::Text { text, .. } => text.clone(),
            UserAction::Callback { data, .. } => String::from_utf8_lossy(data).into_owned(),
        }
    }
}

struct Shared {
    updates: Mutex<Option<mpsc::Sender<TransportResult<RawUpdate>>>>,
    fail_next: Mutex<Option<TransportError>>,
    next_id: AtomicI64,
    calls: AtomicUsize,
    connected: AtomicBool,
    send_delay: Duration,
}

impl Shared {
    fn allocate_id(&self) -> MessageId {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    fn subscriber(&self) -> Option<mpsc::Sender<TransportResult<RawUpdate>>> {
        self.updates.lock().unwrap().clone()
    }
}

/// User-side end of the in-memory connection.
///
/// Once every clone is dropped, the bot handle's
/// [`next_action`](BotHandle::next_action) returns `None`.
#[derive(Clone)]
pub struct InMemoryTransport {
    shared: Arc<Shared>,
    actions: mpsc::UnboundedSender<UserAction>,
}

impl InMemoryTransport {
    /// Create a connected transport and the bot handle that answers it.
    pub fn new() -> (Self, BotHandle) {
        Self::with_send_delay(Duration::ZERO)
    }

    /// Like [`new`](Self::new), but every outbound call takes `delay` to
    /// complete, emulating network latency.
    pub fn with_send_delay(delay: Duration) -> (Self, BotHandle) {
        let (actions_tx, actions_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            updates: Mutex::new(None),
            fail_next: Mutex::new(None),
            next_id: AtomicI64::new(1),
            calls: AtomicUsize::new(0),
            connected: AtomicBool::new(true),
            send_delay: delay,
        });
        let bot = BotHandle {
            shared: shared.clone(),
            actions: actions_rx,
        };
        (
            Self {
                shared,
                actions: actions_tx,
            },
            bot,
        )
    }

    /// Number of outbound network calls (`send_text` and `invoke_callback`)
    /// made so far.
    pub fn calls(&self) -> usize {
        self.shared.calls.load(Ordering::SeqCst)
    }

    async fn outbound(&self, action: impl FnOnce(Instant) -> UserAction) -> TransportResult<()> {
        if !self.is_connected() {
            return Err(TransportError::Disconnected("transport closed".into()));
        }
        self.shared.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.shared.fail_next.lock().unwrap().take() {
            return Err(err);
        }
        if !self.shared.send_delay.is_zero() {
            tokio::time::sleep(self.shared.send_delay).await;
        }
        self.actions
            .send(action(Instant::now()))
            .map_err(|_| TransportError::Disconnected("bot side dropped".into()))
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn subscribe(&self, _chat: &ChatRef) -> TransportResult<UpdateStream> {
        if !self.is_connected() {
            return Err(TransportError::Disconnected("transport closed".into()));
        }
        let (tx, rx) = mpsc::channel(UPDATE_BUFFER);
        *self.shared.updates.lock().unwrap() = Some(tx);
        Ok(rx)
    }

    async fn send_text(&self, _chat: &ChatRef, text: &str) -> TransportResult<MessageId> {
        let id = self.shared.allocate_id();
        let text = text.to_string();
        self.outbound(|at| UserAction::Text { id, text, at }).await?;
        Ok(id)
    }

    async fn invoke_callback(
        &self,
        _chat: &ChatRef,
        message_id: MessageId,
        data: &[u8],
    ) -> TransportResult<()> {
        let data = data.to_vec();
        self.outbound(|at| UserAction::Callback {
            message_id,
            data,
            at,
        })
        .await
    }

    fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }
}

/// Bot-side end of the in-memory connection.
pub struct BotHandle {
    shared: Arc<Shared>,
    actions: mpsc::UnboundedReceiver<UserAction>,
}

impl BotHandle {
    /// Wait for the next user action. Returns `None` once every transport
    /// clone has been dropped.
    pub async fn next_action(&mut self) -> Option<UserAction> {
        self.actions.recv().await
    }

    /// Send a plain text reply.
    pub async fn reply(&self, text: &str) -> MessageId {
        self.reply_with_buttons(text, &[]).await
    }

    /// Send a reply carrying an inline keyboard. Each button's callback payload
    /// is its label.
    pub async fn reply_with_buttons(&self, text: &str, rows: &[&[&str]]) -> MessageId {
        let id = self.shared.allocate_id();
        self.push(Ok(RawUpdate::NewMessage(message(id, text, rows))))
            .await;
        id
    }

    /// Edit a previously sent message, replacing its text and keyboard.
    pub async fn edit(&self, id: MessageId, text: &str, rows: &[&[&str]]) {
        self.push(Ok(RawUpdate::MessageEdited(message(id, text, rows))))
            .await;
    }

    /// Answer a callback query for `message_id`.
    pub async fn answer_callback(&self, message_id: MessageId, text: Option<&str>) {
        self.push(Ok(RawUpdate::CallbackAnswer {
            message_id,
            text: text.map(str::to_string),
            alert: false,
        }))
        .await;
    }

    /// Make the next outbound call fail with `err`. The call still counts
    /// towards [`InMemoryTransport::calls`], and the connection stays up.
    pub fn fail_next(&self, err: TransportError) {
        *self.shared.fail_next.lock().unwrap() = Some(err);
    }

    /// Drop the connection: the subscriber receives a terminal error and all
    /// further outbound calls fail.
    pub async fn disconnect(&self, reason: &str) {
        self.shared.connected.store(false, Ordering::SeqCst);
        self.push(Err(TransportError::Disconnected(reason.to_string())))
            .await;
        self.shared.updates.lock().unwrap().take();
    }

    async fn push(&self, update: TransportResult<RawUpdate>) {
        if let Some(tx) = self.shared.subscriber() {
            // A closed subscriber just means nobody is listening any more.
            let _ = tx.send(update).await;
        }
    }
}

fn message(id: MessageId, text: &str, rows: &[&[&str]]) -> RawMessage {
    RawMessage {
        id,
        text: text.to_string(),
        buttons: rows
            .iter()
            .map(|row| {
                row.iter()
                    .map(|label| RawButton::new(*label, label.as_bytes()))
                    .collect()
            })
            .collect(),
    }
}
