//! Event listener: turns a transport's raw update stream into [`Event`]s.
//!
//! A background task reads raw updates as they arrive, stamps and normalizes
//! them, and buffers them for whoever is waiting on the [`EventStream`]. The
//! listener does no correlation of its own.

use crate::error::{TransportError, TransportResult};
use crate::event::{ButtonLayout, Event, EventKind};
use crate::transport::{ChatRef, Transport, UpdateStream};
use tokio::sync::mpsc::{self, UnboundedReceiver, error::TryRecvError};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

/// Subscribe to `chat` and start the background listener.
///
/// The returned stream is infinite in principle. It ends only with a terminal
/// transport error; to resume after one, subscribe again.
pub async fn subscribe<T>(transport: &T, chat: &ChatRef) -> TransportResult<EventStream>
where
    T: Transport + ?Sized,
{
    let updates = transport.subscribe(chat).await?;
    debug!(chat = %chat, "subscribed to chat updates");
    Ok(EventStream::spawn(updates))
}

/// FIFO sequence of normalized events for one chat.
///
/// Also remembers the most recently observed inline keyboard so button taps
/// can be resolved against it.
pub struct EventStream {
    rx: UnboundedReceiver<TransportResult<Event>>,
    task: JoinHandle<()>,
    terminal: Option<TransportError>,
    last_layout: Option<ButtonLayout>,
}

impl EventStream {
    fn spawn(mut updates: UpdateStream) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();

        let task = tokio::spawn(async move {
            loop {
                let item = match updates.recv().await {
                    Some(Ok(raw)) => Ok(Event::from_update(raw, Instant::now())),
                    Some(Err(err)) => Err(err),
                    None => Err(TransportError::StreamClosed),
                };
                let terminal = item.is_err();
                if tx.send(item).is_err() || terminal {
                    break; // Stream dropped or transport gone
                }
            }
        });

        Self {
            rx,
            task,
            terminal: None,
            last_layout: None,
        }
    }

    /// Wait for the next event.
    ///
    /// Once a terminal error has been seen, every further call returns it
    /// again. Cancel-safe: dropping the future never loses an event.
    pub async fn next(&mut self) -> TransportResult<Event> {
        if let Some(err) = &self.terminal {
            return Err(err.clone());
        }
        let item = self.rx.recv().await;
        self.accept(item)
    }

    /// Take every event that is already buffered, without waiting.
    ///
    /// Stops early at a terminal error, which is then reported by
    /// [`terminal_error`](Self::terminal_error) and [`next`](Self::next).
    pub fn drain(&mut self) -> Vec<Event> {
        let mut drained = Vec::new();
        while self.terminal.is_none() {
            let item = match self.rx.try_recv() {
                Ok(item) => Some(item),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => None,
            };
            if let Ok(event) = self.accept(item) {
                drained.push(event);
            }
        }
        drained
    }

    /// The error that ended this stream, if it has ended.
    pub fn terminal_error(&self) -> Option<&TransportError> {
        self.terminal.as_ref()
    }

    /// The most recently observed inline keyboard, if it is still shown.
    pub fn last_layout(&self) -> Option<&ButtonLayout> {
        self.last_layout.as_ref()
    }

    fn accept(&mut self, item: Option<TransportResult<Event>>) -> TransportResult<Event> {
        match item {
            Some(Ok(event)) => {
                self.observe(&event);
                Ok(event)
            }
            Some(Err(err)) => {
                self.terminal = Some(err.clone());
                Err(err)
            }
            None => {
                self.terminal = Some(TransportError::StreamClosed);
                Err(TransportError::StreamClosed)
            }
        }
    }

    fn observe(&mut self, event: &Event) {
        match (&event.layout, event.kind) {
            (Some(layout), _) => self.last_layout = Some(layout.clone()),
            // An edit without buttons removed the keyboard it used to carry.
            (None, EventKind::Edit) => {
                if self
                    .last_layout
                    .as_ref()
                    .is_some_and(|l| l.message_id == event.message_id)
                {
                    self.last_layout = None;
                }
            }
            (None, EventKind::TextMessage | EventKind::CallbackAck) => {}
        }
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::memory::InMemoryTransport;

    #[tokio::test]
    async fn test_events_arrive_in_order() {
        let (transport, bot) = InMemoryTransport::new();
        let chat = ChatRef::new("bot");
        let mut events = subscribe(&transport, &chat).await.unwrap();

        bot.reply("one").await;
        bot.reply("two").await;

        assert_eq!(events.next().await.unwrap().text(), "one");
        assert_eq!(events.next().await.unwrap().text(), "two");
    }

    #[tokio::test]
    async fn test_tracks_last_layout() {
        let (transport, bot) = InMemoryTransport::new();
        let chat = ChatRef::new("bot");
        let mut events = subscribe(&transport, &chat).await.unwrap();

        let id = bot.reply_with_buttons("menu", &[&["A", "B"]]).await;
        bot.reply("plain text").await;
        events.next().await.unwrap();
        events.next().await.unwrap();
        assert_eq!(events.last_layout().unwrap().message_id, id);

        bot.edit(id, "menu closed", &[]).await;
        events.next().await.unwrap();
        assert!(events.last_layout().is_none());
    }

    #[tokio::test]
    async fn test_terminal_error_is_sticky() {
        let (transport, bot) = InMemoryTransport::new();
        let chat = ChatRef::new("bot");
        let mut events = subscribe(&transport, &chat).await.unwrap();

        bot.disconnect("gone").await;

        let first = events.next().await.unwrap_err();
        assert_eq!(first, TransportError::Disconnected("gone".into()));
        assert_eq!(events.next().await.unwrap_err(), first);
        assert_eq!(events.terminal_error(), Some(&first));
    }

    #[tokio::test]
    async fn test_drain_returns_buffered_events() {
        let (transport, bot) = InMemoryTransport::new();
        let chat = ChatRef::new("bot");
        let mut events = subscribe(&transport, &chat).await.unwrap();

        bot.reply("stray").await;
        // Let the listener task forward the update.
        tokio::task::yield_now().await;
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;

        let drained = events.drain();
        assert_eq!(drained.len(), 1);
        assert!(events.drain().is_empty());
    }
}
