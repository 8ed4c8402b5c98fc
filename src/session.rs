use crate::error::{TransportError, TransportResult};
use crate::event::{ButtonLayout, LabelMatch};
use crate::listener::{self, EventStream};
use crate::pacing::Pacer;
use crate::transport::{ChatRef, Transport};
use std::sync::Arc;
use tracing::info;

/// One authenticated connection bound to the chat with the bot under test.
///
/// The session owns the event subscription and the pacing state. It is passed
/// explicitly to everything that talks to the chat; independent sessions share
/// nothing mutable and can run concurrently.
pub struct Session<T: Transport + ?Sized = dyn Transport> {
    transport: Arc<T>,
    chat: ChatRef,
    events: EventStream,
    pacer: Pacer,
    label_match: LabelMatch,
}

impl<T: Transport + ?Sized> Session<T> {
    /// Subscribe to `chat` over an already authenticated `transport`.
    ///
    /// The session starts unpaced; use [`with_pacer`](Self::with_pacer) when
    /// driving a real account.
    pub async fn open(transport: Arc<T>, chat: ChatRef) -> TransportResult<Self> {
        let events = listener::subscribe(&*transport, &chat).await?;
        info!(chat = %chat, "session opened");
        Ok(Self {
            transport,
            chat,
            events,
            pacer: Pacer::unpaced(),
            label_match: LabelMatch::Exact,
        })
    }

    pub fn with_pacer(mut self, pacer: Pacer) -> Self {
        self.pacer = pacer;
        self
    }

    /// How tapped labels are looked up on the last keyboard. Exact by default.
    pub fn with_label_match(mut self, label_match: LabelMatch) -> Self {
        self.label_match = label_match;
        self
    }

    pub fn label_match(&self) -> LabelMatch {
        self.label_match
    }

    pub fn chat(&self) -> &ChatRef {
        &self.chat
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn pacer(&self) -> &Pacer {
        &self.pacer
    }

    /// The most recently observed inline keyboard in the chat.
    pub fn last_layout(&self) -> Option<&ButtonLayout> {
        self.events.last_layout()
    }

    /// The transport error that ended this session's event stream, if any.
    pub fn terminal_error(&self) -> Option<&TransportError> {
        self.events.terminal_error()
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_connected() && self.events.terminal_error().is_none()
    }

    /// Replace the event subscription with a fresh one. Buffered events and the
    /// remembered keyboard of the old subscription are discarded.
    pub async fn resubscribe(&mut self) -> TransportResult<()> {
        self.events = listener::subscribe(&*self.transport, &self.chat).await?;
        info!(chat = %self.chat, "session resubscribed");
        Ok(())
    }

    pub(crate) fn events_mut(&mut self) -> &mut EventStream {
        &mut self.events
    }
}
