use crate::transport::{MessageId, RawMessage, RawUpdate};
use std::collections::BTreeSet;
use std::fmt;
use tokio::time::Instant;

/// What kind of inbound observation an [`Event`] is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// A new message from the bot.
    TextMessage,
    /// The bot answered a button press.
    CallbackAck,
    /// The bot edited one of its earlier messages.
    Edit,
}

/// A single inline keyboard button.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Button {
    pub label: String,
    pub data: Vec<u8>,
}

/// How a tapped label is compared with the labels on a keyboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LabelMatch {
    /// The label must equal a button's label exactly.
    #[default]
    Exact,
    /// Also accept a whitespace-collapsed, case-insensitive match.
    Normalized,
}

/// The inline keyboard attached to a bot message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ButtonLayout {
    pub message_id: MessageId,
    pub rows: Vec<Vec<Button>>,
}

impl ButtonLayout {
    fn from_message(msg: &RawMessage) -> Option<Self> {
        let rows: Vec<Vec<Button>> = msg
            .buttons
            .iter()
            .map(|row| {
                row.iter()
                    .map(|b| Button {
                        label: b.text.clone(),
                        data: b.data.clone(),
                    })
                    .collect::<Vec<_>>()
            })
            .filter(|row| !row.is_empty())
            .collect();
        if rows.is_empty() {
            return None;
        }
        Some(Self {
            message_id: msg.id,
            rows,
        })
    }

    /// All button labels, row by row.
    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.rows.iter().flatten().map(|b| b.label.as_str())
    }

    /// Labels as an order-independent set.
    pub fn label_set(&self) -> BTreeSet<&str> {
        self.labels().collect()
    }

    /// Find a button by label. With [`LabelMatch::Normalized`], a label with no
    /// exact match may still match after collapsing whitespace and case.
    pub fn find(&self, label: &str, mode: LabelMatch) -> Option<&Button> {
        let mut buttons = self.rows.iter().flatten();
        if let Some(b) = buttons.clone().find(|b| b.label == label) {
            return Some(b);
        }
        match mode {
            LabelMatch::Exact => None,
            LabelMatch::Normalized => {
                let want = normalize_label(label);
                buttons.find(|b| normalize_label(&b.label) == want)
            }
        }
    }
}

fn normalize_label(s: &str) -> String {
    s.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// A normalized inbound observation from the chat under test.
///
/// A message with an attached keyboard yields a single event carrying both
/// the text and the [`ButtonLayout`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub kind: EventKind,
    pub message_id: MessageId,
    pub text: Option<String>,
    pub layout: Option<ButtonLayout>,
    /// Set only for callback answers shown as a modal alert.
    pub alert: bool,
    pub received_at: Instant,
}

impl Event {
    pub fn from_update(update: RawUpdate, received_at: Instant) -> Self {
        match update {
            RawUpdate::NewMessage(msg) => Self::from_message(EventKind::TextMessage, msg, received_at),
            RawUpdate::MessageEdited(msg) => Self::from_message(EventKind::Edit, msg, received_at),
            RawUpdate::CallbackAnswer {
                message_id,
                text,
                alert,
            } => Event {
                kind: EventKind::CallbackAck,
                message_id,
                text,
                layout: None,
                alert,
                received_at,
            },
        }
    }

    fn from_message(kind: EventKind, msg: RawMessage, received_at: Instant) -> Self {
        let layout = ButtonLayout::from_message(&msg);
        Event {
            kind,
            message_id: msg.id,
            text: Some(msg.text),
            layout,
            alert: false,
            received_at,
        }
    }

    /// The event text, or an empty string.
    pub fn text(&self) -> &str {
        self.text.as_deref().unwrap_or("")
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            EventKind::TextMessage => "message",
            EventKind::CallbackAck => "callback",
            EventKind::Edit => "edit",
        };
        write!(f, "[{kind} #{}] {:?}", self.message_id, self.text())?;
        if let Some(layout) = &self.layout {
            write!(f, " [{}]", layout.labels().collect::<Vec<_>>().join("|"))?;
        }
        Ok(())
    }
}
