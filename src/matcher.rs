//! Reply matchers: what a step accepts as the bot's answer.

use crate::event::{Event, EventKind};
use std::collections::BTreeSet;
use std::fmt;

/// Describes the reply a step accepts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Matcher {
    /// A new text message containing this substring (case-sensitive).
    TextContains(String),
    /// Any event carrying a keyboard whose label set equals this set.
    ButtonSetEquals(BTreeSet<String>),
    /// The first event of any kind.
    Any,
}

impl Matcher {
    pub fn text_contains(needle: impl Into<String>) -> Self {
        Matcher::TextContains(needle.into())
    }

    pub fn buttons<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Matcher::ButtonSetEquals(labels.into_iter().map(Into::into).collect())
    }

    pub fn matches(&self, event: &Event) -> bool {
        match self {
            Matcher::TextContains(needle) => match event.kind {
                EventKind::TextMessage => event.text().contains(needle.as_str()),
                EventKind::CallbackAck | EventKind::Edit => false,
            },
            Matcher::ButtonSetEquals(labels) => event.layout.as_ref().is_some_and(|layout| {
                let seen = layout.label_set();
                seen.len() == labels.len() && labels.iter().all(|l| seen.contains(l.as_str()))
            }),
            Matcher::Any => true,
        }
    }
}

impl fmt::Display for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Matcher::TextContains(needle) => write!(f, "text contains {needle:?}"),
            Matcher::ButtonSetEquals(labels) => write!(f, "buttons {labels:?}"),
            Matcher::Any => f.write_str("any reply"),
        }
    }
}

/// What a step waits for after its action has been sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expect {
    /// Wait for an event accepted by the matcher, until the step timeout.
    Reply(Matcher),
    /// Do not wait at all: the step succeeds as soon as the action is sent.
    NoReply,
}

impl Default for Expect {
    fn default() -> Self {
        Expect::Reply(Matcher::Any)
    }
}

impl fmt::Display for Expect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expect::Reply(matcher) => matcher.fmt(f),
            Expect::NoReply => f.write_str("no reply"),
        }
    }
}
