//! Action sender: turns a [`Step`] into an outbound call against the chat.
//!
//! | Step kind | Transport call |
//! |-----------|----------------|
//! | `SendText` | `send_text` with the payload |
//! | `SendCommand` | `send_text` with `/payload` |
//! | `TapButton` | `invoke_callback` on the last keyboard's matching button |
//!
//! The reply countdown starts only after the call returns, so pacing and
//! delivery latency never count against the bot.

mod tap;
mod text;

pub use text::format_command;

use crate::correlator::PendingExpectation;
use crate::error::StepError;
use crate::matcher::Expect;
use crate::scenario::{Step, StepKind};
use crate::session::Session;
use crate::transport::Transport;
use tracing::debug;

/// Send `step` and return the expectation to wait on, or `None` when the step
/// expects no reply.
///
/// Events that arrived since the previous step are drained first: they are
/// logged as noise and refresh the remembered keyboard before a tap is resolved.
pub async fn send<T>(session: &mut Session<T>, step: &Step) -> Result<Option<PendingExpectation>, StepError>
where
    T: Transport + ?Sized,
{
    for event in session.events_mut().drain() {
        debug!(%event, "noise between steps");
    }
    if let Some(err) = session.terminal_error() {
        return Err(err.clone().into());
    }

    let sent = match step.kind {
        StepKind::SendText => text::send_text(session, &step.payload).await,
        StepKind::SendCommand => text::send_command(session, &step.payload).await,
        StepKind::TapButton => tap::tap_button(session, &step.payload).await,
    };
    if let Err(StepError::Transport(err)) = &sent {
        session.pacer().observe_error(err).await;
    }
    sent?;

    Ok(match &step.expect {
        Expect::Reply(matcher) => Some(PendingExpectation::new(matcher.clone(), step.timeout)),
        Expect::NoReply => None,
    })
}
