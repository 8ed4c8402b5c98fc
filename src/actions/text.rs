use crate::error::StepError;
use crate::session::Session;
use crate::transport::Transport;
use tracing::info;

/// Format a command payload as a slash command: `start` and `/start` both
/// become `/start`; arguments are kept.
pub fn format_command(payload: &str) -> String {
    format!("/{}", payload.trim().trim_start_matches('/'))
}

pub(super) async fn send_text<T>(session: &Session<T>, text: &str) -> Result<(), StepError>
where
    T: Transport + ?Sized,
{
    session.pacer().before_action().await;
    info!(chat = %session.chat(), ">> {}", text);
    session.transport().send_text(session.chat(), text).await?;
    Ok(())
}

pub(super) async fn send_command<T>(session: &Session<T>, payload: &str) -> Result<(), StepError>
where
    T: Transport + ?Sized,
{
    send_text(session, &format_command(payload)).await
}
