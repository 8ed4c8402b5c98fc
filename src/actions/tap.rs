use crate::error::StepError;
use crate::session::Session;
use crate::transport::Transport;
use tracing::info;

/// Press the button labelled `label` on the last keyboard seen in the chat.
///
/// The lookup happens before pacing and before any network call, so a missing
/// label costs nothing on the wire.
pub(super) async fn tap_button<T>(session: &Session<T>, label: &str) -> Result<(), StepError>
where
    T: Transport + ?Sized,
{
    let (message_id, data) = {
        let layout = session.last_layout();
        let button = layout.and_then(|l| l.find(label, session.label_match()));
        match (layout, button) {
            (Some(layout), Some(button)) => (layout.message_id, button.data.clone()),
            (layout, _) => {
                return Err(StepError::ButtonNotFound {
                    label: label.to_string(),
                    available: layout
                        .map(|l| l.labels().map(str::to_string).collect())
                        .unwrap_or_default(),
                });
            }
        }
    };

    session.pacer().before_action().await;
    info!(chat = %session.chat(), message_id, "** tap {:?}", label);
    session
        .transport()
        .invoke_callback(session.chat(), message_id, &data)
        .await?;
    Ok(())
}
