//! Correlator: matches incoming events against the step in flight.
//!
//! Exactly one [`PendingExpectation`] is consumed per call to [`await_match`],
//! so each expectation resolves exactly once. Events are taken from the stream
//! in arrival order; anything the matcher rejects is kept as noise for the
//! timeout report.

use crate::error::TransportError;
use crate::event::Event;
use crate::listener::EventStream;
use crate::matcher::Matcher;
use std::time::Duration;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Stand-in for "never": roughly 30 years.
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// `start + wait`, clamped so that huge waits (up to `Duration::MAX`) mean
/// "practically never" instead of overflowing `Instant`.
pub(crate) fn instant_after(start: Instant, wait: Duration) -> Instant {
    start + wait.min(FAR_FUTURE)
}

/// The expectation raised by a sent step.
///
/// The deadline is fixed when the expectation is created, which the action
/// sender does only after the outbound call has returned.
#[derive(Debug, Clone)]
pub struct PendingExpectation {
    matcher: Matcher,
    timeout: Duration,
    deadline: Instant,
}

impl PendingExpectation {
    /// Start the countdown now.
    pub fn new(matcher: Matcher, timeout: Duration) -> Self {
        Self {
            matcher,
            timeout,
            deadline: instant_after(Instant::now(), timeout),
        }
    }

    pub fn matcher(&self) -> &Matcher {
        &self.matcher
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

/// Diagnostic attached to a timed-out step: what was expected and which
/// events arrived without matching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MismatchReport {
    pub expected: Matcher,
    pub waited: Duration,
    pub noise: Vec<Event>,
}

/// How a pending expectation ended.
#[derive(Debug, Clone)]
pub enum Resolution {
    Matched(Event),
    TimedOut(MismatchReport),
    Cancelled,
    /// The event stream ended with a transport error.
    Failed(TransportError),
}

/// Race the event stream against the expectation's deadline and `cancel`.
///
/// Cancellation takes priority: once `cancel` fires, the result is
/// [`Resolution::Cancelled`] even if a matching event is already buffered. The
/// wait holds no subscription of its own, so nothing is left behind when it
/// returns.
pub async fn await_match(
    expectation: PendingExpectation,
    events: &mut EventStream,
    cancel: &CancellationToken,
) -> Resolution {
    let PendingExpectation {
        matcher,
        timeout,
        deadline,
    } = expectation;
    let mut noise = Vec::new();

    let timer = sleep_until(deadline);
    tokio::pin!(timer);

    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                debug!(noise = noise.len(), "expectation cancelled");
                return Resolution::Cancelled;
            }

            next = events.next() => match next {
                Ok(event) if cancel.is_cancelled() => {
                    debug!(%event, "event arrived after cancellation");
                    return Resolution::Cancelled;
                }
                Ok(event) if event.received_at > deadline => {
                    debug!(%event, "event arrived after the deadline");
                    noise.push(event);
                    return timed_out(matcher, timeout, noise);
                }
                Ok(event) if matcher.matches(&event) => {
                    info!("<< {}", event);
                    return Resolution::Matched(event);
                }
                Ok(event) => {
                    debug!(%event, expected = %matcher, "noise");
                    noise.push(event);
                }
                Err(err) => return Resolution::Failed(err),
            },

            _ = &mut timer => return timed_out(matcher, timeout, noise),
        }
    }
}

fn timed_out(expected: Matcher, waited: Duration, noise: Vec<Event>) -> Resolution {
    info!(expected = %expected, noise = noise.len(), "timed out waiting for reply");
    Resolution::TimedOut(MismatchReport {
        expected,
        waited,
        noise,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listener::subscribe;
    use crate::transport::ChatRef;
    use crate::transport::memory::InMemoryTransport;

    async fn setup() -> (EventStream, crate::transport::memory::BotHandle) {
        let (transport, bot) = InMemoryTransport::new();
        let events = subscribe(&transport, &ChatRef::new("bot")).await.unwrap();
        (events, bot)
    }

    #[tokio::test(start_paused = true)]
    async fn test_skips_noise_until_match() {
        let (mut events, bot) = setup().await;
        bot.reply("Loading...").await;
        bot.reply("Welcome, friend").await;

        let pending = PendingExpectation::new(Matcher::text_contains("Welcome"), Duration::from_secs(5));
        let cancel = CancellationToken::new();
        match await_match(pending, &mut events, &cancel).await {
            Resolution::Matched(event) => assert_eq!(event.text(), "Welcome, friend"),
            other => panic!("expected match, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_reports_noise() {
        let (mut events, bot) = setup().await;
        bot.reply("Loading...").await;

        let pending = PendingExpectation::new(Matcher::text_contains("Welcome"), Duration::from_secs(2));
        let cancel = CancellationToken::new();
        let start = Instant::now();
        match await_match(pending, &mut events, &cancel).await {
            Resolution::TimedOut(report) => {
                assert_eq!(report.noise.len(), 1);
                assert_eq!(report.noise[0].text(), "Loading...");
                assert_eq!(report.waited, Duration::from_secs(2));
            }
            other => panic!("expected timeout, got {other:?}"),
        }
        assert!(start.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_any_without_events_times_out() {
        let (mut events, _bot) = setup().await;
        let pending = PendingExpectation::new(Matcher::Any, Duration::from_secs(1));
        let cancel = CancellationToken::new();
        assert!(matches!(
            await_match(pending, &mut events, &cancel).await,
            Resolution::TimedOut(_)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unbounded_timeout_still_matches() {
        let (mut events, bot) = setup().await;
        let pending = PendingExpectation::new(Matcher::Any, Duration::MAX);
        assert!(pending.deadline() > Instant::now());

        bot.reply("eventually").await;
        let cancel = CancellationToken::new();
        assert!(matches!(
            await_match(pending, &mut events, &cancel).await,
            Resolution::Matched(_)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_wins_over_buffered_match() {
        let (mut events, bot) = setup().await;
        bot.reply("Welcome").await;

        let pending = PendingExpectation::new(Matcher::Any, Duration::from_secs(5));
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(matches!(
            await_match(pending, &mut events, &cancel).await,
            Resolution::Cancelled
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_error_fails_expectation() {
        let (mut events, bot) = setup().await;
        bot.disconnect("socket reset").await;

        let pending = PendingExpectation::new(Matcher::Any, Duration::from_secs(5));
        let cancel = CancellationToken::new();
        assert!(matches!(
            await_match(pending, &mut events, &cancel).await,
            Resolution::Failed(TransportError::Disconnected(_))
        ));
    }
}
