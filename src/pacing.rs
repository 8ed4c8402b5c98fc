//! Pacing of outbound actions.
//!
//! Telegram throttles user accounts that act too fast. Every action passes
//! through a [`Pacer`] first: a circuit breaker that holds all actions during a
//! flood cooldown, a sliding-window rate limiter, and a small random delay.

use crate::correlator::instant_after;
use crate::error::TransportError;
use rand::Rng;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{Instant, sleep, sleep_until};
use tracing::warn;

/// Tunables for [`Pacer`].
#[derive(Debug, Clone, PartialEq)]
pub struct PacingConfig {
    pub send_delay_min: Duration,
    pub send_delay_max: Duration,
    pub rate_max_actions: usize,
    pub rate_window: Duration,
    /// Added on top of the wait Telegram asks for.
    pub floodwait_buffer: Duration,
    pub peerflood_cooldown: Duration,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            send_delay_min: Duration::from_millis(150),
            send_delay_max: Duration::from_millis(450),
            rate_max_actions: 15,
            rate_window: Duration::from_secs(60),
            floodwait_buffer: Duration::from_secs(2),
            peerflood_cooldown: Duration::from_secs(6 * 60 * 60),
        }
    }
}

/// Sliding window limiter: at most `max_actions` per `window`.
pub struct RateLimiter {
    max_actions: usize,
    window: Duration,
    stamps: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(max_actions: usize, window: Duration) -> Self {
        Self {
            max_actions: max_actions.max(1),
            window: window.max(Duration::from_secs(1)),
            stamps: Mutex::new(VecDeque::new()),
        }
    }

    /// Wait until one more action fits in the window, then record it.
    pub async fn acquire(&self) {
        let mut stamps = self.stamps.lock().await;
        self.evict(&mut stamps);

        if stamps.len() >= self.max_actions {
            if let Some(oldest) = stamps.front().copied() {
                let ready_at = instant_after(oldest, self.window);
                warn!(
                    wait_ms = ready_at.saturating_duration_since(Instant::now()).as_millis() as u64,
                    "rate limit reached, holding action"
                );
                sleep_until(ready_at).await;
            }
            self.evict(&mut stamps);
        }

        stamps.push_back(Instant::now());
    }

    fn evict(&self, stamps: &mut VecDeque<Instant>) {
        let now = Instant::now();
        while stamps
            .front()
            .is_some_and(|t| now.saturating_duration_since(*t) >= self.window)
        {
            stamps.pop_front();
        }
    }
}

/// Global cooldown gate, opened after flood errors.
#[derive(Default)]
pub struct CircuitBreaker {
    until: Mutex<Option<Instant>>,
}

impl CircuitBreaker {
    /// Sleep while the breaker is open.
    pub async fn wait_if_open(&self) {
        let until = *self.until.lock().await;
        if let Some(until) = until {
            if until > Instant::now() {
                sleep_until(until).await;
            }
        }
    }

    /// Keep the breaker open for at least `duration` from now.
    pub async fn open_for(&self, duration: Duration) {
        let candidate = instant_after(Instant::now(), duration);
        let mut until = self.until.lock().await;
        *until = Some(until.map_or(candidate, |u| u.max(candidate)));
    }

    pub async fn is_open(&self) -> bool {
        self.until.lock().await.is_some_and(|u| u > Instant::now())
    }
}

struct Inner {
    limiter: Option<RateLimiter>,
    breaker: CircuitBreaker,
    jitter: Option<(Duration, Duration)>,
    floodwait_buffer: Duration,
    peerflood_cooldown: Duration,
}

/// Shared pacing state for one account. Clones share the same limiter and
/// breaker, so sessions on the same account throttle together.
#[derive(Clone)]
pub struct Pacer {
    inner: Arc<Inner>,
}

impl Pacer {
    pub fn new(config: &PacingConfig) -> Self {
        let min = config.send_delay_min;
        let max = config.send_delay_max.max(min);
        Self {
            inner: Arc::new(Inner {
                limiter: Some(RateLimiter::new(config.rate_max_actions, config.rate_window)),
                breaker: CircuitBreaker::default(),
                jitter: (!max.is_zero()).then_some((min, max)),
                floodwait_buffer: config.floodwait_buffer,
                peerflood_cooldown: config.peerflood_cooldown,
            }),
        }
    }

    /// A pacer that never delays. Flood errors still open the breaker.
    pub fn unpaced() -> Self {
        Self {
            inner: Arc::new(Inner {
                limiter: None,
                breaker: CircuitBreaker::default(),
                jitter: None,
                floodwait_buffer: Duration::ZERO,
                peerflood_cooldown: Duration::ZERO,
            }),
        }
    }

    /// Wait until the next action may be sent.
    pub async fn before_action(&self) {
        self.inner.breaker.wait_if_open().await;
        if let Some(limiter) = &self.inner.limiter {
            limiter.acquire().await;
        }
        if let Some((min, max)) = self.inner.jitter {
            // Drop rng before the await so it does not cross the yield point.
            let delay = {
                let mut rng = rand::thread_rng();
                rng.gen_range(min..=max)
            };
            sleep(delay).await;
        }
    }

    /// Open the breaker when the transport reports a flood condition.
    pub async fn observe_error(&self, err: &TransportError) {
        let cooldown = match err {
            TransportError::FloodWait { seconds } | TransportError::SlowModeWait { seconds } => {
                Duration::from_secs(*seconds).saturating_add(self.inner.floodwait_buffer)
            }
            TransportError::PeerFlood => self.inner.peerflood_cooldown,
            _ => return,
        };
        warn!(error = %err, cooldown_s = cooldown.as_secs_f64(), "opening circuit breaker");
        self.inner.breaker.open_for(cooldown).await;
    }

    pub async fn is_cooling_down(&self) -> bool {
        self.inner.breaker.is_open().await
    }
}

impl Default for Pacer {
    fn default() -> Self {
        Self::new(&PacingConfig::default())
    }
}
