use crate::pacing::PacingConfig;
use crate::scenario::DEFAULT_STEP_TIMEOUT;
use crate::transport::ChatRef;
use anyhow::{Context, Result};
use std::str::FromStr;
use std::time::Duration;

/// Harness settings loaded from the environment.
///
/// Credentials and session files are the transport's business and are not
/// read here.
#[derive(Debug, Clone, PartialEq)]
pub struct HarnessConfig {
    /// Target bot (`BOT_USERNAME`).
    pub bot: Option<ChatRef>,
    /// Step timeout for scripts that do not set one (`DEFAULT_TIMEOUT`, seconds).
    pub default_timeout: Duration,
    pub pacing: PacingConfig,
    /// Fallback log filter when `RUST_LOG` is unset (`LOG_LEVEL`).
    pub log_level: String,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            bot: None,
            default_timeout: DEFAULT_STEP_TIMEOUT,
            pacing: PacingConfig::default(),
            log_level: "info".to_string(),
        }
    }
}

impl HarnessConfig {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup. Unset or blank keys keep their
    /// defaults; malformed values are errors naming the key.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let defaults = Self::default();
        let pacing = defaults.pacing.clone();

        Ok(Self {
            bot: get("BOT_USERNAME").map(ChatRef::new),
            default_timeout: seconds(&get, "DEFAULT_TIMEOUT", defaults.default_timeout)?,
            pacing: PacingConfig {
                send_delay_min: seconds(&get, "SEND_DELAY_MIN", pacing.send_delay_min)?,
                send_delay_max: seconds(&get, "SEND_DELAY_MAX", pacing.send_delay_max)?,
                rate_max_actions: parsed(&get, "RATE_MAX_ACTIONS", pacing.rate_max_actions)?,
                rate_window: seconds(&get, "RATE_WINDOW_SECONDS", pacing.rate_window)?,
                floodwait_buffer: seconds(&get, "FLOODWAIT_BUFFER_SECONDS", pacing.floodwait_buffer)?,
                peerflood_cooldown: seconds(
                    &get,
                    "PEERFLOOD_COOLDOWN_SECONDS",
                    pacing.peerflood_cooldown,
                )?,
            },
            log_level: get("LOG_LEVEL")
                .map(|v| v.to_lowercase())
                .unwrap_or(defaults.log_level),
        })
    }
}

fn parsed<T>(get: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match get(key) {
        Some(raw) => raw
            .parse()
            .with_context(|| format!("{key} has an invalid value: {raw:?}")),
        None => Ok(default),
    }
}

fn seconds(get: &impl Fn(&str) -> Option<String>, key: &str, default: Duration) -> Result<Duration> {
    let secs: f64 = parsed(get, key, default.as_secs_f64())?;
    Duration::try_from_secs_f64(secs).with_context(|| format!("{key} must be a non-negative number of seconds"))
}
