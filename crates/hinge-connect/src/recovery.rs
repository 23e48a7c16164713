use std::time::Duration;

use hinge_settings::{RecoverySettings, RecoveryStrategy};

/// Per-wallet reconnect policy.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecoveryOptions {
    pub auto_reconnect: bool,
    pub strategy: RecoveryStrategy,
    /// Ceiling on connect attempts in one streak, the initial one included.
    pub max_attempts: u32,
    pub interval: Duration,
}

impl Default for RecoveryOptions {
    fn default() -> Self {
        Self::from(&RecoverySettings::default())
    }
}

impl From<&RecoverySettings> for RecoveryOptions {
    fn from(settings: &RecoverySettings) -> Self {
        Self {
            auto_reconnect: settings.auto_reconnect,
            strategy: settings.strategy,
            max_attempts: settings.max_reconnect_attempts,
            interval: Duration::from_millis(settings.reconnect_interval_ms),
        }
    }
}

/// Delay before retry number `retry` (0 for the first retry of a streak).
pub fn recovery_delay(strategy: RecoveryStrategy, base: Duration, retry: u32) -> Duration {
    match strategy {
        RecoveryStrategy::Immediate => Duration::ZERO,
        RecoveryStrategy::LinearBackoff => base.saturating_mul(retry.saturating_add(1)),
        RecoveryStrategy::ExponentialBackoff => {
            let factor = 2u32.checked_pow(retry).unwrap_or(u32::MAX);
            base.saturating_mul(factor)
        }
    }
}
