use std::time::Duration;

use rand::{Rng, SeedableRng, rngs::SmallRng};

use super::types::BackoffConfig;

/// Abstract reconnect strategy driven by a connection session.
pub trait ReconnectStrategy: Send + Sync + 'static {
    /// Delay before the next attempt; advances the strategy.
    fn next_delay(&mut self) -> Duration;
    /// Forget failure history. Called once per successful open.
    fn reset(&mut self);
    /// Failures recorded since the last reset.
    fn attempt(&self) -> u64;
}

/// Exponential backoff reconnect strategy.
///
/// The first failure after a reset waits `base`; every further consecutive failure waits
/// `factor` times longer, clamped to `cap`.
#[derive(Clone, Debug)]
pub struct ExponentialBackoffReconnect {
    base: Duration,
    cap: Duration,
    factor: f64,
    current: Duration,
    attempt: u64,
}

impl ExponentialBackoffReconnect {
    pub fn new(base: Duration, cap: Duration, factor: f64) -> Self {
        let factor = if factor.is_finite() && factor > 1.0 {
            factor
        } else {
            1.5
        };
        let base = base.min(cap);
        Self {
            base,
            cap,
            factor,
            current: base,
            attempt: 0,
        }
    }

    pub fn from_config(cfg: BackoffConfig) -> Self {
        Self::new(cfg.base, cfg.cap, cfg.factor)
    }

    /// Delay the next call to `next_delay` will return.
    pub fn current_delay(&self) -> Duration {
        self.current
    }

    pub fn cap(&self) -> Duration {
        self.cap
    }
}

impl Default for ExponentialBackoffReconnect {
    fn default() -> Self {
        Self::from_config(BackoffConfig::default())
    }
}

impl ReconnectStrategy for ExponentialBackoffReconnect {
    fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = Duration::try_from_secs_f64(self.current.as_secs_f64() * self.factor)
            .map_or(self.cap, |next| next.min(self.cap));
        self.attempt = self.attempt.saturating_add(1);
        delay
    }

    fn reset(&mut self) {
        self.current = self.base;
        self.attempt = 0;
    }

    fn attempt(&self) -> u64 {
        self.attempt
    }
}

/// Scale `base` by a random factor in `[0.5, 1.0]`.
pub fn jitter_delay(base: Duration) -> Duration {
    if base.is_zero() {
        return base;
    }
    let mut rng = SmallRng::from_entropy();
    let jitter: f64 = rng.gen_range(0.5..=1.0);
    let nanos = (base.as_nanos() as f64 * jitter) as u128;
    Duration::from_nanos(nanos.min(u64::MAX as u128) as u64)
}
