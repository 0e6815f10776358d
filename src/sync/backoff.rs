use std::time::Duration;

/// Default delay used after the first failed update pass.
pub const DEFAULT_RETRY_BASE: Duration = Duration::from_secs(5);
/// Ceiling the retry delay never exceeds.
pub const DEFAULT_RETRY_MAX: Duration = Duration::from_secs(60);
/// Growth factor applied after each consecutive failure.
pub const DEFAULT_RETRY_MULTIPLIER: u32 = 2;

/// Tracks the backoff interval between failed update passes.
///
/// The delay sequence is `base, base*m, base*m^2, ...` capped at `max`. Once the
/// cap is reached it stays there until [`RetryTimer::reset`] is called. There is
/// no terminal state: a retry is always scheduled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryTimer {
    base: Duration,
    max: Duration,
    multiplier: u32,
    current: Duration,
}

impl Default for RetryTimer {
    fn default() -> Self {
        Self::new(DEFAULT_RETRY_BASE, DEFAULT_RETRY_MAX, DEFAULT_RETRY_MULTIPLIER)
    }
}

impl RetryTimer {
    /// Builds a timer starting at `base`.
    ///
    /// `max` is raised to `base` if smaller and a zero multiplier is treated as 1 so
    /// `base <= current <= max` holds from construction on.
    pub fn new(base: Duration, max: Duration, multiplier: u32) -> Self {
        let max = max.max(base);
        Self {
            base,
            max,
            multiplier: multiplier.max(1),
            current: base,
        }
    }

    pub fn base(&self) -> Duration {
        self.base
    }

    pub fn max(&self) -> Duration {
        self.max
    }

    pub fn multiplier(&self) -> u32 {
        self.multiplier
    }

    /// Delay the next failure will be scheduled with.
    pub fn current(&self) -> Duration {
        self.current
    }

    /// True once at least one consecutive failure has pushed the interval past `base`.
    pub fn is_escalated(&self) -> bool {
        self.current > self.base
    }

    /// Returns the delay to wait after this failure and escalates for the next one.
    pub fn on_failure(&mut self) -> Duration {
        let delay = self.current;
        self.current = next_backoff(self.current, self.multiplier, self.max);
        delay
    }

    /// Drops back to `base` after a fully successful attempt.
    pub fn reset(&mut self) {
        self.current = self.base;
    }
}

fn next_backoff(current: Duration, multiplier: u32, max_backoff: Duration) -> Duration {
    if current.is_zero() {
        return max_backoff.min(Duration::from_millis(1));
    }

    let mut next = current.saturating_mul(multiplier);
    if next > max_backoff {
        next = max_backoff;
    }
    next
}
