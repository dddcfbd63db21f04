//! Monotonic tick clock
//!
//! Ticks are nanoseconds since the first clock read in this process, so the
//! frequency is fixed at 1 GHz. Analysis code should still take the frequency
//! from the session rather than assume it.

use std::sync::OnceLock;
use std::time::Instant;

/// Ticks per second.
pub const FREQUENCY: i64 = 1_000_000_000;

static EPOCH: OnceLock<Instant> = OnceLock::new();

/// Current monotonic timestamp in ticks.
#[inline]
#[must_use]
pub fn now() -> i64 {
    let epoch = EPOCH.get_or_init(Instant::now);
    // Saturates after ~292 years of process uptime.
    i64::try_from(epoch.elapsed().as_nanos()).unwrap_or(i64::MAX)
}

/// Converts raw tick counts to wall units.
///
/// Every conversion is a single multiply-divide, so totals accumulated in
/// ticks keep their precision until display.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickConverter {
    frequency: i64,
}

// Tick counts stay far below 2^52 for any realistic session
#[allow(clippy::cast_precision_loss)]
impl TickConverter {
    #[must_use]
    pub const fn new(frequency: i64) -> Self {
        Self { frequency: if frequency > 0 { frequency } else { FREQUENCY } }
    }

    #[must_use]
    pub const fn frequency(self) -> i64 {
        self.frequency
    }

    /// Convert to milliseconds (f64)
    #[must_use]
    pub fn to_millis(self, ticks: i64) -> f64 {
        ticks as f64 * 1_000.0 / self.frequency as f64
    }

    /// Convert to microseconds (f64)
    #[must_use]
    pub fn to_micros(self, ticks: i64) -> f64 {
        ticks as f64 * 1_000_000.0 / self.frequency as f64
    }

    /// Number of ticks in `seconds` whole seconds.
    #[must_use]
    pub const fn per_seconds(self, seconds: i64) -> i64 {
        self.frequency.saturating_mul(seconds)
    }
}

impl Default for TickConverter {
    fn default() -> Self {
        Self::new(FREQUENCY)
    }
}
