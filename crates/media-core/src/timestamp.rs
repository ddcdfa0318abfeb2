//! Wrap-aware timestamp arithmetic
//!
//! Two clocks are in use. RTP-side and buffer timestamps are 32-bit and wrap
//! at `2^32`; the scheduler's wall clock is 48-bit and wraps at
//! [`WALLCLOCK_MASK`]. Ordering between timestamps is always decided on the
//! sign of their modular difference, never with a plain `<`.

use crate::error::{Error, Result};

/// Wall clock timestamps wrap at 48 bits
pub const WALLCLOCK_MASK: u64 = 0xFFFF_FFFF_FFFF;

/// Default wall clock tick
pub const DEFAULT_TICK_MS: u64 = 10;

/// Default system sample clock (Hz)
pub const SYSTEM_SAMPLECLOCK_RATE: u32 = 32_000;

/// `l` precedes `r` on the 32-bit circle
#[inline]
pub fn ts_less(l: u32, r: u32) -> bool {
    l.wrapping_sub(r) > 1 << 31
}

/// `l` precedes `r` on the 48-bit wall clock circle
#[inline]
pub fn sys_ts_less(l: u64, r: u64) -> bool {
    (l.wrapping_sub(r) & WALLCLOCK_MASK) > 1 << 47
}

/// Synthetic wall clock advanced once per scheduler tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WallClock {
    now: u64,
    increment: u64,
}

impl WallClock {
    /// Clock advancing `tick_ms * sample_rate / 1000` samples per tick
    pub fn new(tick_ms: u64, sample_rate: u32) -> Result<Self> {
        let increment = tick_ms * u64::from(sample_rate) / 1000;
        if increment == 0 {
            return Err(Error::InvalidConfig(format!(
                "tick of {} ms at {} Hz advances the clock by zero samples",
                tick_ms, sample_rate
            )));
        }
        Ok(WallClock { now: 0, increment })
    }

    /// Start counting from `ts` instead of zero
    pub fn starting_at(mut self, ts: u64) -> Self {
        self.now = ts & WALLCLOCK_MASK;
        self
    }

    pub fn now(&self) -> u64 {
        self.now
    }

    /// Samples per tick
    pub fn increment(&self) -> u64 {
        self.increment
    }

    /// Move to the next tick and return the new timestamp
    pub fn advance(&mut self) -> u64 {
        self.now = (self.now + self.increment) & WALLCLOCK_MASK;
        self.now
    }
}

impl Default for WallClock {
    fn default() -> Self {
        WallClock {
            now: 0,
            increment: DEFAULT_TICK_MS * u64::from(SYSTEM_SAMPLECLOCK_RATE) / 1000,
        }
    }
}
