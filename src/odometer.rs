//! Pulse counter and frequency estimator.
//!
//! The capture interrupt only ever increments [`PulseCounter`]; the loop samples
//! it through [`OdometerEngine::update`] at most every 512 ms.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};
use thiserror::Error;
use tracing::{trace, warn};

/// Samples closer together than `1 << RATE_LIMIT_SHIFT` ms are rejected.
pub const RATE_LIMIT_SHIFT: u32 = 9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum OdometerError {
    #[error("less than 512 ms since the last accepted sample")]
    TooSoon,
    #[error("millisecond clock wrapped, baseline resynchronized")]
    ClockWrapped,
}

/// Cumulative odometer pulse count, shared between the capture interrupt and
/// the loop.
#[derive(Debug, Default)]
pub struct PulseCounter(AtomicU32);

impl PulseCounter {
    pub const fn new(start: u32) -> Self {
        Self(AtomicU32::new(start))
    }

    /// Interrupt side. Wraps at `u32::MAX`.
    pub fn increment(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn load(&self) -> u32 {
        self.0.load(Ordering::Relaxed)
    }

    pub fn store(&self, count: u32) {
        self.0.store(count, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OdometerState {
    /// Pulse count seen at the last accepted sample.
    pub pulse_count: u32,
    pub last_sample_ms: u32,
    pub last_sample_count: u32,
    /// Pulses per second over the last window.
    pub frequency: u32,
    /// `frequency` minus the previous window's frequency.
    pub frequency_delta: i64,
    /// Length of the last window in ms.
    pub elapsed_ms: u32,
}

#[derive(Debug, Clone)]
pub struct OdometerEngine {
    state: OdometerState,
    last_update_ms: u32,
}

impl OdometerEngine {
    pub fn new(now_ms: u32, pulse_count: u32) -> Self {
        Self {
            state: OdometerState {
                pulse_count,
                last_sample_ms: now_ms,
                last_sample_count: pulse_count,
                ..OdometerState::default()
            },
            last_update_ms: now_ms,
        }
    }

    /// Takes a new sample. On success `frequency`, `frequency_delta` and
    /// `elapsed_ms` describe the window that just closed.
    pub fn update(&mut self, now_ms: u32, pulse_count: u32) -> Result<(), OdometerError> {
        if now_ms.wrapping_sub(self.last_update_ms) >> RATE_LIMIT_SHIFT == 0 {
            return Err(OdometerError::TooSoon);
        }
        self.last_update_ms = now_ms;

        if now_ms < self.state.last_sample_ms {
            warn!(
                now_ms,
                baseline_ms = self.state.last_sample_ms,
                "millisecond clock wrapped, skipping odometer sample"
            );
            self.rebase(now_ms, pulse_count);
            return Err(OdometerError::ClockWrapped);
        }

        let elapsed = now_ms - self.state.last_sample_ms;
        let pulses = pulse_count.wrapping_sub(self.state.last_sample_count);
        let frequency = if pulses == 0 || elapsed == 0 {
            0
        } else {
            let hz = u64::from(pulses) * 1000 / u64::from(elapsed);
            u32::try_from(hz).unwrap_or(u32::MAX)
        };

        self.state.frequency_delta = i64::from(frequency) - i64::from(self.state.frequency);
        self.state.frequency = frequency;
        self.state.elapsed_ms = elapsed;
        self.state.pulse_count = pulse_count;
        self.state.last_sample_ms = now_ms;
        self.state.last_sample_count = pulse_count;

        trace!(frequency, delta = self.state.frequency_delta, elapsed, "odometer sample");
        Ok(())
    }

    /// Moves the baseline to a host-written pulse count so the next window
    /// does not see a jump.
    pub fn preset(&mut self, now_ms: u32, pulse_count: u32) {
        self.rebase(now_ms, pulse_count);
    }

    fn rebase(&mut self, now_ms: u32, pulse_count: u32) {
        self.state.last_sample_ms = now_ms;
        self.state.last_sample_count = pulse_count;
        self.state.pulse_count = pulse_count;
    }

    pub fn state(&self) -> &OdometerState {
        &self.state
    }

    pub fn frequency(&self) -> u32 {
        self.state.frequency
    }
}
