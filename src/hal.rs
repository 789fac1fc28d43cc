//! Collaborator interfaces consumed by the core: the millisecond clock and
//! digital pins. Register-level drivers live outside this crate; the types
//! here are the seams they plug into.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Monotonic millisecond source. Wraps at `u32::MAX`.
pub trait Clock {
    fn millis(&self) -> u32;
}

/// Logical pins driven by the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Pin {
    /// Host interrupt request, active low, open drain.
    IntReq,
    GpsPower,
    GpsAntennaPower,
    /// Toggled on each decoded NMEA sentence.
    GpsActivityLed,
    /// Lit while any event is pending.
    EventLed,
    /// Lit while the vehicle is moving.
    MotionLed,
}

pub const PIN_COUNT: usize = 6;

impl Pin {
    pub const ALL: [Pin; PIN_COUNT] = [
        Pin::IntReq,
        Pin::GpsPower,
        Pin::GpsAntennaPower,
        Pin::GpsActivityLed,
        Pin::EventLed,
        Pin::MotionLed,
    ];

    fn index(self) -> usize {
        self as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PinMode {
    Input,
    Output,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Level {
    Low,
    High,
}

impl Level {
    #[must_use]
    pub fn toggled(self) -> Self {
        match self {
            Level::Low => Level::High,
            Level::High => Level::Low,
        }
    }
}

pub trait Pins {
    fn pin_mode(&mut self, pin: Pin, mode: PinMode);
    fn digital_write(&mut self, pin: Pin, level: Level);
}

/// Clock driven by hand. Clones share the same counter, so a test can keep a
/// handle and advance time while the device owns another.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicU32>,
}

impl ManualClock {
    pub fn new(start_ms: u32) -> Self {
        Self {
            now: Arc::new(AtomicU32::new(start_ms)),
        }
    }

    pub fn set(&self, ms: u32) {
        self.now.store(ms, Ordering::Relaxed);
    }

    pub fn advance(&self, ms: u32) {
        let now = self.now.load(Ordering::Relaxed);
        self.now.store(now.wrapping_add(ms), Ordering::Relaxed);
    }
}

impl Clock for ManualClock {
    fn millis(&self) -> u32 {
        self.now.load(Ordering::Relaxed)
    }
}

/// In-memory pin state. Used by the simulator and by tests to observe what
/// the core drove.
#[derive(Debug, Clone)]
pub struct PinBank {
    modes: [PinMode; PIN_COUNT],
    levels: [Level; PIN_COUNT],
    writes: u32,
}

impl PinBank {
    pub fn new() -> Self {
        Self {
            modes: [PinMode::Input; PIN_COUNT],
            levels: [Level::Low; PIN_COUNT],
            writes: 0,
        }
    }

    pub fn mode(&self, pin: Pin) -> PinMode {
        self.modes[pin.index()]
    }

    pub fn level(&self, pin: Pin) -> Level {
        self.levels[pin.index()]
    }

    /// The interrupt line is asserted while its pin is driven as an output.
    pub fn interrupt_asserted(&self) -> bool {
        self.mode(Pin::IntReq) == PinMode::Output
    }

    pub fn write_count(&self) -> u32 {
        self.writes
    }
}

impl Default for PinBank {
    fn default() -> Self {
        Self::new()
    }
}

impl Pins for PinBank {
    fn pin_mode(&mut self, pin: Pin, mode: PinMode) {
        self.modes[pin.index()] = mode;
    }

    fn digital_write(&mut self, pin: Pin, level: Level) {
        self.levels[pin.index()] = level;
        self.writes = self.writes.wrapping_add(1);
    }
}
