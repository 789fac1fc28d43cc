//! Continuous monitor line.
//!
//! With a nonzero period the device prints one status line per period on the
//! host port:
//!
//! ```text
//! 0x0001     1234   12  7 3 G +45.1234 +9.1234
//! ```
//!
//! pending events (`GPS`, `ODO`), pulse count, frequency, satellites in view,
//! fix quality, HDOP grade, then latitude and longitude or `NA NA`.

use crate::protocol::write_fixed;
use core::fmt::{self, Write};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MonitorSnapshot {
    /// `GPS << 8 | ODO`
    pub pending_events: u16,
    pub pulse_count: u32,
    pub frequency: u32,
    pub satellites_in_view: u32,
    pub fix_quality: u32,
    pub hdop_grade: char,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

impl MonitorSnapshot {
    pub fn write_line<W: Write>(&self, out: &mut W) -> fmt::Result {
        write!(
            out,
            "0x{:02X}{:02X} {:8} {:4} {:2} {:1} {} ",
            self.pending_events >> 8,
            self.pending_events & 0xFF,
            self.pulse_count,
            self.frequency,
            self.satellites_in_view,
            self.fix_quality,
            self.hdop_grade,
        )?;
        match (self.latitude, self.longitude) {
            (Some(latitude), Some(longitude)) => {
                write_fixed(out, latitude)?;
                out.write_char(' ')?;
                write_fixed(out, longitude)?;
            }
            _ => out.write_str("NA NA")?,
        }
        out.write_str("\r\n")
    }
}

/// Period bookkeeping. A zero period disables the line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Monitor {
    period_s: u32,
    last_emit_ms: u32,
}

impl Monitor {
    pub fn new(period_s: u32, now_ms: u32) -> Self {
        Self {
            period_s,
            last_emit_ms: now_ms,
        }
    }

    pub fn period(&self) -> u32 {
        self.period_s
    }

    pub fn set_period(&mut self, period_s: u32) {
        self.period_s = period_s;
    }

    pub fn is_due(&self, now_ms: u32) -> bool {
        self.period_s > 0
            && u64::from(now_ms.wrapping_sub(self.last_emit_ms)) >= u64::from(self.period_s) * 1000
    }

    pub fn mark_emitted(&mut self, now_ms: u32) {
        self.last_emit_ms = now_ms;
    }
}
