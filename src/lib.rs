//! # Vehicle Telemetry Unit
//!
//! Firmware core for a vehicle telemetry unit: it decodes GPS NMEA sentences,
//! turns odometer pulses into a frequency, raises debounced alarms over a host
//! interrupt line and answers a compact line-oriented command protocol.
//!
//! ## Features
//!
//! - **Interrupt-fed ring buffers**: one byte FIFO per UART with line counting
//! - **NMEA decoding**: GLL, VTG, GSA, GSV and RMC, one sentence per loop pass
//! - **Odometer**: wraparound-safe pulse frequency, rate limited to 512 ms
//! - **Alarms**: edge-triggered events with suspend/resume debouncing and
//!   interrupt line auto-release
//! - **Host protocol**: `+AEB=500+QER+\r` style register access
//! - **Embedded-friendly**: fixed buffers, no allocation on the loop path
//!
//! ## Quick Start
//!
//! ```rust
//! use telemetry_unit::{Device, DeviceConfig, ManualClock, PinBank, Port};
//!
//! let clock = ManualClock::new(0);
//! let mut device = Device::new(&DeviceConfig::silent(), clock.clone(), PinBank::new());
//!
//! device.receive(Port::Host, b"+AEB=750+AEB+\r");
//! device.tick();
//! assert_eq!(device.take_host_output().as_str(), "750 \r\nOK\r\n");
//! ```
//!
//! ## Architecture
//!
//! - [`serial`] - ring buffers and per-port service flags
//! - [`gps`] - fix snapshot and NMEA decoder
//! - [`odometer`] - pulse counter and frequency estimator
//! - [`alarm`] - event register and interrupt line
//! - [`protocol`] - command tokenizer, register table and response formatting
//! - [`monitor`] - periodic status line
//! - [`device`] - owned context, interrupt dispatch and the cooperative loop
//! - [`hal`] - clock and pin seams

#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::new_without_default)]

pub mod alarm;
pub mod config;
pub mod device;
pub mod gps;
pub mod hal;
pub mod monitor;
pub mod odometer;
pub mod protocol;
pub mod serial;

pub use alarm::{AlarmEngine, Event, EventClass, GpsEvent, OdometerEvent};
pub use config::DeviceConfig;
pub use device::{Device, Irq, TickReport};
pub use gps::{GpsFix, NmeaDecoder, Sentence};
pub use hal::{Clock, ManualClock, PinBank, Pins};
pub use odometer::{OdometerEngine, OdometerError, PulseCounter};
pub use protocol::{CommandProcessor, ProtocolError};
pub use serial::{Port, SerialChannel};
