//! Debounced event notification over the host interrupt line.
//!
//! Events are grouped in two classes, each an 8-bit mask with three planes:
//! `active` (host enabled), `pending` (raised, not yet read) and `suspended`
//! (notified once, waiting for the reverse condition). The line is asserted on
//! the first pending bit and released when the host reads the register, when
//! both classes are acknowledged, or when the timeout expires.

use crate::gps::GpsFix;
use crate::hal::{Level, Pin, PinMode, Pins};
use crate::odometer::OdometerState;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

pub const DEFAULT_ODOMETER_MASK: u8 = 0x3F;
pub const DEFAULT_GPS_MASK: u8 = 0x03;
pub const DEFAULT_INTERRUPT_TIMEOUT_MS: u32 = 30_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventClass {
    Odometer = 0,
    Gps = 1,
}

impl EventClass {
    fn index(self) -> usize {
        self as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OdometerEvent {
    Move = 0,
    Stop = 1,
    OverSpeed = 2,
    EmergencyBrake = 3,
    SafeSpeed = 4,
    Distance = 5,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GpsEvent {
    FixAcquired = 0,
    FixLost = 1,
    /// Reserved, never raised.
    Move = 2,
    /// Reserved, never raised.
    Stop = 3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    Odometer(OdometerEvent),
    Gps(GpsEvent),
}

impl Event {
    pub fn class(self) -> EventClass {
        match self {
            Event::Odometer(_) => EventClass::Odometer,
            Event::Gps(_) => EventClass::Gps,
        }
    }

    pub fn mask(self) -> u8 {
        match self {
            Event::Odometer(e) => 1 << e as u8,
            Event::Gps(e) => 1 << e as u8,
        }
    }
}

impl From<OdometerEvent> for Event {
    fn from(event: OdometerEvent) -> Self {
        Event::Odometer(event)
    }
}

impl From<GpsEvent> for Event {
    fn from(event: GpsEvent) -> Self {
        Event::Gps(event)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRegister {
    pub active: [u8; 2],
    pub pending: [u8; 2],
    pub suspended: [u8; 2],
}

impl EventRegister {
    pub fn new(odometer_mask: u8, gps_mask: u8) -> Self {
        Self {
            active: [odometer_mask, gps_mask],
            pending: [0; 2],
            suspended: [0; 2],
        }
    }

    pub fn pending(&self, class: EventClass) -> u8 {
        self.pending[class.index()]
    }

    pub fn active(&self, class: EventClass) -> u8 {
        self.active[class.index()]
    }

    pub fn is_suspended(&self, event: Event) -> bool {
        self.suspended[event.class().index()] & event.mask() != 0
    }

    pub fn any_pending(&self) -> bool {
        self.pending.iter().any(|&p| p != 0)
    }

    /// Pending bits packed as `GPS << 8 | ODO`.
    pub fn snapshot(&self) -> u16 {
        u16::from(self.pending(EventClass::Gps)) << 8 | u16::from(self.pending(EventClass::Odometer))
    }

    fn suspend(&mut self, event: Event) {
        self.suspended[event.class().index()] |= event.mask();
    }

    fn resume(&mut self, event: Event) {
        self.suspended[event.class().index()] &= !event.mask();
    }
}

impl Default for EventRegister {
    fn default() -> Self {
        Self::new(DEFAULT_ODOMETER_MASK, DEFAULT_GPS_MASK)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LineState {
    Idle,
    Asserted,
}

/// Active-low open-drain request line: asserted by driving the pin low as an
/// output, idle by releasing it as an input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterruptLine {
    state: LineState,
    deadline: Option<u32>,
}

impl InterruptLine {
    pub fn new() -> Self {
        Self {
            state: LineState::Idle,
            deadline: None,
        }
    }

    pub fn state(&self) -> LineState {
        self.state
    }

    pub fn is_asserted(&self) -> bool {
        self.state == LineState::Asserted
    }

    pub fn deadline(&self) -> Option<u32> {
        self.deadline
    }

    fn assert<P: Pins>(&mut self, pins: &mut P, now_ms: u32, timeout_ms: u32) {
        pins.digital_write(Pin::IntReq, Level::Low);
        pins.pin_mode(Pin::IntReq, PinMode::Output);
        self.state = LineState::Asserted;
        self.deadline = (timeout_ms > 0).then(|| now_ms.wrapping_add(timeout_ms));
    }

    fn release<P: Pins>(&mut self, pins: &mut P) {
        pins.pin_mode(Pin::IntReq, PinMode::Input);
        self.state = LineState::Idle;
        self.deadline = None;
    }

    /// Deadline strictly passed, compared on the wrapping clock.
    fn expired(&self, now_ms: u32) -> bool {
        match (self.state, self.deadline) {
            (LineState::Asserted, Some(deadline)) => (now_ms.wrapping_sub(deadline) as i32) > 0,
            _ => false,
        }
    }
}

impl Default for InterruptLine {
    fn default() -> Self {
        Self::new()
    }
}

/// Host-tunable thresholds. Zero disables the corresponding check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlarmConfig {
    /// Pulses per second above which `OverSpeed` fires.
    pub over_speed: u32,
    /// Deceleration in pulses/s² above which `EmergencyBrake` fires.
    pub emergency_brake: u32,
    /// Pulses between `Distance` events.
    pub distance_interval: u32,
    pub interrupt_timeout_ms: u32,
}

impl Default for AlarmConfig {
    fn default() -> Self {
        Self {
            over_speed: 0,
            emergency_brake: 0,
            distance_interval: 0,
            interrupt_timeout_ms: DEFAULT_INTERRUPT_TIMEOUT_MS,
        }
    }
}

/// What one alarm evaluation looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlarmInputs {
    pub frequency: u32,
    pub frequency_delta: i64,
    pub elapsed_ms: u32,
    /// Live pulse count, for distance marks.
    pub pulse_count: u32,
    pub has_fix: bool,
}

impl AlarmInputs {
    pub fn new(odometer: &OdometerState, pulse_count: u32, fix: &GpsFix) -> Self {
        Self {
            frequency: odometer.frequency,
            frequency_delta: odometer.frequency_delta,
            elapsed_ms: odometer.elapsed_ms,
            pulse_count,
            has_fix: fix.quality.has_fix(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AlarmEngine {
    config: AlarmConfig,
    register: EventRegister,
    line: InterruptLine,
    previous_frequency: u32,
    previous_fix: bool,
    next_distance_mark: u32,
    notifications: u32,
    timeouts: u32,
}

impl AlarmEngine {
    pub fn new(config: AlarmConfig, register: EventRegister, pulse_count: u32) -> Self {
        Self {
            config,
            register,
            line: InterruptLine::new(),
            previous_frequency: 0,
            previous_fix: false,
            next_distance_mark: pulse_count.wrapping_add(config.distance_interval),
            notifications: 0,
            timeouts: 0,
        }
    }

    /// Raises `event`. Inactive events are ignored. The line is asserted, and
    /// its deadline re-armed, only when the bit was not already pending.
    pub fn notify<P: Pins>(&mut self, event: Event, now_ms: u32, pins: &mut P) {
        let class = event.class().index();
        let mask = event.mask();

        if self.register.active[class] & mask == 0 {
            debug!(?event, "event disabled, not raised");
            return;
        }
        if self.register.pending[class] & mask != 0 {
            return;
        }

        self.register.pending[class] |= mask;
        self.notifications = self.notifications.wrapping_add(1);
        self.line.assert(pins, now_ms, self.config.interrupt_timeout_ms);
        info!(?event, deadline = ?self.line.deadline(), "event raised, interrupt line asserted");
    }

    /// One evaluation pass. Runs every loop iteration.
    pub fn check<P: Pins>(&mut self, inputs: &AlarmInputs, now_ms: u32, pins: &mut P) {
        self.check_motion(inputs, now_ms, pins);
        self.check_emergency_brake(inputs, now_ms, pins);
        self.check_speed_limit(inputs, now_ms, pins);
        self.check_fix(inputs, now_ms, pins);
        self.check_distance(inputs, now_ms, pins);

        let led = if self.register.any_pending() { Level::High } else { Level::Low };
        pins.digital_write(Pin::EventLed, led);

        // Writing a zero timeout also holds a line asserted under the old one.
        if self.config.interrupt_timeout_ms != 0 && self.line.expired(now_ms) {
            self.timeouts = self.timeouts.wrapping_add(1);
            warn!(
                pending = self.register.snapshot(),
                "interrupt not serviced before timeout, dropping pending events"
            );
            self.register.pending = [0; 2];
            self.line.release(pins);
        }
    }

    fn check_motion<P: Pins>(&mut self, inputs: &AlarmInputs, now_ms: u32, pins: &mut P) {
        let frequency = inputs.frequency;
        if self.previous_frequency == 0 && frequency > 0 {
            self.notify(OdometerEvent::Move.into(), now_ms, pins);
            pins.digital_write(Pin::MotionLed, Level::High);
        } else if self.previous_frequency > 0 && frequency == 0 {
            self.notify(OdometerEvent::Stop.into(), now_ms, pins);
            pins.digital_write(Pin::MotionLed, Level::Low);
        }
        self.previous_frequency = frequency;
    }

    fn check_emergency_brake<P: Pins>(&mut self, inputs: &AlarmInputs, now_ms: u32, pins: &mut P) {
        if self.config.emergency_brake == 0 {
            return;
        }
        let event = Event::from(OdometerEvent::EmergencyBrake);

        if inputs.frequency_delta >= 0 {
            self.register.resume(event);
            return;
        }
        if inputs.elapsed_ms == 0 {
            return;
        }
        let rate = inputs.frequency_delta.unsigned_abs() * 1000 / u64::from(inputs.elapsed_ms);
        if rate > u64::from(self.config.emergency_brake) && !self.register.is_suspended(event) {
            self.notify(event, now_ms, pins);
            self.register.suspend(event);
        }
    }

    fn check_speed_limit<P: Pins>(&mut self, inputs: &AlarmInputs, now_ms: u32, pins: &mut P) {
        if self.config.over_speed == 0 {
            return;
        }
        let over = Event::from(OdometerEvent::OverSpeed);
        let safe = Event::from(OdometerEvent::SafeSpeed);

        let (raised, cleared) = if inputs.frequency > self.config.over_speed {
            (over, safe)
        } else {
            (safe, over)
        };
        self.register.resume(cleared);
        if !self.register.is_suspended(raised) {
            self.notify(raised, now_ms, pins);
            self.register.suspend(raised);
        }
    }

    fn check_fix<P: Pins>(&mut self, inputs: &AlarmInputs, now_ms: u32, pins: &mut P) {
        if inputs.has_fix == self.previous_fix {
            return;
        }
        let event = if inputs.has_fix { GpsEvent::FixAcquired } else { GpsEvent::FixLost };
        self.notify(event.into(), now_ms, pins);
        self.previous_fix = inputs.has_fix;
    }

    fn check_distance<P: Pins>(&mut self, inputs: &AlarmInputs, now_ms: u32, pins: &mut P) {
        let interval = self.config.distance_interval;
        if interval == 0 {
            return;
        }
        if (inputs.pulse_count.wrapping_sub(self.next_distance_mark) as i32) > 0 {
            self.notify(OdometerEvent::Distance.into(), now_ms, pins);
            self.next_distance_mark = inputs.pulse_count.wrapping_add(interval);
        }
    }

    /// Clears one class. The line stays asserted while the other class still
    /// has pending bits.
    pub fn acknowledge<P: Pins>(&mut self, class: EventClass, pins: &mut P) {
        self.register.pending[class.index()] = 0;
        if !self.register.any_pending() && self.line.is_asserted() {
            self.line.release(pins);
            info!(?class, "events acknowledged, interrupt line released");
        }
    }

    /// Read-and-clear of both classes. Always releases the line.
    pub fn take_event_register<P: Pins>(&mut self, pins: &mut P) -> u16 {
        let snapshot = self.register.snapshot();
        self.register.pending = [0; 2];
        if self.line.is_asserted() {
            info!(events = snapshot, "event register read, interrupt line released");
        }
        self.line.release(pins);
        snapshot
    }

    /// Replaces both active masks. Bits being disabled also lose their
    /// pending and suspended state; the line is released if nothing remains.
    pub fn set_active_masks<P: Pins>(&mut self, odometer: u8, gps: u8, pins: &mut P) {
        self.register.active = [odometer, gps];
        for class in 0..2 {
            let active = self.register.active[class];
            self.register.pending[class] &= active;
            self.register.suspended[class] &= active;
        }
        if !self.register.any_pending() && self.line.is_asserted() {
            self.line.release(pins);
        }
    }

    /// `GPS << 8 | ODO`
    pub fn active_masks(&self) -> u16 {
        u16::from(self.register.active(EventClass::Gps)) << 8
            | u16::from(self.register.active(EventClass::Odometer))
    }

    pub fn set_over_speed(&mut self, threshold: u32) {
        self.config.over_speed = threshold;
    }

    pub fn set_emergency_brake(&mut self, threshold: u32) {
        self.config.emergency_brake = threshold;
    }

    /// Changes the distance interval and re-arms the next mark from
    /// `pulse_count`.
    pub fn set_distance_interval(&mut self, interval: u32, pulse_count: u32) {
        self.config.distance_interval = interval;
        self.rearm_distance(pulse_count);
    }

    pub fn rearm_distance(&mut self, pulse_count: u32) {
        self.next_distance_mark = pulse_count.wrapping_add(self.config.distance_interval);
    }

    /// Applies to the next assertion; a running deadline is left alone.
    pub fn set_interrupt_timeout(&mut self, timeout_ms: u32) {
        self.config.interrupt_timeout_ms = timeout_ms;
    }

    pub fn config(&self) -> &AlarmConfig {
        &self.config
    }

    pub fn register(&self) -> &EventRegister {
        &self.register
    }

    pub fn line(&self) -> &InterruptLine {
        &self.line
    }

    pub fn next_distance_mark(&self) -> u32 {
        self.next_distance_mark
    }

    pub fn notifications(&self) -> u32 {
        self.notifications
    }

    pub fn timeouts(&self) -> u32 {
        self.timeouts
    }
}
