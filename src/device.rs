//! The owned device context and its cooperative loop.
//!
//! Interrupt sources reach the device only through [`Device::dispatch`]; the
//! pulse counter is the one piece of state shared by reference, so a capture
//! interrupt (or a simulator task) can count without going through the loop.

use crate::alarm::{AlarmEngine, AlarmInputs, EventClass, EventRegister};
use crate::config::DeviceConfig;
use crate::gps::{GpsFix, NmeaDecoder, Sentence};
use crate::hal::{Clock, Level, Pin, PinMode, Pins};
use crate::monitor::{Monitor, MonitorSnapshot};
use crate::odometer::{OdometerEngine, OdometerError, PulseCounter};
use crate::protocol::{
    CommandProcessor, LineResult, ProtocolError, Register, Registers, ResponseBuffer, Value,
};
use crate::serial::{GpsChannel, HostChannel, Port};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Interrupt sources, dispatched by a fixed match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Irq {
    UartRx { port: Port, byte: u8 },
    OdometerPulse,
}

/// What one loop iteration did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    pub now_ms: u32,
    pub sentence: Option<Sentence>,
    pub odometer: Result<(), OdometerError>,
    /// Result of the host line serviced this tick, if any.
    pub command: Option<LineResult>,
    pub monitor_emitted: bool,
}

/// Everything the host registers read and write.
#[derive(Debug)]
pub struct DeviceState<C: Clock, P: Pins> {
    clock: C,
    pins: P,
    pulses: Arc<PulseCounter>,
    fix: GpsFix,
    odometer: OdometerEngine,
    alarms: AlarmEngine,
    monitor: Monitor,
    gps_powered: bool,
    activity_led: Level,
}

impl<C: Clock, P: Pins> DeviceState<C, P> {
    fn set_gps_power(&mut self, on: bool) {
        let level = if on { Level::High } else { Level::Low };
        self.pins.digital_write(Pin::GpsPower, level);
        self.pins.digital_write(Pin::GpsAntennaPower, level);
        if on != self.gps_powered {
            info!(on, "GPS receiver power changed");
        }
        self.gps_powered = on;
    }

    fn preset_pulse_count(&mut self, count: u32) {
        let now = self.clock.millis();
        self.pulses.store(count);
        self.odometer.preset(now, count);
        self.alarms.rearm_distance(count);
    }
}

impl<C: Clock, P: Pins> Registers for DeviceState<C, P> {
    fn read(&mut self, register: Register) -> Value {
        let config = *self.alarms.config();
        match register {
            Register::EmergencyBrake => Value::Unsigned(config.emergency_brake),
            Register::DistanceInterval => Value::Unsigned(config.distance_interval),
            Register::OverSpeed => Value::Unsigned(config.over_speed),
            Register::FixQuality => Value::Unsigned(self.fix.quality.code()),
            Register::GroundSpeed => Value::Fixed(self.fix.speed_kmh),
            Register::Hdop => Value::Fixed(self.fix.hdop),
            Register::Latitude => Value::Coordinate(self.fix.latitude_degrees()),
            Register::Longitude => Value::Coordinate(self.fix.longitude_degrees()),
            Register::GpsPower => Value::Unsigned(u32::from(self.gps_powered)),
            Register::TrackDegrees => Value::Fixed(self.fix.course),
            Register::SatellitesInView => Value::Unsigned(self.fix.satellites_in_view),
            Register::HdopGrade => Value::Letter(self.fix.hdop_grade().letter()),
            Register::UtcTime => Value::Unsigned(self.fix.utc),
            Register::Date => Value::Unsigned(self.fix.date),
            Register::PulseCount => Value::Unsigned(self.pulses.load()),
            Register::PulseFrequency => Value::Unsigned(self.odometer.frequency()),
            Register::MonitorPeriod => Value::Unsigned(self.monitor.period()),
            Register::EventRegister => Value::Events(self.alarms.take_event_register(&mut self.pins)),
            Register::InterruptTimeout => Value::Unsigned(config.interrupt_timeout_ms),
            Register::EventMask => Value::Unsigned(u32::from(self.alarms.active_masks())),
        }
    }

    fn write(&mut self, register: Register, value: u32) -> Result<(), ProtocolError> {
        match register {
            Register::EmergencyBrake => self.alarms.set_emergency_brake(value),
            Register::DistanceInterval => {
                let count = self.pulses.load();
                self.alarms.set_distance_interval(value, count);
            }
            Register::OverSpeed => self.alarms.set_over_speed(value),
            Register::GpsPower => self.set_gps_power(value != 0),
            Register::PulseCount => self.preset_pulse_count(value),
            Register::MonitorPeriod => self.monitor.set_period(value),
            Register::InterruptTimeout => self.alarms.set_interrupt_timeout(value),
            Register::EventMask => {
                let masks = u16::try_from(value).map_err(|_| ProtocolError::InvalidValue)?;
                let [gps, odometer] = masks.to_be_bytes();
                self.alarms.set_active_masks(odometer, gps, &mut self.pins);
            }
            _ => return Err(ProtocolError::ReadOnly),
        }
        debug!(?register, value, "register written");
        Ok(())
    }
}

pub struct Device<C: Clock, P: Pins> {
    state: DeviceState<C, P>,
    host: HostChannel,
    gps: GpsChannel,
    decoder: NmeaDecoder,
    processor: CommandProcessor,
    tx: ResponseBuffer,
}

impl<C: Clock, P: Pins> Device<C, P> {
    /// Drives every pin to its idle state and takes the odometer baseline.
    pub fn new(config: &DeviceConfig, clock: C, mut pins: P) -> Self {
        let now = clock.millis();

        pins.pin_mode(Pin::IntReq, PinMode::Input);
        for pin in [Pin::GpsPower, Pin::GpsAntennaPower, Pin::GpsActivityLed, Pin::EventLed, Pin::MotionLed] {
            pins.pin_mode(pin, PinMode::Output);
            pins.digital_write(pin, Level::Low);
        }

        let register = EventRegister::new(config.odometer_event_mask, config.gps_event_mask);
        let mut state = DeviceState {
            clock,
            pins,
            pulses: Arc::new(PulseCounter::new(0)),
            fix: GpsFix::new(),
            odometer: OdometerEngine::new(now, 0),
            alarms: AlarmEngine::new(config.alarm_config(), register, 0),
            monitor: Monitor::new(config.monitor_period_s, now),
            gps_powered: false,
            activity_led: Level::Low,
        };
        state.set_gps_power(config.gps_powered);

        info!(
            timeout_ms = config.interrupt_timeout_ms,
            masks = state.alarms.active_masks(),
            monitor_s = config.monitor_period_s,
            "telemetry unit ready"
        );

        Self {
            state,
            host: HostChannel::host(),
            gps: GpsChannel::gps(),
            decoder: NmeaDecoder::new(),
            processor: CommandProcessor::new(),
            tx: ResponseBuffer::new(),
        }
    }

    /// Interrupt entry point.
    pub fn dispatch(&mut self, irq: Irq) {
        match irq {
            Irq::UartRx { port: Port::Host, byte } => self.host.push(byte),
            Irq::UartRx { port: Port::Gps, byte } => self.gps.push(byte),
            Irq::OdometerPulse => self.state.pulses.increment(),
        }
    }

    /// Feeds a burst of received bytes, one interrupt per byte.
    pub fn receive(&mut self, port: Port, bytes: &[u8]) {
        for &byte in bytes {
            self.dispatch(Irq::UartRx { port, byte });
        }
    }

    /// One cooperative loop iteration. Never blocks.
    pub fn tick(&mut self) -> TickReport {
        let now_ms = self.state.clock.millis();

        let sentence = self.update_gps();

        let count = self.state.pulses.load();
        let odometer = self.state.odometer.update(now_ms, count);

        let inputs = AlarmInputs::new(self.state.odometer.state(), count, &self.state.fix);
        self.state.alarms.check(&inputs, now_ms, &mut self.state.pins);

        let monitor_emitted = self.update_monitor(now_ms);
        let command = self.service_host();

        TickReport {
            now_ms,
            sentence,
            odometer,
            command,
            monitor_emitted,
        }
    }

    fn update_gps(&mut self) -> Option<Sentence> {
        if !self.state.gps_powered {
            self.state.pins.digital_write(Pin::GpsPower, Level::Low);
            self.state.pins.digital_write(Pin::GpsAntennaPower, Level::Low);
            self.state.pins.digital_write(Pin::GpsActivityLed, Level::Low);
            self.state.activity_led = Level::Low;
            self.state.fix.reset();
            self.gps.flush();
            self.gps.acknowledge();
            return None;
        }
        if !self.gps.is_ready() {
            return None;
        }

        let sentence = match self.decoder.decode(&mut self.gps, &mut self.state.fix) {
            Ok(sentence) => sentence,
            Err(nb::Error::WouldBlock) => {
                if self.gps.is_clogged() {
                    warn!(bytes = self.gps.available(), "GPS buffer holds no complete sentence, flushing");
                    self.gps.flush();
                }
                None
            }
        };
        if sentence.is_some() {
            self.state.activity_led = self.state.activity_led.toggled();
            self.state.pins.digital_write(Pin::GpsActivityLed, self.state.activity_led);
        }
        self.gps.acknowledge();
        sentence
    }

    fn update_monitor(&mut self, now_ms: u32) -> bool {
        if !self.state.monitor.is_due(now_ms) {
            return false;
        }
        let fix = &self.state.fix;
        let snapshot = MonitorSnapshot {
            pending_events: self.state.alarms.register().snapshot(),
            pulse_count: self.state.pulses.load(),
            frequency: self.state.odometer.frequency(),
            satellites_in_view: fix.satellites_in_view,
            fix_quality: fix.quality.code(),
            hdop_grade: fix.hdop_grade().letter(),
            latitude: fix.latitude_degrees(),
            longitude: fix.longitude_degrees(),
        };
        self.state.monitor.mark_emitted(now_ms);
        if snapshot.write_line(&mut self.tx).is_err() {
            debug!("transmit buffer full, monitor line dropped");
            return false;
        }
        true
    }

    fn service_host(&mut self) -> Option<LineResult> {
        if !self.host.is_ready() {
            return None;
        }
        let result = match self.processor.service(&mut self.host, &mut self.state, &mut self.tx) {
            Ok(result) => Some(result),
            Err(nb::Error::WouldBlock) => {
                if self.host.is_clogged() {
                    warn!(bytes = self.host.available(), "host buffer holds no complete line, flushing");
                    self.host.flush();
                }
                None
            }
        };
        self.host.acknowledge();
        result
    }

    /// Drains everything queued for the host UART.
    pub fn take_host_output(&mut self) -> ResponseBuffer {
        core::mem::take(&mut self.tx)
    }

    pub fn pulse_counter(&self) -> Arc<PulseCounter> {
        Arc::clone(&self.state.pulses)
    }

    pub fn fix(&self) -> &GpsFix {
        &self.state.fix
    }

    pub fn odometer(&self) -> &OdometerEngine {
        &self.state.odometer
    }

    pub fn alarms(&self) -> &AlarmEngine {
        &self.state.alarms
    }

    /// Host-side acknowledge of one event class.
    pub fn acknowledge_events(&mut self, class: EventClass) {
        self.state.alarms.acknowledge(class, &mut self.state.pins);
    }

    pub fn gps_powered(&self) -> bool {
        self.state.gps_powered
    }

    pub fn pins(&self) -> &P {
        &self.state.pins
    }

    pub fn clock(&self) -> &C {
        &self.state.clock
    }

    pub fn host_channel(&self) -> &HostChannel {
        &self.host
    }

    pub fn gps_channel(&self) -> &GpsChannel {
        &self.gps
    }

    pub fn decoder(&self) -> &NmeaDecoder {
        &self.decoder
    }

    pub fn processor(&self) -> &CommandProcessor {
        &self.processor
    }
}
