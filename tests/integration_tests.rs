use telemetry_unit::alarm::EventClass;
use telemetry_unit::gps::FixQuality;
use telemetry_unit::hal::{Level, ManualClock, Pin, PinBank, PinMode};
use telemetry_unit::*;

const GLL: &[u8] = b"$GPGLL,4916.45,N,12311.12,W,225444,A*1D\r";
const GSA: &[u8] = b"$GPGSA,A,3,04,05,,09,12,,,24,,,,,2.5,1.3,2.1*39\r";
const RMC: &[u8] = b"$GPRMC,123519,A,4807.038,N,01131.000,E,022.4,084.4,230394,003.1,W*6A\r";

type TestDevice = Device<ManualClock, PinBank>;

fn device_with(config: &DeviceConfig) -> (TestDevice, ManualClock) {
    let clock = ManualClock::new(0);
    let device = Device::new(config, clock.clone(), PinBank::new());
    (device, clock)
}

fn exchange(device: &mut TestDevice, line: &str) -> String {
    device.receive(Port::Host, line.as_bytes());
    device.tick();
    device.take_host_output().to_string()
}

fn pulses(device: &mut TestDevice, count: u32) {
    for _ in 0..count {
        device.dispatch(Irq::OdometerPulse);
    }
}

#[test]
fn test_device_initialization() {
    let (device, _) = device_with(&DeviceConfig::default());
    let pins = device.pins();

    assert_eq!(pins.mode(Pin::IntReq), PinMode::Input);
    assert!(!pins.interrupt_asserted());
    assert_eq!(pins.level(Pin::GpsPower), Level::High);
    assert_eq!(pins.level(Pin::GpsAntennaPower), Level::High);
    for led in [Pin::GpsActivityLed, Pin::EventLed, Pin::MotionLed] {
        assert_eq!(pins.mode(led), PinMode::Output);
        assert_eq!(pins.level(led), Level::Low);
    }
    assert!(device.gps_powered());
    assert_eq!(device.alarms().active_masks(), 0x033F);
}

#[test]
fn test_config_from_json_drives_startup() {
    let config = DeviceConfig::from_json(r#"{ "gps_powered": false, "gps_event_mask": 1 }"#).unwrap();
    let (mut device, _) = device_with(&config);

    assert!(!device.gps_powered());
    assert_eq!(device.pins().level(Pin::GpsPower), Level::Low);
    assert_eq!(device.alarms().active_masks(), 0x013F);

    // Bytes arriving while the receiver is off are thrown away.
    device.receive(Port::Gps, GLL);
    let report = device.tick();
    assert_eq!(report.sentence, None);
    assert_eq!(device.gps_channel().available(), 0);
    assert!(!device.fix().valid);
}

#[test]
fn test_sentence_decoded_on_tick_toggles_activity_led() {
    let (mut device, _) = device_with(&DeviceConfig::silent());

    device.receive(Port::Gps, RMC);
    assert_eq!(device.tick().sentence, Some(Sentence::Rmc));
    assert_eq!(device.pins().level(Pin::GpsActivityLed), Level::High);
    assert!(device.fix().valid);
    assert_eq!(device.fix().date, 230_394);

    device.receive(Port::Gps, RMC);
    device.tick();
    assert_eq!(device.pins().level(Pin::GpsActivityLed), Level::Low);

    // Nothing buffered: nothing decoded, LED untouched.
    assert_eq!(device.tick().sentence, None);
    assert_eq!(device.pins().level(Pin::GpsActivityLed), Level::Low);
}

#[test]
fn test_one_sentence_per_tick() {
    let (mut device, _) = device_with(&DeviceConfig::silent());
    device.receive(Port::Gps, &[GLL, GSA].concat());

    assert_eq!(device.tick().sentence, Some(Sentence::Gll));
    assert_eq!(device.fix().quality, FixQuality::None);
    assert_eq!(device.tick().sentence, Some(Sentence::Gsa));
    assert_eq!(device.fix().quality, FixQuality::ThreeD);
    assert_eq!(device.decoder().stats().decoded, 2);
}

#[test]
fn test_fix_acquired_raises_interrupt() {
    let (mut device, _) = device_with(&DeviceConfig::silent());

    device.receive(Port::Gps, GSA);
    device.tick();
    assert!(device.pins().interrupt_asserted());
    assert_eq!(device.pins().level(Pin::EventLed), Level::High);

    assert_eq!(exchange(&mut device, "+QER+\r"), "256 0x0100 \r\nOK\r\n");
    assert!(!device.pins().interrupt_asserted());
}

#[test]
fn test_gps_power_off_resets_fix_and_reports_loss() {
    let (mut device, _) = device_with(&DeviceConfig::silent());
    device.receive(Port::Gps, &[GLL, GSA].concat());
    device.tick();
    device.tick();
    exchange(&mut device, "+QER+\r");
    assert!(device.fix().valid);

    assert_eq!(exchange(&mut device, "+GPS=0\r"), "\r\nOK\r\n");
    device.tick();
    assert!(!device.fix().valid);
    assert_eq!(device.fix().quality, FixQuality::None);
    assert_eq!(exchange(&mut device, "+QER+GLA+\r"), "512 0x0200 NA \r\nOK\r\n");

    // Powering back on starts from scratch.
    exchange(&mut device, "+GPS=1\r");
    device.receive(Port::Gps, GLL);
    assert_eq!(device.tick().sentence, Some(Sentence::Gll));
    assert_eq!(device.pins().level(Pin::GpsPower), Level::High);
}

#[test]
fn test_monitor_line_each_period() {
    let (mut device, clock) = device_with(&DeviceConfig::default());
    device.receive(Port::Gps, &[GLL, GSA].concat());
    device.tick();
    device.tick();
    assert_eq!(device.take_host_output().as_str(), "");

    pulses(&mut device, 50);
    clock.set(500);
    assert!(!device.tick().monitor_emitted);

    clock.set(1000);
    let report = device.tick();
    assert!(report.monitor_emitted);
    let expected = format!("0x0101 {:>8} {:>4} {:>2} 3 I +49.2741 -123.1853\r\n", 50, 50, 0);
    assert_eq!(device.take_host_output().as_str(), expected);

    clock.set(1999);
    assert!(!device.tick().monitor_emitted);
    clock.set(2000);
    assert!(device.tick().monitor_emitted);
}

#[test]
fn test_monitor_line_without_position() {
    let (mut device, clock) = device_with(&DeviceConfig::default());
    clock.set(1000);
    device.tick();
    let expected = format!("0x0000 {:>8} {:>4} {:>2} 0 P NA NA\r\n", 0, 0, 0);
    assert_eq!(device.take_host_output().as_str(), expected);

    assert_eq!(exchange(&mut device, "+QCM=0\r"), "\r\nOK\r\n");
    clock.set(5000);
    device.tick();
    assert_eq!(device.take_host_output().as_str(), "");
}

#[test]
fn test_interrupt_timeout_releases_line() {
    let (mut device, clock) = device_with(&DeviceConfig::silent());
    exchange(&mut device, "+QIT=2000\r");

    device.receive(Port::Gps, GSA);
    device.tick();
    assert_eq!(device.alarms().line().deadline(), Some(2000));

    clock.set(2000);
    device.tick();
    assert!(device.pins().interrupt_asserted());

    clock.set(2001);
    device.tick();
    assert!(!device.pins().interrupt_asserted());
    assert_eq!(device.alarms().timeouts(), 1);
    assert_eq!(exchange(&mut device, "+QER+\r"), "0 0x0000 \r\nOK\r\n");
}

#[test]
fn test_acknowledge_event_classes() {
    let (mut device, clock) = device_with(&DeviceConfig::silent());
    device.receive(Port::Gps, GSA);
    device.tick();
    pulses(&mut device, 20);
    clock.set(1000);
    device.tick();

    device.acknowledge_events(EventClass::Gps);
    assert!(device.pins().interrupt_asserted());
    device.acknowledge_events(EventClass::Odometer);
    assert!(!device.pins().interrupt_asserted());
}

#[test]
fn test_odometer_frequency_register_and_rate_limit() {
    let (mut device, clock) = device_with(&DeviceConfig::silent());
    pulses(&mut device, 30);

    clock.set(100);
    assert_eq!(device.tick().odometer, Err(OdometerError::TooSoon));

    clock.set(1000);
    assert_eq!(device.tick().odometer, Ok(()));
    assert_eq!(exchange(&mut device, "+OFP+OCP+\r"), "30 30 \r\nOK\r\n");
}

#[test]
fn test_distance_events_after_preset() {
    let (mut device, clock) = device_with(&DeviceConfig::silent());
    exchange(&mut device, "+APC=100+OCP=1000\r");
    assert_eq!(device.alarms().next_distance_mark(), 1100);

    pulses(&mut device, 101);
    clock.set(1000);
    device.tick();

    // Move and Distance.
    assert_eq!(exchange(&mut device, "+QER+OCP+\r"), "33 0x0021 1101 \r\nOK\r\n");
    assert_eq!(device.alarms().next_distance_mark(), 1201);
}

#[test]
fn test_emergency_brake_end_to_end() {
    let (mut device, clock) = device_with(&DeviceConfig::silent());
    exchange(&mut device, "+AEB=20\r");

    pulses(&mut device, 50);
    clock.set(1000);
    device.tick();
    assert_eq!(device.odometer().frequency(), 50);

    clock.set(2000);
    device.tick();
    assert_eq!(device.odometer().state().frequency_delta, -50);

    // Move, Stop and EmergencyBrake.
    assert_eq!(exchange(&mut device, "+QER+\r"), "11 0x000B \r\nOK\r\n");
}

#[test]
fn test_clogged_gps_buffer_is_flushed() {
    let (mut device, _) = device_with(&DeviceConfig::silent());
    device.receive(Port::Gps, &[b'x'; 125]);
    assert_eq!(device.tick().sentence, None);
    // Past the threshold but not full: kept.
    assert_eq!(device.gps_channel().available(), 125);

    device.receive(Port::Gps, &[b'x'; 5]);
    assert_eq!(device.tick().sentence, None);
    assert_eq!(device.gps_channel().available(), 0);

    device.receive(Port::Gps, GLL);
    assert_eq!(device.tick().sentence, Some(Sentence::Gll));
}

#[test]
fn test_irq_dispatch_routes_bytes() {
    let (mut device, _) = device_with(&DeviceConfig::silent());
    device.dispatch(Irq::UartRx { port: Port::Host, byte: b'+' });
    device.dispatch(Irq::UartRx { port: Port::Gps, byte: b'$' });
    device.dispatch(Irq::OdometerPulse);

    assert_eq!(device.host_channel().available(), 1);
    assert_eq!(device.gps_channel().available(), 1);
    assert_eq!(device.pulse_counter().load(), 1);
}

#[test]
fn test_command_report_in_tick() {
    let (mut device, _) = device_with(&DeviceConfig::silent());
    device.receive(Port::Host, b"+AEB+ASL\r+ZZZ+\r");

    assert_eq!(device.tick().command, Some(Ok(2)));
    assert_eq!(device.tick().command, Some(Err(ProtocolError::UnknownClass('Z'))));
    assert_eq!(device.tick().command, None);
    assert_eq!(device.take_host_output().as_str(), "0 0 \r\nOK\r\n\r\nERROR\r\n");
}
