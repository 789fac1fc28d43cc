use std::sync::Arc;
use std::thread;
use telemetry_unit::odometer::*;

#[test]
fn test_frequency_over_window() {
    let mut odometer = OdometerEngine::new(0, 1000);
    assert_eq!(odometer.update(2000, 1010), Ok(()));
    assert_eq!(odometer.frequency(), 5);
    assert_eq!(odometer.state().elapsed_ms, 2000);
    assert_eq!(odometer.state().frequency_delta, 5);
}

#[test]
fn test_unchanged_count_is_exactly_zero() {
    let mut odometer = OdometerEngine::new(0, 1000);
    odometer.update(2000, 1010).unwrap();
    assert_eq!(odometer.update(3000, 1010), Ok(()));
    assert_eq!(odometer.frequency(), 0);
    assert_eq!(odometer.state().frequency_delta, -5);
}

#[test]
fn test_rate_limited_to_512_ms() {
    let mut odometer = OdometerEngine::new(1000, 0);
    assert_eq!(odometer.update(1511, 10), Err(OdometerError::TooSoon));
    assert_eq!(odometer.update(1512, 10), Ok(()));
    assert_eq!(odometer.update(1600, 20), Err(OdometerError::TooSoon));
    // Rejected samples leave the state alone.
    assert_eq!(odometer.state().pulse_count, 10);
}

#[test]
fn test_clock_wrap_skips_one_cycle() {
    let start = u32::MAX - 1000;
    let mut odometer = OdometerEngine::new(start, 500);
    odometer.update(start + 800, 540).unwrap();
    assert_eq!(odometer.frequency(), 50);

    // 1200 ms later on a wrapped clock.
    let wrapped = start.wrapping_add(2000);
    assert_eq!(odometer.update(wrapped, 600), Err(OdometerError::ClockWrapped));
    assert_eq!(odometer.state().last_sample_ms, wrapped);
    assert_eq!(odometer.state().last_sample_count, 600);
    assert_eq!(odometer.frequency(), 50);

    assert_eq!(odometer.update(wrapped + 1000, 700), Ok(()));
    assert_eq!(odometer.frequency(), 100);
}

#[test]
fn test_pulse_counter_wraps() {
    let mut odometer = OdometerEngine::new(0, u32::MAX - 4);
    odometer.update(1000, 5).unwrap();
    assert_eq!(odometer.frequency(), 10);
}

#[test]
fn test_large_counts_do_not_overflow() {
    let mut odometer = OdometerEngine::new(0, 0);
    odometer.update(1000, 4_000_000_000).unwrap();
    assert_eq!(odometer.frequency(), 4_000_000_000);
}

#[test]
fn test_preset_rebases_window() {
    let mut odometer = OdometerEngine::new(0, 100);
    odometer.preset(500, 1_000_000);
    odometer.update(1500, 1_000_020).unwrap();
    assert_eq!(odometer.frequency(), 20);
}

#[test]
fn test_pulse_counter_shared_across_threads() {
    let counter = Arc::new(PulseCounter::new(0));
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let counter = Arc::clone(&counter);
            thread::spawn(move || {
                for _ in 0..1000 {
                    counter.increment();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(counter.load(), 4000);

    counter.store(u32::MAX);
    counter.increment();
    assert_eq!(counter.load(), 0);
}
