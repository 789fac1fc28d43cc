use telemetry_unit::serial::*;

fn feed<const N: usize>(channel: &mut SerialChannel<N>, bytes: &[u8]) {
    for &b in bytes {
        channel.push(b);
    }
}

#[test]
fn test_fifo_order_and_available() {
    let mut channel = SerialChannel::<16>::new(12);
    feed(&mut channel, b"abcde");
    assert_eq!(channel.available(), 5);
    assert_eq!(channel.peek(), Some(b'a'));

    for expected in b"abc" {
        assert_eq!(channel.pop(), Some(*expected));
    }
    assert_eq!(channel.available(), 2);

    feed(&mut channel, b"fghijklmn");
    assert_eq!(channel.available(), 11);
    let drained: Vec<u8> = std::iter::from_fn(|| channel.pop()).collect();
    assert_eq!(drained, b"defghijklmn");
    assert_eq!(channel.available(), 0);
    assert_eq!(channel.pop(), None);
}

#[test]
fn test_pending_lines_tracks_unread_terminators() {
    let mut channel = SerialChannel::<32>::new(30);
    feed(&mut channel, b"one\rtwo\rthr");
    assert_eq!(channel.pending_lines(), 2);

    let mut line = [0u8; 16];
    assert_eq!(channel.read_line(&mut line), Ok(4));
    assert_eq!(&line[..5], b"one\r\0");
    assert_eq!(channel.pending_lines(), 1);

    feed(&mut channel, b"ee\r");
    assert_eq!(channel.pending_lines(), 2);

    // Popping a terminator byte by byte counts too.
    for _ in 0..4 {
        channel.pop();
    }
    assert_eq!(channel.pending_lines(), 1);
    assert_eq!(channel.read_line(&mut line), Ok(6));
    assert_eq!(&line[..6], b"three\r");
    assert_eq!(channel.pending_lines(), 0);
}

#[test]
fn test_read_line_would_block_without_terminator() {
    let mut channel = SerialChannel::<16>::new(12);
    feed(&mut channel, b"partial");
    let mut line = [0xAAu8; 8];
    assert_eq!(channel.read_line(&mut line), Err(nb::Error::WouldBlock));
    assert_eq!(line[0], 0);
    assert_eq!(channel.available(), 7);
}

#[test]
fn test_read_line_truncates_long_line() {
    let mut channel = SerialChannel::<32>::new(30);
    feed(&mut channel, b"0123456789\rnext\r");
    let mut line = [0u8; 5];
    assert_eq!(channel.read_line(&mut line), Ok(4));
    assert_eq!(&line, b"0123\0");
    // The terminator was not reached, so the line is still counted.
    assert_eq!(channel.pending_lines(), 2);

    assert_eq!(channel.skip_line(), 7);
    assert_eq!(channel.pending_lines(), 1);
    let mut rest = [0u8; 8];
    assert_eq!(channel.read_line(&mut rest), Ok(5));
    assert_eq!(&rest[..5], b"next\r");
}

#[test]
fn test_overflow_drops_byte_and_requests_service() {
    let mut channel = SerialChannel::<8>::new(100);
    feed(&mut channel, b"1234567");
    assert!(!channel.is_ready());
    assert_eq!(channel.overruns(), 0);

    channel.push(b'8');
    assert_eq!(channel.available(), 7);
    assert_eq!(channel.overruns(), 1);
    assert!(channel.is_ready());

    let drained: Vec<u8> = std::iter::from_fn(|| channel.pop()).collect();
    assert_eq!(drained, b"1234567");
}

#[test]
fn test_ready_on_terminator_and_threshold() {
    let mut host = HostChannel::host();
    feed(&mut host, b"+AEB+");
    assert!(!host.is_ready());
    host.push(LINE_TERMINATOR);
    assert!(host.is_ready());

    let mut gps = GpsChannel::gps();
    for _ in 0..GPS_BUFFER_THRESHOLD - 1 {
        gps.push(b'x');
    }
    assert!(!gps.is_ready());
    gps.push(b'x');
    assert!(gps.is_ready());
    // Past the threshold a sentence that fits can still complete.
    assert!(!gps.is_clogged());

    while gps.available() < gps.capacity() {
        gps.push(b'x');
    }
    assert!(gps.is_clogged());
}

#[test]
fn test_full_buffer_with_line_is_not_clogged() {
    let mut channel = SerialChannel::<8>::new(4);
    feed(&mut channel, b"ab\rcdef");
    assert_eq!(channel.available(), channel.capacity());
    assert!(!channel.is_clogged());

    let mut line = [0u8; 8];
    assert_eq!(channel.read_line(&mut line), Ok(3));
    feed(&mut channel, b"ghi");
    assert!(channel.is_clogged());
}

#[test]
fn test_acknowledge_keeps_level_while_lines_remain() {
    let mut host = HostChannel::host();
    feed(&mut host, b"+AEB+\r+ASL+\r");
    let mut line = [0u8; HOST_BUFFER_SIZE];

    host.read_line(&mut line).unwrap();
    host.acknowledge();
    assert!(host.is_ready());

    host.read_line(&mut line).unwrap();
    host.acknowledge();
    assert!(!host.is_ready());
}

#[test]
fn test_flush_discards_everything() {
    let mut channel = SerialChannel::<16>::new(12);
    feed(&mut channel, b"a\rb\rc");
    channel.flush();
    assert_eq!(channel.available(), 0);
    assert_eq!(channel.pending_lines(), 0);
    assert_eq!(channel.pop(), None);

    feed(&mut channel, b"z\r");
    let mut line = [0u8; 4];
    assert_eq!(channel.read_line(&mut line), Ok(2));
}

#[test]
fn test_capacity_is_one_less_than_storage() {
    let host = HostChannel::host();
    assert_eq!(host.capacity(), HOST_BUFFER_SIZE - 1);
    assert_eq!(host.threshold(), HOST_BUFFER_THRESHOLD);
}
