//! Interrupt-fed byte ring buffers.
//!
//! Each logical UART port owns one [`SerialChannel`]. The receive interrupt is
//! the only producer (`push`) and the cooperative loop is the only consumer;
//! that single-producer/single-consumer split is what keeps the index
//! arithmetic correct without locks.

use core::convert::Infallible;
use serde::{Deserialize, Serialize};
use static_assertions::const_assert;
use tracing::trace;

/// Carriage return terminates both NMEA sentences and host command lines.
pub const LINE_TERMINATOR: u8 = 0x0D;

pub const HOST_BUFFER_SIZE: usize = 76;
pub const HOST_BUFFER_THRESHOLD: usize = 72;
pub const GPS_BUFFER_SIZE: usize = 128;
pub const GPS_BUFFER_THRESHOLD: usize = 120;

const_assert!(HOST_BUFFER_THRESHOLD < HOST_BUFFER_SIZE);
const_assert!(GPS_BUFFER_THRESHOLD < GPS_BUFFER_SIZE);
const_assert!(HOST_BUFFER_SIZE <= 256);
const_assert!(GPS_BUFFER_SIZE <= 256);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Port {
    /// Host command port (UART0).
    Host,
    /// GPS receiver port (UART1).
    Gps,
}

/// Fixed-capacity byte FIFO. One slot stays free to tell full from empty,
/// so at most `N - 1` bytes are buffered.
#[derive(Debug, Clone)]
pub struct RingBuffer<const N: usize> {
    storage: [u8; N],
    head: usize,
    tail: usize,
    lines: usize,
}

impl<const N: usize> RingBuffer<N> {
    pub const fn new() -> Self {
        Self {
            storage: [0; N],
            head: 0,
            tail: 0,
            lines: 0,
        }
    }

    /// Stores `byte` unless the buffer is full, in which case the byte is
    /// handed back and nothing changes.
    pub fn push(&mut self, byte: u8) -> Result<(), u8> {
        let next = (self.head + 1) % N;
        if next == self.tail {
            return Err(byte);
        }
        self.storage[self.head] = byte;
        self.head = next;
        if byte == LINE_TERMINATOR {
            self.lines += 1;
        }
        Ok(())
    }

    pub fn pop(&mut self) -> Option<u8> {
        if self.head == self.tail {
            return None;
        }
        let byte = self.storage[self.tail];
        self.tail = (self.tail + 1) % N;
        if byte == LINE_TERMINATOR {
            self.lines -= 1;
        }
        Some(byte)
    }

    pub fn peek(&self) -> Option<u8> {
        if self.head == self.tail {
            None
        } else {
            Some(self.storage[self.tail])
        }
    }

    pub fn len(&self) -> usize {
        (N + self.head - self.tail) % N
    }

    pub fn is_empty(&self) -> bool {
        self.head == self.tail
    }

    pub fn is_full(&self) -> bool {
        (self.head + 1) % N == self.tail
    }

    pub const fn capacity(&self) -> usize {
        N - 1
    }

    /// Number of line terminators in the unread region.
    pub fn pending_lines(&self) -> usize {
        self.lines
    }

    /// Drains the next line into `buf`.
    ///
    /// Copies bytes up to and including the terminator, or `buf.len() - 1`
    /// bytes if the line is longer, then writes a 0 sentinel after them. The
    /// returned length counts the terminator when one was copied. Returns
    /// `WouldBlock` when no complete line is buffered.
    pub fn read_line(&mut self, buf: &mut [u8]) -> nb::Result<usize, Infallible> {
        if self.lines == 0 {
            if let Some(first) = buf.first_mut() {
                *first = 0;
            }
            return Err(nb::Error::WouldBlock);
        }

        let limit = buf.len().saturating_sub(1);
        let mut copied = 0;
        while copied < limit {
            // A terminator is buffered, so the buffer cannot run dry first.
            let Some(byte) = self.pop() else { break };
            buf[copied] = byte;
            copied += 1;
            if byte == LINE_TERMINATOR {
                break;
            }
        }
        if let Some(sentinel) = buf.get_mut(copied) {
            *sentinel = 0;
        }
        Ok(copied)
    }

    /// Consumes bytes up to and including the next terminator. Returns the
    /// number of bytes discarded.
    pub fn skip_line(&mut self) -> usize {
        let mut skipped = 0;
        while let Some(byte) = self.pop() {
            skipped += 1;
            if byte == LINE_TERMINATOR {
                break;
            }
        }
        skipped
    }

    pub fn flush(&mut self) {
        self.head = self.tail;
        self.lines = 0;
    }
}

impl<const N: usize> Default for RingBuffer<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// A ring buffer plus the "top-half ready" level flag the main loop polls.
#[derive(Debug, Clone)]
pub struct SerialChannel<const N: usize> {
    buffer: RingBuffer<N>,
    threshold: usize,
    ready: bool,
    overruns: u32,
}

pub type HostChannel = SerialChannel<HOST_BUFFER_SIZE>;
pub type GpsChannel = SerialChannel<GPS_BUFFER_SIZE>;

impl<const N: usize> SerialChannel<N> {
    pub const fn new(threshold: usize) -> Self {
        Self {
            buffer: RingBuffer::new(),
            threshold,
            ready: false,
            overruns: 0,
        }
    }

    /// Producer side, called from the receive interrupt.
    pub fn push(&mut self, byte: u8) {
        match self.buffer.push(byte) {
            Ok(()) => {
                if byte == LINE_TERMINATOR || self.buffer.len() >= self.threshold {
                    self.ready = true;
                }
            }
            Err(dropped) => {
                self.overruns = self.overruns.wrapping_add(1);
                self.ready = true;
                trace!(byte = dropped, overruns = self.overruns, "ring buffer full, byte dropped");
            }
        }
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Consumer side: re-derives the ready level from what is still buffered,
    /// so lines that arrived during service are not stranded.
    pub fn acknowledge(&mut self) {
        self.ready = self.buffer.pending_lines() > 0 || self.buffer.len() >= self.threshold;
    }

    /// True when the buffer is full and holds no terminator. Every further
    /// byte is dropped, so the content can never become a line and must be
    /// discarded. A buffer merely past its threshold may still complete a
    /// line that fits.
    pub fn is_clogged(&self) -> bool {
        self.buffer.pending_lines() == 0 && self.buffer.is_full()
    }

    pub fn pop(&mut self) -> Option<u8> {
        self.buffer.pop()
    }

    pub fn peek(&self) -> Option<u8> {
        self.buffer.peek()
    }

    pub fn available(&self) -> usize {
        self.buffer.len()
    }

    pub fn pending_lines(&self) -> usize {
        self.buffer.pending_lines()
    }

    pub fn read_line(&mut self, buf: &mut [u8]) -> nb::Result<usize, Infallible> {
        self.buffer.read_line(buf)
    }

    pub fn skip_line(&mut self) -> usize {
        self.buffer.skip_line()
    }

    pub fn flush(&mut self) {
        self.buffer.flush();
    }

    pub fn overruns(&self) -> u32 {
        self.overruns
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    pub const fn capacity(&self) -> usize {
        self.buffer.capacity()
    }
}

impl HostChannel {
    pub const fn host() -> Self {
        Self::new(HOST_BUFFER_THRESHOLD)
    }
}

impl GpsChannel {
    pub const fn gps() -> Self {
        Self::new(GPS_BUFFER_THRESHOLD)
    }
}
