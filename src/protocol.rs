//! Host command protocol.
//!
//! A command line holds one or more commands, each introduced by `+` (ASCII
//! framing) or `$` (binary framing) and terminated by CR:
//!
//! ```text
//! +AEB=500+AEB+\r   ->   500 \r\nOK\r\n
//! ```
//!
//! A command is a class letter and a two-letter attribute. It is a read when
//! followed by the end of line or the next framing character, a write when
//! followed by `=<decimal>`. The first error aborts the rest of the line;
//! writes already applied stay applied.

use crate::serial::{SerialChannel, HOST_BUFFER_SIZE, LINE_TERMINATOR};
use arrayvec::ArrayString;
use core::convert::Infallible;
use core::fmt::Write;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, trace};

pub const MAX_RESPONSE_SIZE: usize = 512;

pub type ResponseBuffer = ArrayString<MAX_RESPONSE_SIZE>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("unknown command class '{0}'")]
    UnknownClass(char),
    #[error("unknown attribute '{0}{1}{2}'")]
    UnknownAttribute(char, char, char),
    #[error("register is read-only")]
    ReadOnly,
    #[error("malformed or out-of-range value")]
    InvalidValue,
    #[error("unexpected character 0x{0:02X}")]
    UnexpectedToken(u8),
    #[error("command class or attribute missing")]
    MissingSelector,
    #[error("response does not fit the transmit buffer")]
    OutputOverflow,
    #[error("command line longer than the receive buffer")]
    LineTooLong,
}

impl From<core::fmt::Error> for ProtocolError {
    fn from(_: core::fmt::Error) -> Self {
        ProtocolError::OutputOverflow
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Framing {
    Ascii,
    /// Accepted for compatibility; handled exactly like ASCII.
    Binary,
}

impl Framing {
    fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            b'+' => Some(Framing::Ascii),
            b'$' => Some(Framing::Binary),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Access {
    Read,
    Write(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    pub framing: Framing,
    pub class: u8,
    pub attribute: [u8; 2],
    pub access: Access,
}

/// Splits one command line (terminator already stripped) into commands.
#[derive(Debug, Clone)]
pub struct Tokenizer<'a> {
    line: &'a [u8],
    pos: usize,
}

impl<'a> Tokenizer<'a> {
    pub fn new(line: &'a [u8]) -> Self {
        Self { line, pos: 0 }
    }

    fn peek(&self) -> Option<u8> {
        self.line.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let byte = self.peek()?;
        self.pos += 1;
        Some(byte)
    }

    fn selector(&mut self) -> Result<u8, ProtocolError> {
        match self.bump() {
            Some(byte) if Framing::from_byte(byte).is_none() => Ok(byte),
            _ => Err(ProtocolError::MissingSelector),
        }
    }

    fn value(&mut self) -> Result<u32, ProtocolError> {
        let start = self.pos;
        while let Some(byte) = self.peek() {
            if Framing::from_byte(byte).is_some() {
                break;
            }
            self.pos += 1;
        }
        let digits = &self.line[start..self.pos];
        if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
            return Err(ProtocolError::InvalidValue);
        }
        core::str::from_utf8(digits)
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or(ProtocolError::InvalidValue)
    }

    fn command(&mut self, framing: Framing) -> Result<Command, ProtocolError> {
        let class = self.selector()?;
        let attribute = [self.selector()?, self.selector()?];

        let access = match self.peek() {
            None => Access::Read,
            Some(byte) if Framing::from_byte(byte).is_some() => Access::Read,
            Some(b'=') => {
                self.pos += 1;
                Access::Write(self.value()?)
            }
            Some(byte) => return Err(ProtocolError::UnexpectedToken(byte)),
        };

        Ok(Command {
            framing,
            class,
            attribute,
            access,
        })
    }
}

impl Iterator for Tokenizer<'_> {
    type Item = Result<Command, ProtocolError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let byte = self.bump()?;
            if byte == b'\n' {
                continue;
            }
            let Some(framing) = Framing::from_byte(byte) else {
                // Stop after the first error.
                self.pos = self.line.len();
                return Some(Err(ProtocolError::UnexpectedToken(byte)));
            };
            // A framing character right before the terminator closes the line.
            self.peek()?;
            let command = self.command(framing);
            if command.is_err() {
                self.pos = self.line.len();
            }
            return Some(command);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Register {
    EmergencyBrake,
    DistanceInterval,
    OverSpeed,
    FixQuality,
    GroundSpeed,
    Hdop,
    Latitude,
    Longitude,
    GpsPower,
    TrackDegrees,
    SatellitesInView,
    HdopGrade,
    UtcTime,
    Date,
    PulseCount,
    PulseFrequency,
    MonitorPeriod,
    EventRegister,
    InterruptTimeout,
    EventMask,
}

#[derive(Debug, Clone, Copy)]
pub struct RegisterEntry {
    pub class: u8,
    pub attribute: [u8; 2],
    pub register: Register,
    pub writable: bool,
}

const fn entry(class: u8, attribute: &[u8; 2], register: Register, writable: bool) -> RegisterEntry {
    RegisterEntry {
        class,
        attribute: *attribute,
        register,
        writable,
    }
}

pub const REGISTERS: &[RegisterEntry] = &[
    entry(b'A', b"EB", Register::EmergencyBrake, true),
    entry(b'A', b"PC", Register::DistanceInterval, true),
    entry(b'A', b"SL", Register::OverSpeed, true),
    entry(b'G', b"FV", Register::FixQuality, false),
    entry(b'G', b"GS", Register::GroundSpeed, false),
    entry(b'G', b"HP", Register::Hdop, false),
    entry(b'G', b"LA", Register::Latitude, false),
    entry(b'G', b"LO", Register::Longitude, false),
    entry(b'G', b"PS", Register::GpsPower, true),
    entry(b'G', b"TD", Register::TrackDegrees, false),
    entry(b'G', b"SV", Register::SatellitesInView, false),
    entry(b'G', b"HL", Register::HdopGrade, false),
    entry(b'G', b"UT", Register::UtcTime, false),
    entry(b'G', b"DA", Register::Date, false),
    entry(b'O', b"CP", Register::PulseCount, true),
    entry(b'O', b"FP", Register::PulseFrequency, false),
    entry(b'Q', b"CM", Register::MonitorPeriod, true),
    entry(b'Q', b"ER", Register::EventRegister, false),
    entry(b'Q', b"IT", Register::InterruptTimeout, true),
    entry(b'Q', b"EM", Register::EventMask, true),
];

pub fn lookup(class: u8, attribute: [u8; 2]) -> Result<&'static RegisterEntry, ProtocolError> {
    let mut known_class = false;
    for candidate in REGISTERS {
        if candidate.class == class {
            known_class = true;
            if candidate.attribute == attribute {
                return Ok(candidate);
            }
        }
    }
    if known_class {
        Err(ProtocolError::UnknownAttribute(
            char::from(class),
            char::from(attribute[0]),
            char::from(attribute[1]),
        ))
    } else {
        Err(ProtocolError::UnknownClass(char::from(class)))
    }
}

/// A register's current value, as the protocol prints it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Unsigned(u32),
    Fixed(f64),
    /// Fixed-point, or `NA` while no valid position is known.
    Coordinate(Option<f64>),
    Letter(char),
    /// Event register snapshot, `GPS << 8 | ODO`.
    Events(u16),
}

impl Value {
    /// Writes the value followed by one space.
    pub fn write_to<W: Write>(&self, out: &mut W) -> core::fmt::Result {
        match *self {
            Value::Unsigned(v) => write!(out, "{v} "),
            Value::Fixed(v) | Value::Coordinate(Some(v)) => {
                write_fixed(out, v)?;
                out.write_char(' ')
            }
            Value::Coordinate(None) => out.write_str("NA "),
            Value::Letter(c) => write!(out, "{c} "),
            Value::Events(v) => write!(out, "{} 0x{:02X}{:02X} ", v, v >> 8, v & 0xFF),
        }
    }
}

/// Signed fixed point with four decimals, sign always shown: `+45.1234`.
/// Digits past the fourth decimal are truncated, not rounded.
pub fn write_fixed<W: Write>(out: &mut W, value: f64) -> core::fmt::Result {
    let scaled = (value.abs() * 10_000.0).trunc() as u64;
    let sign = if value < 0.0 && scaled != 0 { '-' } else { '+' };
    write!(out, "{}{}.{:04}", sign, scaled / 10_000, scaled % 10_000)
}

/// Live state behind the protocol's registers.
pub trait Registers {
    fn read(&mut self, register: Register) -> Value;
    fn write(&mut self, register: Register, value: u32) -> Result<(), ProtocolError>;
}

/// Runs every command on `line`, printing reads to `out`. Returns the number
/// of commands executed.
pub fn execute_line<R: Registers, W: Write>(
    line: &[u8],
    registers: &mut R,
    out: &mut W,
) -> Result<usize, ProtocolError> {
    let mut executed = 0;
    for command in Tokenizer::new(line) {
        let command = command?;
        let entry = lookup(command.class, command.attribute)?;
        trace!(register = ?entry.register, access = ?command.access, "host command");
        match command.access {
            Access::Read => registers.read(entry.register).write_to(out)?,
            Access::Write(_) if !entry.writable => return Err(ProtocolError::ReadOnly),
            Access::Write(value) => registers.write(entry.register, value)?,
        }
        executed += 1;
    }
    Ok(executed)
}

pub type LineResult = Result<usize, ProtocolError>;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ProtocolStats {
    pub lines: u32,
    pub errors: u32,
}

/// Pulls command lines off the host channel and answers them.
#[derive(Debug)]
pub struct CommandProcessor {
    line: [u8; HOST_BUFFER_SIZE],
    stats: ProtocolStats,
}

impl CommandProcessor {
    pub fn new() -> Self {
        Self {
            line: [0; HOST_BUFFER_SIZE],
            stats: ProtocolStats::default(),
        }
    }

    /// Services exactly one buffered line. Returns `WouldBlock` when no
    /// complete line is buffered. Anything after that line stays queued.
    pub fn service<const N: usize, R: Registers, W: Write>(
        &mut self,
        channel: &mut SerialChannel<N>,
        registers: &mut R,
        out: &mut W,
    ) -> nb::Result<LineResult, Infallible> {
        let len = channel.read_line(&mut self.line)?;
        self.stats.lines = self.stats.lines.wrapping_add(1);

        let result = if len > 0 && self.line[len - 1] == LINE_TERMINATOR {
            execute_line(&self.line[..len - 1], registers, out)
        } else {
            channel.skip_line();
            Err(ProtocolError::LineTooLong)
        };

        let status = match result {
            Ok(_) => "OK",
            Err(error) => {
                self.stats.errors = self.stats.errors.wrapping_add(1);
                debug!(%error, "command line rejected");
                "ERROR"
            }
        };
        // Nothing else can be reported if even the status does not fit.
        if write!(out, "\r\n{status}\r\n").is_err() {
            debug!("transmit buffer full, status line dropped");
        }
        Ok(result)
    }

    pub fn stats(&self) -> &ProtocolStats {
        &self.stats
    }
}

impl Default for CommandProcessor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(line: &[u8]) -> Vec<Result<Command, ProtocolError>> {
        Tokenizer::new(line).collect()
    }

    #[test]
    fn test_read_lookahead_variants() {
        for line in [&b"+AEB"[..], b"+AEB+", b"$AEB"] {
            let parsed = tokens(line);
            assert_eq!(parsed.len(), 1);
            let command = parsed[0].unwrap();
            assert_eq!(command.class, b'A');
            assert_eq!(&command.attribute, b"EB");
            assert_eq!(command.access, Access::Read);
        }
    }

    #[test]
    fn test_pipelined_commands() {
        let parsed = tokens(b"+AEB=500+AEB+$GFV");
        assert_eq!(parsed.len(), 3);
        assert_eq!(parsed[0].unwrap().access, Access::Write(500));
        assert_eq!(parsed[1].unwrap().access, Access::Read);
        assert_eq!(parsed[2].unwrap().framing, Framing::Binary);
    }

    #[test]
    fn test_malformed_values() {
        assert_eq!(tokens(b"+AEB=")[0], Err(ProtocolError::InvalidValue));
        assert_eq!(tokens(b"+AEB=12a")[0], Err(ProtocolError::InvalidValue));
        assert_eq!(tokens(b"+AEB=4294967296")[0], Err(ProtocolError::InvalidValue));
        assert_eq!(tokens(b"+AEB=4294967295")[0].unwrap().access, Access::Write(u32::MAX));
    }

    #[test]
    fn test_error_stops_tokenizer() {
        let parsed = tokens(b"+AEBx+GFV");
        assert_eq!(parsed, vec![Err(ProtocolError::UnexpectedToken(b'x'))]);
        assert_eq!(tokens(b"hello"), vec![Err(ProtocolError::UnexpectedToken(b'h'))]);
        assert_eq!(tokens(b"+A"), vec![Err(ProtocolError::MissingSelector)]);
    }

    #[test]
    fn test_line_feed_is_skipped() {
        let parsed = tokens(b"\n+QER");
        assert_eq!(parsed.len(), 1);
        assert!(parsed[0].is_ok());
    }

    #[test]
    fn test_lookup_errors() {
        assert_eq!(lookup(b'Z', *b"EB").unwrap_err(), ProtocolError::UnknownClass('Z'));
        assert_eq!(
            lookup(b'A', *b"ZZ").unwrap_err(),
            ProtocolError::UnknownAttribute('A', 'Z', 'Z')
        );
        assert_eq!(lookup(b'Q', *b"ER").unwrap().register, Register::EventRegister);
    }

    #[test]
    fn test_fixed_point_formatting() {
        let mut out = ArrayString::<32>::new();
        write_fixed(&mut out, 45.12344).unwrap();
        out.push(' ');
        write_fixed(&mut out, -0.5).unwrap();
        out.push(' ');
        write_fixed(&mut out, 0.0).unwrap();
        out.push(' ');
        write_fixed(&mut out, -123.19).unwrap();
        assert_eq!(out.as_str(), "+45.1234 -0.5000 +0.0000 -123.1900");
    }

    #[test]
    fn test_fixed_point_truncates() {
        let mut out = ArrayString::<32>::new();
        write_fixed(&mut out, 45.12345).unwrap();
        out.push(' ');
        write_fixed(&mut out, -0.00009).unwrap();
        assert_eq!(out.as_str(), "+45.1234 +0.0000");
    }

    #[test]
    fn test_value_rendering() {
        let mut out = ArrayString::<64>::new();
        Value::Events(0x0104).write_to(&mut out).unwrap();
        Value::Coordinate(None).write_to(&mut out).unwrap();
        Value::Letter('G').write_to(&mut out).unwrap();
        Value::Unsigned(7).write_to(&mut out).unwrap();
        assert_eq!(out.as_str(), "260 0x0104 NA G 7 ");
    }
}
