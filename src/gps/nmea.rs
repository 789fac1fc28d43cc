//! Single-sentence NMEA-0183 decoder.
//!
//! The decoder only runs once the GPS channel holds a complete line, so it
//! never waits on the UART. Each call consumes exactly one line: the sentence
//! starting at the last `$` on it is decoded and everything else, including
//! unsupported sentence types, is dropped.

use super::{GpsFix, FixQuality, KMH_PER_KNOT, MAX_SATELLITES_USED};
use crate::serial::{SerialChannel, LINE_TERMINATOR};
use core::convert::Infallible;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

/// Longest accepted sentence including `$` and CR. NMEA caps sentences at 82
/// characters.
pub const MAX_SENTENCE_LEN: usize = 96;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Sentence {
    /// Geographic position, latitude/longitude
    Gll,
    /// Track made good and ground speed
    Vtg,
    /// DOP and active satellites
    Gsa,
    /// Satellites in view
    Gsv,
    /// Recommended minimum navigation information
    Rmc,
}

impl Sentence {
    pub fn from_code(code: &[u8]) -> Option<Self> {
        match code {
            b"GLL" => Some(Sentence::Gll),
            b"VTG" => Some(Sentence::Vtg),
            b"GSA" => Some(Sentence::Gsa),
            b"GSV" => Some(Sentence::Gsv),
            b"RMC" => Some(Sentence::Rmc),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct DecoderStats {
    pub decoded: u32,
    pub ignored: u32,
    pub overlong: u32,
}

#[derive(Debug)]
pub struct NmeaDecoder {
    line: [u8; MAX_SENTENCE_LEN],
    stats: DecoderStats,
}

impl NmeaDecoder {
    pub fn new() -> Self {
        Self {
            line: [0; MAX_SENTENCE_LEN],
            stats: DecoderStats::default(),
        }
    }

    /// Consumes one buffered line from `channel` and applies it to `fix`.
    ///
    /// Returns `WouldBlock` when no complete line is buffered, `Ok(None)` when
    /// the line held nothing this decoder understands.
    pub fn decode<const N: usize>(
        &mut self,
        channel: &mut SerialChannel<N>,
        fix: &mut GpsFix,
    ) -> nb::Result<Option<Sentence>, Infallible> {
        let len = channel.read_line(&mut self.line)?;

        if len == 0 || self.line[len - 1] != LINE_TERMINATOR {
            let skipped = channel.skip_line();
            self.stats.overlong = self.stats.overlong.wrapping_add(1);
            debug!(kept = len, skipped, "overlong NMEA line discarded");
            return Ok(None);
        }

        let decoded = apply_sentence(&self.line[..len - 1], fix);
        match decoded {
            Some(sentence) => {
                self.stats.decoded = self.stats.decoded.wrapping_add(1);
                debug!(?sentence, valid = fix.valid, "NMEA sentence decoded");
            }
            None => {
                self.stats.ignored = self.stats.ignored.wrapping_add(1);
                trace!("NMEA line ignored");
            }
        }
        Ok(decoded)
    }

    pub fn stats(&self) -> &DecoderStats {
        &self.stats
    }
}

impl Default for NmeaDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Decodes one line (without its terminator) into `fix`.
///
/// Fields that are empty or fail to parse leave the matching `fix` member
/// untouched.
pub fn apply_sentence(line: &[u8], fix: &mut GpsFix) -> Option<Sentence> {
    let start = line.iter().rposition(|&b| b == b'$')?;
    let mut body = &line[start + 1..];
    if let Some(star) = body.iter().position(|&b| b == b'*') {
        body = &body[..star];
    }

    // Two talker bytes, three code bytes, then the field separator.
    if body.len() < 5 {
        return None;
    }
    let sentence = Sentence::from_code(&body[2..5])?;
    let rest: &[u8] = match body.get(5) {
        None => &[],
        Some(b',') => &body[6..],
        Some(_) => return None,
    };

    let mut fields = Fields::new(rest);
    match sentence {
        Sentence::Gll => {
            fields.position(fix);
            fields.utc(fix);
            fields.validity(fix);
        }
        Sentence::Vtg => {
            // Speed is only trusted alongside a valid position.
            if fix.valid {
                // Not reported until the receiver has computed a track.
                if let Some(course) = fields.float() {
                    fix.course = course;
                }
                fields.skip(5);
                if let Some(kmh) = fields.float() {
                    fix.speed_kmh = kmh;
                    fix.speed_knots = kmh / KMH_PER_KNOT;
                }
            }
        }
        Sentence::Gsa => {
            fields.skip(1);
            match fields.next().first() {
                Some(b'1') => fix.quality = FixQuality::None,
                Some(b'2') => fix.quality = FixQuality::TwoD,
                Some(b'3') => fix.quality = FixQuality::ThreeD,
                _ => {}
            }
            let mut used = heapless::Vec::new();
            for _ in 0..MAX_SATELLITES_USED {
                if let Some(prn) = fields.integer().and_then(|prn| u8::try_from(prn).ok()) {
                    // One slot per channel field, so this cannot overflow.
                    let _ = used.push(prn);
                }
            }
            fix.satellites_used = used;
            if let Some(pdop) = fields.float() {
                fix.pdop = pdop;
            }
            if let Some(hdop) = fields.float() {
                fix.hdop = hdop;
            }
            if let Some(vdop) = fields.float() {
                fix.vdop = vdop;
            }
        }
        Sentence::Gsv => {
            fields.skip(2);
            if let Some(siv) = fields.integer() {
                fix.satellites_in_view = siv;
            }
        }
        Sentence::Rmc => {
            fields.utc(fix);
            fields.validity(fix);
            fields.position(fix);
            if let Some(knots) = fields.float() {
                fix.speed_knots = knots;
                fix.speed_kmh = knots * KMH_PER_KNOT;
            }
            if let Some(course) = fields.float() {
                fix.course = course;
            }
            if let Some(date) = fields.integer() {
                fix.date = date;
            }
            if let Some(variation) = fields.float() {
                fix.magnetic_variation = variation;
            }
            if let Some(&sign) = fields.next().first() {
                fix.variation_east = sign == b'E';
            }
        }
    }
    Some(sentence)
}

/// Comma-separated field cursor. Running past the last field yields empty
/// fields, which parse as absent.
struct Fields<'a> {
    inner: core::slice::Split<'a, u8, fn(&u8) -> bool>,
}

fn is_separator(b: &u8) -> bool {
    *b == b','
}

impl<'a> Fields<'a> {
    fn new(rest: &'a [u8]) -> Self {
        Self {
            inner: rest.split(is_separator as fn(&u8) -> bool),
        }
    }

    fn next(&mut self) -> &'a [u8] {
        self.inner.next().unwrap_or(&[])
    }

    fn skip(&mut self, count: usize) {
        for _ in 0..count {
            self.next();
        }
    }

    /// Plain decimal only: `inf`, `nan` and exponents never reach the fix.
    fn float(&mut self) -> Option<f64> {
        let field = self.next();
        let numeric = |b: &u8| b.is_ascii_digit() || matches!(*b, b'.' | b'-' | b'+');
        if field.is_empty() || !field.iter().all(numeric) {
            return None;
        }
        core::str::from_utf8(field)
            .ok()?
            .parse::<f64>()
            .ok()
            .filter(|value| value.is_finite())
    }

    /// Integer part of a field, so `225444.00` reads as `225444`.
    fn integer(&mut self) -> Option<u32> {
        let field = self.next();
        let whole = field.split(|&b| b == b'.').next().unwrap_or(&[]);
        if whole.is_empty() {
            return None;
        }
        core::str::from_utf8(whole).ok()?.parse().ok()
    }

    fn position(&mut self, fix: &mut GpsFix) {
        let latitude = self.float();
        let north_south = self.next();
        let longitude = self.float();
        let east_west = self.next();

        if let Some(lat) = latitude {
            fix.latitude = if north_south.first() == Some(&b'S') { -lat } else { lat };
        }
        if let Some(lon) = longitude {
            fix.longitude = if east_west.first() == Some(&b'W') { -lon } else { lon };
        }
    }

    fn utc(&mut self, fix: &mut GpsFix) {
        if let Some(utc) = self.integer() {
            fix.utc = utc;
        }
    }

    fn validity(&mut self, fix: &mut GpsFix) {
        fix.valid = self.next().first() == Some(&b'A');
    }
}
