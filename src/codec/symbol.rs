//! OOK pulse-width symbol layer.
//!
//! A symbol is one on/off pulse pair: `0` is on for one unit and off for
//! two, `1` is on for two units and off for one, so every symbol lasts three
//! units. A frame on the air is
//!
//! ```text
//! [preamble: 7 x '0'] ['1' SOF] [per byte: '1' stuff + 8 data bits] ['0' EOF]
//! ```
//!
//! The stuffed `1` in front of every message byte means a `0` at a stuff
//! position can only be the end-of-frame, regardless of byte content.
//! Decoders recover the unit duration by measuring the preamble.

use crate::core::constants::{MAX_FRAME_BYTES, PREAMBLE_SYMBOLS};
use crate::core::FramingError;

/// One on-off-keyed pulse-width symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Symbol {
    /// On for one unit, off for two.
    Zero,
    /// On for two units, off for one.
    One,
}

impl Symbol {
    /// On-duration in units.
    pub fn on_units(self) -> u32 {
        match self {
            Symbol::Zero => 1,
            Symbol::One => 2,
        }
    }

    /// Off-duration in units.
    pub fn off_units(self) -> u32 {
        match self {
            Symbol::Zero => 2,
            Symbol::One => 1,
        }
    }
}

/// One on/off pulse pair in microseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pulse {
    /// Carrier-on duration.
    pub on_micros: u32,
    /// Carrier-off duration.
    pub off_micros: u32,
}

/// Encode frame bytes into the full symbol sequence, preamble through EOF.
pub fn encode_frame(bytes: &[u8]) -> Vec<Symbol> {
    let mut symbols = Vec::with_capacity(PREAMBLE_SYMBOLS + 2 + bytes.len() * 9);
    symbols.extend(std::iter::repeat(Symbol::Zero).take(PREAMBLE_SYMBOLS));
    symbols.push(Symbol::One); // SOF
    for byte in bytes {
        symbols.push(Symbol::One); // stuff bit
        for bit in (0..8).rev() {
            symbols.push(if (byte >> bit) & 1 == 1 {
                Symbol::One
            } else {
                Symbol::Zero
            });
        }
    }
    symbols.push(Symbol::Zero); // EOF
    symbols
}

/// Decode a symbol sequence back into frame bytes.
///
/// Leading `0` symbols beyond the required seven are tolerated (a receiver
/// may join the preamble late or count extra idle symbols); anything after
/// the EOF is ignored.
pub fn decode_frame(symbols: &[Symbol]) -> Result<Vec<u8>, FramingError> {
    let mut idx = 0;
    while idx < symbols.len() && symbols[idx] == Symbol::Zero {
        idx += 1;
    }
    if idx < PREAMBLE_SYMBOLS {
        return Err(FramingError::PreambleShort);
    }
    if symbols.get(idx) != Some(&Symbol::One) {
        return Err(FramingError::BadSof);
    }
    idx += 1; // SOF

    let mut bytes = Vec::new();
    loop {
        match symbols.get(idx) {
            None => return Err(FramingError::Truncated),
            Some(Symbol::Zero) => {
                // EOF. A frame with no bytes means the first stuff bit was
                // lost rather than a legal (empty) message.
                if bytes.is_empty() {
                    return Err(FramingError::BadStuffBit);
                }
                return Ok(bytes);
            }
            Some(Symbol::One) => {
                idx += 1; // stuff bit
                if symbols.len() < idx + 8 {
                    return Err(FramingError::Truncated);
                }
                let mut byte = 0u8;
                for _ in 0..8 {
                    byte <<= 1;
                    if symbols[idx] == Symbol::One {
                        byte |= 1;
                    }
                    idx += 1;
                }
                if bytes.len() == MAX_FRAME_BYTES {
                    return Err(FramingError::FrameTooLong);
                }
                bytes.push(byte);
            }
        }
    }
}

/// Render symbols as timed pulses at the given unit duration.
pub fn modulate(symbols: &[Symbol], unit_micros: u32) -> Vec<Pulse> {
    symbols
        .iter()
        .map(|s| Pulse {
            on_micros: s.on_units() * unit_micros,
            off_micros: s.off_units() * unit_micros,
        })
        .collect()
}

/// Recover symbols from timed pulses.
///
/// The unit is estimated from the preamble (seven `0` pulses, three units
/// each); each later pulse is classified by its on-duration. A pulse whose
/// timing fits neither symbol ends the usable stream, which the frame
/// decoder then reports as truncation. The final pulse's off-duration is not
/// validated: after the EOF the carrier simply stays off.
pub fn demodulate(pulses: &[Pulse]) -> Result<Vec<Symbol>, FramingError> {
    if pulses.len() < PREAMBLE_SYMBOLS {
        return Err(FramingError::PreambleShort);
    }
    let total: u32 = pulses[..PREAMBLE_SYMBOLS]
        .iter()
        .map(|p| p.on_micros + p.off_micros)
        .sum();
    let unit = total / (PREAMBLE_SYMBOLS as u32 * 3);
    if unit == 0 {
        return Err(FramingError::PreambleShort);
    }

    let mut symbols = Vec::with_capacity(pulses.len());
    for (i, pulse) in pulses.iter().enumerate() {
        let last = i + 1 == pulses.len();
        match classify(pulse, unit, last) {
            Some(symbol) => symbols.push(symbol),
            None => break,
        }
    }
    Ok(symbols)
}

/// Classify one pulse against the recovered unit, with +-50% tolerance.
fn classify(pulse: &Pulse, unit: u32, last: bool) -> Option<Symbol> {
    let half = unit / 2;
    let symbol = if pulse.on_micros + half < 2 * unit {
        Symbol::Zero
    } else {
        Symbol::One
    };
    let on_ok = pulse.on_micros >= unit.saturating_sub(half)
        && pulse.on_micros <= 2 * unit + half;
    let off_ok = last || {
        let expect = symbol.off_units() * unit;
        pulse.off_micros >= expect.saturating_sub(half) && pulse.off_micros <= expect + half
    };
    (on_ok && off_ok).then_some(symbol)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_symbol_roundtrip() {
        let bytes = [0x13, 0x00, 0xFF, 0xA5];
        let symbols = encode_frame(&bytes);
        assert_eq!(symbols.len(), PREAMBLE_SYMBOLS + 1 + 9 * bytes.len() + 1);
        assert_eq!(decode_frame(&symbols).unwrap(), bytes);
    }

    #[test]
    fn test_stuff_bit_delimits_zero_bytes() {
        // A byte of all zeros must not be mistaken for EOF.
        let symbols = encode_frame(&[0x00, 0x00]);
        assert_eq!(decode_frame(&symbols).unwrap(), vec![0x00, 0x00]);
    }

    #[test]
    fn test_short_preamble_rejected() {
        let mut symbols = encode_frame(&[0xAA]);
        symbols.drain(..3); // leave only 4 preamble zeros
        assert_eq!(decode_frame(&symbols), Err(FramingError::PreambleShort));
    }

    #[test]
    fn test_long_preamble_tolerated() {
        let mut symbols = vec![Symbol::Zero; 5];
        symbols.extend(encode_frame(&[0x42]));
        assert_eq!(decode_frame(&symbols).unwrap(), vec![0x42]);
    }

    #[test]
    fn test_missing_sof() {
        let symbols = vec![Symbol::Zero; 12];
        assert_eq!(decode_frame(&symbols), Err(FramingError::BadSof));
    }

    #[test]
    fn test_truncated_mid_byte() {
        let mut symbols = encode_frame(&[0xAA, 0xBB]);
        symbols.truncate(symbols.len() - 6); // chop EOF and part of last byte
        assert_eq!(decode_frame(&symbols), Err(FramingError::Truncated));
    }

    #[test]
    fn test_missing_eof_is_truncated() {
        let mut symbols = encode_frame(&[0xAA]);
        symbols.pop();
        assert_eq!(decode_frame(&symbols), Err(FramingError::Truncated));
    }

    #[test]
    fn test_empty_frame_is_bad_stuff_bit() {
        let mut symbols = vec![Symbol::Zero; PREAMBLE_SYMBOLS];
        symbols.push(Symbol::One); // SOF
        symbols.push(Symbol::Zero); // immediate EOF
        assert_eq!(decode_frame(&symbols), Err(FramingError::BadStuffBit));
    }

    #[test]
    fn test_frame_too_long() {
        let bytes = vec![0x55u8; MAX_FRAME_BYTES + 1];
        let symbols = encode_frame(&bytes);
        assert_eq!(decode_frame(&symbols), Err(FramingError::FrameTooLong));
    }

    #[test]
    fn test_modulation_roundtrip() {
        let bytes = [0xDE, 0xAD, 0xBE, 0xEF];
        let symbols = encode_frame(&bytes);
        let pulses = modulate(&symbols, 10);
        let recovered = demodulate(&pulses).unwrap();
        assert_eq!(recovered, symbols);
        assert_eq!(decode_frame(&recovered).unwrap(), bytes);
    }

    #[test]
    fn test_demodulation_recovers_foreign_unit() {
        // A transmitter running a 37 us unit is decodable without prior
        // knowledge of its clock.
        let bytes = [0x01, 0x80];
        let pulses = modulate(&encode_frame(&bytes), 37);
        let symbols = demodulate(&pulses).unwrap();
        assert_eq!(decode_frame(&symbols).unwrap(), bytes);
    }

    #[test]
    fn test_demodulation_with_jitter() {
        let bytes = [0x5A];
        let mut pulses = modulate(&encode_frame(&bytes), 100);
        for (i, p) in pulses.iter_mut().enumerate() {
            // +-20% timing jitter, alternating sign
            let tweak = |d: u32| if i % 2 == 0 { d + d / 5 } else { d - d / 5 };
            p.on_micros = tweak(p.on_micros);
            p.off_micros = tweak(p.off_micros);
        }
        let symbols = demodulate(&pulses).unwrap();
        assert_eq!(decode_frame(&symbols).unwrap(), bytes);
    }

    #[test]
    fn test_garbage_pulse_truncates_stream() {
        let bytes = [0xAA, 0xBB];
        let mut pulses = modulate(&encode_frame(&bytes), 10);
        let mid = pulses.len() / 2;
        pulses[mid] = Pulse {
            on_micros: 300,
            off_micros: 5,
        };
        let symbols = demodulate(&pulses).unwrap();
        assert_eq!(decode_frame(&symbols), Err(FramingError::Truncated));
    }
}
