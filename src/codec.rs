//! Beep protocol codec.
//!
//! A fan intensity (0-255) is quantized to a 6-bit level (`intensity >> 2`) and sent as
//! three base-4 digits, most significant first. Each digit is played as one of four tones.
//! The mapping is pure and lossless over the 64 levels.

use std::fmt;

use crate::error::{Error, Result};

/// Number of tones in one sequence.
pub const SEQUENCE_LENGTH: usize = 3;

/// Number of distinct levels a sequence can carry (4^3).
pub const LEVEL_COUNT: u32 = 64;

/// Requested fan power, 0-255.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Intensity(u8);

impl Intensity {
    pub const OFF: Intensity = Intensity(0);
    pub const FULL: Intensity = Intensity(255);

    pub fn new(value: u8) -> Self {
        Self(value)
    }

    /// Convert a G-code style float, rejecting anything outside 0..=255.
    pub fn try_from_f64(value: f64) -> Result<Self> {
        if !value.is_finite() || !(0.0..=255.0).contains(&value) {
            return Err(Error::InvalidIntensity(value));
        }
        Ok(Self(value as u8))
    }

    /// Convert a float, truncating and clamping into 0..=255. NaN maps to 0.
    pub fn saturating_from_f64(value: f64) -> Self {
        if value.is_nan() || value <= 0.0 {
            Self(0)
        } else if value >= 255.0 {
            Self(255)
        } else {
            Self(value as u8)
        }
    }

    pub fn value(self) -> u8 {
        self.0
    }

    pub fn level(self) -> Level {
        Level(self.0 >> 2)
    }
}

/// Quantized fan intensity, 0-63.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Level(u8);

impl Level {
    pub const OFF: Level = Level(0);
    pub const MAX: Level = Level(63);

    pub fn new(value: u32) -> Result<Self> {
        if value >= LEVEL_COUNT {
            return Err(Error::LevelOutOfRange(value));
        }
        Ok(Self(value as u8))
    }

    pub fn value(self) -> u8 {
        self.0
    }

    pub fn is_off(self) -> bool {
        self.0 == 0
    }

    /// Duty cycle percentage this level stands for, 0.0 ..= 100.0.
    pub fn duty_percent(self) -> f64 {
        f64::from(self.0) * 100.0 / f64::from(Self::MAX.0)
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One of the four tones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Symbol {
    S0,
    S1,
    S2,
    S3,
}

impl Symbol {
    pub const ALL: [Symbol; 4] = [Symbol::S0, Symbol::S1, Symbol::S2, Symbol::S3];

    pub fn index(self) -> usize {
        match self {
            Symbol::S0 => 0,
            Symbol::S1 => 1,
            Symbol::S2 => 2,
            Symbol::S3 => 3,
        }
    }
}

impl TryFrom<u8> for Symbol {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Symbol::S0),
            1 => Ok(Symbol::S1),
            2 => Ok(Symbol::S2),
            3 => Ok(Symbol::S3),
            other => Err(Error::InvalidSymbol(other)),
        }
    }
}

impl TryFrom<usize> for Symbol {
    type Error = Error;

    fn try_from(value: usize) -> Result<Self> {
        u8::try_from(value)
            .map_err(|_| Error::InvalidSymbol(u8::MAX))
            .and_then(Symbol::try_from)
    }
}

/// Three symbols, most significant digit first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Sequence(pub [Symbol; SEQUENCE_LENGTH]);

impl Sequence {
    pub fn symbols(&self) -> &[Symbol; SEQUENCE_LENGTH] {
        &self.0
    }

    /// Build a sequence from raw digits, rejecting anything outside the alphabet.
    pub fn from_digits(digits: [u8; SEQUENCE_LENGTH]) -> Result<Self> {
        Ok(Self([
            Symbol::try_from(digits[0])?,
            Symbol::try_from(digits[1])?,
            Symbol::try_from(digits[2])?,
        ]))
    }
}

impl fmt::Display for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for symbol in self.0 {
            write!(f, "{}", symbol.index())?;
        }
        Ok(())
    }
}

pub fn encode(intensity: Intensity) -> Sequence {
    encode_level(intensity.level())
}

pub fn encode_level(level: Level) -> Sequence {
    let v = level.value() as usize;
    // Each digit is < 4 so the lookups cannot fail
    Sequence([
        Symbol::ALL[(v >> 4) & 3],
        Symbol::ALL[(v >> 2) & 3],
        Symbol::ALL[v & 3],
    ])
}

pub fn decode(sequence: &Sequence) -> Level {
    let value = sequence
        .symbols()
        .iter()
        .fold(0u8, |acc, s| (acc << 2) | s.index() as u8);
    Level(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn round_trip_quantizes_to_level() {
        for i in 0..=255u8 {
            let seq = encode(Intensity::new(i));
            assert_eq!(decode(&seq).value(), i >> 2, "intensity {}", i);
        }
    }

    #[test]
    fn every_level_has_a_distinct_sequence() {
        let mut seen = HashSet::new();
        for v in 0..LEVEL_COUNT {
            let level = Level::new(v).unwrap();
            let seq = encode_level(level);
            assert!(seen.insert(seq), "duplicate sequence for level {}", v);
            assert_eq!(decode(&seq), level);
        }
        assert_eq!(seen.len(), 64);
    }

    #[test]
    fn most_significant_digit_first() {
        let seq = encode_level(Level::new(0b10_01_11).unwrap());
        assert_eq!(seq.to_string(), "213");
        assert_eq!(encode(Intensity::FULL).to_string(), "333");
        assert_eq!(encode(Intensity::OFF).to_string(), "000");
    }

    #[test]
    fn rejects_values_outside_alphabet() {
        assert!(matches!(Symbol::try_from(4u8), Err(Error::InvalidSymbol(4))));
        assert!(Sequence::from_digits([1, 4, 0]).is_err());
        assert!(matches!(Level::new(64), Err(Error::LevelOutOfRange(64))));
    }

    #[test]
    fn intensity_conversions_are_explicit() {
        assert!(Intensity::try_from_f64(255.5).is_err());
        assert!(Intensity::try_from_f64(-1.0).is_err());
        assert!(Intensity::try_from_f64(f64::NAN).is_err());
        assert_eq!(Intensity::try_from_f64(127.9).unwrap().value(), 127);
        assert_eq!(Intensity::saturating_from_f64(300.0), Intensity::FULL);
        assert_eq!(Intensity::saturating_from_f64(-3.0), Intensity::OFF);
    }

    #[test]
    fn level_to_duty() {
        assert_eq!(Level::OFF.duty_percent(), 0.0);
        assert_eq!(Level::MAX.duty_percent(), 100.0);
    }
}
