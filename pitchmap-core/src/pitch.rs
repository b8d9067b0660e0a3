//! # Pitch Mapping Module
//!
//! This module converts a frequency in Hz into a musical position: one of the
//! twelve pitch classes, an octave number and the deviation from the exact
//! equal-tempered pitch in cents.
//!
//! ## Features
//! - Equal temperament reference table anchored at C0 = 16.35 Hz
//! - Logarithmic frequency-to-semitone conversion with a non-negative wrap
//! - Cent deviation calculations bounded to a quarter tone either way
//! - Note name parsing (sharps and flats) and circle-of-fifths placement

use crate::error::{PitchMapError, Result};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Frequency of pitch class C at octave 0, in Hz.
pub const REFERENCE_C0_HZ: f32 = 16.35;

/// Number of pitch classes in an octave.
pub const PITCH_CLASS_COUNT: usize = 12;

/// One of the twelve canonical note names, independent of octave.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PitchClass {
    #[serde(rename = "C")]
    C,
    #[serde(rename = "C#")]
    CSharp,
    #[serde(rename = "D")]
    D,
    #[serde(rename = "D#")]
    DSharp,
    #[serde(rename = "E")]
    E,
    #[serde(rename = "F")]
    F,
    #[serde(rename = "F#")]
    FSharp,
    #[serde(rename = "G")]
    G,
    #[serde(rename = "G#")]
    GSharp,
    #[serde(rename = "A")]
    A,
    #[serde(rename = "A#")]
    ASharp,
    #[serde(rename = "B")]
    B,
}

impl PitchClass {
    /// All pitch classes in chromatic order starting at C.
    pub const ALL: [PitchClass; PITCH_CLASS_COUNT] = [
        PitchClass::C,
        PitchClass::CSharp,
        PitchClass::D,
        PitchClass::DSharp,
        PitchClass::E,
        PitchClass::F,
        PitchClass::FSharp,
        PitchClass::G,
        PitchClass::GSharp,
        PitchClass::A,
        PitchClass::ASharp,
        PitchClass::B,
    ];

    /// Chromatic index, C = 0 through B = 11.
    pub fn index(self) -> usize {
        self as usize
    }

    /// Looks up a pitch class by chromatic index. Indices wrap modulo 12.
    pub fn from_index(index: usize) -> PitchClass {
        Self::ALL[index % PITCH_CLASS_COUNT]
    }

    /// Canonical (sharp) spelling of the note name.
    pub fn name(self) -> &'static str {
        match self {
            PitchClass::C => "C",
            PitchClass::CSharp => "C#",
            PitchClass::D => "D",
            PitchClass::DSharp => "D#",
            PitchClass::E => "E",
            PitchClass::F => "F",
            PitchClass::FSharp => "F#",
            PitchClass::G => "G",
            PitchClass::GSharp => "G#",
            PitchClass::A => "A",
            PitchClass::ASharp => "A#",
            PitchClass::B => "B",
        }
    }

    /// Angle of this pitch class on a circle-of-fifths wheel, in degrees.
    ///
    /// C sits at 0, G at 30, D at 60 and so on clockwise, ending with F at 330.
    pub fn fifths_angle_degrees(self) -> f32 {
        ((self.index() * 7) % PITCH_CLASS_COUNT) as f32 * 30.0
    }

    /// Frequency of this pitch class at octave 0.
    pub fn reference_frequency(self) -> f32 {
        REFERENCE_FREQUENCIES[self.index()]
    }
}

impl fmt::Display for PitchClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for PitchClass {
    type Err = PitchMapError;

    fn from_str(s: &str) -> Result<Self> {
        NAME_MAP
            .get(s.trim())
            .copied()
            .ok_or_else(|| PitchMapError::InvalidNoteName(s.to_string()))
    }
}

/// Octave-0 frequencies for every pitch class, in chromatic order.
///
/// Computed once from [`REFERENCE_C0_HZ`] using twelve-tone equal temperament,
/// f = C0 * 2^(i/12).
static REFERENCE_FREQUENCIES: Lazy<[f32; PITCH_CLASS_COUNT]> = Lazy::new(|| {
    let mut table = [0.0; PITCH_CLASS_COUNT];
    for (i, frequency) in table.iter_mut().enumerate() {
        *frequency = REFERENCE_C0_HZ * 2.0_f32.powf(i as f32 / 12.0);
    }
    table
});

/// Static map for note name to pitch class lookups, flats included.
static NAME_MAP: Lazy<BTreeMap<&'static str, PitchClass>> = Lazy::new(|| {
    let mut map: BTreeMap<&'static str, PitchClass> =
        PitchClass::ALL.iter().map(|pc| (pc.name(), *pc)).collect();
    map.insert("Db", PitchClass::CSharp);
    map.insert("Eb", PitchClass::DSharp);
    map.insert("Gb", PitchClass::FSharp);
    map.insert("Ab", PitchClass::GSharp);
    map.insert("Bb", PitchClass::ASharp);
    map
});

/// The musical position of a single frequency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PitchMapping {
    pub pitch_class: PitchClass,
    /// Octave number, C-based (C4 is middle C). May be negative below C0.
    pub octave: i32,
    /// Deviation from the exact pitch, always within [-50, 50].
    pub cents: i32,
}

impl PitchMapping {
    /// Exact equal-tempered frequency of this pitch class and octave.
    pub fn exact_frequency(&self) -> f32 {
        (self.pitch_class.reference_frequency() as f64 * 2.0_f64.powi(self.octave)) as f32
    }
}

/// Maps a frequency to its pitch class, octave and cent deviation.
///
/// The frequency is first expressed in semitones above C0. The octave is the
/// floor of that value divided by 12; the pitch class is the semitone offset
/// wrapped into `[0, 12)` and rounded to the nearest class. A rounded offset of
/// 12 belongs to C of the next octave. Cents are measured against the exact
/// frequency of the chosen class and octave.
///
/// # Arguments
/// * `frequency_hz` - Input frequency in Hz
///
/// # Returns
/// * `Ok(mapping)` - Pitch class, octave and cents
/// * `Err(PitchMapError::InvalidFrequency)` - Zero, negative or non-finite input
///
/// # Range
/// No audible-range filtering happens here. Frequencies below C0 produce
/// negative octaves.
pub fn map_frequency_to_pitch(frequency_hz: f32) -> Result<PitchMapping> {
    if !frequency_hz.is_finite() || frequency_hz <= 0.0 {
        return Err(PitchMapError::InvalidFrequency(frequency_hz));
    }

    let semitones = 12.0 * (frequency_hz as f64 / REFERENCE_C0_HZ as f64).log2();

    let mut octave = (semitones / 12.0).floor() as i32;
    // rem_euclid keeps the offset non-negative for frequencies below C0.
    let mut index = semitones.rem_euclid(12.0).round() as usize;
    if index >= PITCH_CLASS_COUNT {
        index = 0;
        octave += 1;
    }

    let pitch_class = PitchClass::from_index(index);
    let exact = pitch_class.reference_frequency() as f64 * 2.0_f64.powi(octave);
    let cents = (1200.0 * (frequency_hz as f64 / exact).log2()).round() as i32;

    Ok(PitchMapping {
        pitch_class,
        octave,
        cents: cents.clamp(-50, 50),
    })
}

/// Calculates the deviation from a target frequency in cents.
///
/// Positive values are sharp, negative values are flat. 100 cents make a
/// semitone and 1200 an octave.
pub fn calculate_cents_deviation(freq: f32, target_freq: f32) -> f32 {
    1200.0 * (freq / target_freq).log2()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn a440_maps_to_a4() {
        let mapping = map_frequency_to_pitch(440.0).unwrap();
        assert_eq!(mapping.pitch_class, PitchClass::A);
        assert_eq!(mapping.octave, 4);
        assert_eq!(mapping.cents, 0);
    }

    #[test]
    fn rejects_non_positive_frequencies() {
        for f in [0.0, -1.0, f32::NAN, f32::INFINITY] {
            assert!(matches!(
                map_frequency_to_pitch(f),
                Err(PitchMapError::InvalidFrequency(_))
            ));
        }
    }

    #[test]
    fn reference_c0_is_octave_zero() {
        let mapping = map_frequency_to_pitch(REFERENCE_C0_HZ).unwrap();
        assert_eq!(mapping.pitch_class, PitchClass::C);
        assert_eq!(mapping.octave, 0);
        assert_eq!(mapping.cents, 0);
    }

    #[test]
    fn below_c0_wraps_to_a_non_negative_index() {
        // A-1 is an octave below A0 (27.5 Hz), i.e. 3 semitones under C0.
        let a_minus_one = PitchClass::A.reference_frequency() / 2.0;
        let mapping = map_frequency_to_pitch(a_minus_one).unwrap();
        assert_eq!(mapping.pitch_class, PitchClass::A);
        assert_eq!(mapping.octave, -1);
        assert_eq!(mapping.cents, 0);
    }

    #[test]
    fn rounding_up_to_twelve_moves_to_next_octave() {
        // 20 cents below C1 rounds to C1, not to a thirteenth class of octave 0.
        let c1 = REFERENCE_C0_HZ * 2.0;
        let flat_c1 = c1 * 2.0_f32.powf(-20.0 / 1200.0);
        let mapping = map_frequency_to_pitch(flat_c1).unwrap();
        assert_eq!(mapping.pitch_class, PitchClass::C);
        assert_eq!(mapping.octave, 1);
        assert_eq!(mapping.cents, -20);
    }

    #[test]
    fn fifths_wheel_angles() {
        assert_eq!(PitchClass::C.fifths_angle_degrees(), 0.0);
        assert_eq!(PitchClass::G.fifths_angle_degrees(), 30.0);
        assert_eq!(PitchClass::FSharp.fifths_angle_degrees(), 180.0);
        assert_eq!(PitchClass::F.fifths_angle_degrees(), 330.0);
    }

    #[test]
    fn parses_sharps_and_flats() {
        assert_eq!("C#".parse::<PitchClass>().unwrap(), PitchClass::CSharp);
        assert_eq!("Bb".parse::<PitchClass>().unwrap(), PitchClass::ASharp);
        assert!("H".parse::<PitchClass>().is_err());
    }

    #[test]
    fn cents_deviation_of_a_semitone() {
        let up = 440.0 * 2.0_f32.powf(1.0 / 12.0);
        assert!((calculate_cents_deviation(up, 440.0) - 100.0).abs() < 1e-3);
    }
}
