//! # Chroma Summary Module
//!
//! A twelve-bin energy-per-pitch-class vector used to decide which pitch
//! classes a visualizer should emphasise. It is either supplied by the
//! feature extractor alongside the spectrum or derived from the key/octave
//! map by folding octaves together.

use crate::aggregate::KeyOctaveAmplitudeMap;
use crate::pitch::{PITCH_CLASS_COUNT, PitchClass};
use serde::{Deserialize, Serialize};

/// Chroma level above which a pitch class gets a highlighted label.
pub const GLOW_THRESHOLD: f32 = 0.6;

/// Chroma level above which a pitch class is drawn at all.
pub const LINE_THRESHOLD: f32 = 0.4;

/// How strongly a pitch class should be drawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum Emphasis {
    Hidden,
    Line,
    Glow,
}

/// Energy per pitch class, each value in `[0, 1]`, chromatic order from C.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ChromaVector([f32; PITCH_CLASS_COUNT]);

impl ChromaVector {
    /// Wraps values from an external extractor.
    ///
    /// Non-finite values become 0 and everything else is clamped into `[0, 1]`.
    pub fn from_values(values: [f32; PITCH_CLASS_COUNT]) -> Self {
        let mut sanitized = values;
        for v in sanitized.iter_mut() {
            *v = if v.is_finite() { v.clamp(0.0, 1.0) } else { 0.0 };
        }
        Self(sanitized)
    }

    /// Folds all octaves of a key/octave map together and normalises by the
    /// loudest pitch class. An empty map yields all zeros.
    pub fn from_map(map: &KeyOctaveAmplitudeMap) -> Self {
        let totals = map.pitch_class_totals();
        let max = totals.iter().copied().fold(0.0_f32, f32::max);
        if max <= 0.0 || !max.is_finite() {
            return Self::default();
        }
        Self::from_values(totals.map(|t| t / max))
    }

    pub fn get(&self, pitch_class: PitchClass) -> f32 {
        self.0[pitch_class.index()]
    }

    pub fn values(&self) -> &[f32; PITCH_CLASS_COUNT] {
        &self.0
    }

    pub fn emphasis(&self, pitch_class: PitchClass) -> Emphasis {
        let level = self.get(pitch_class);
        if level > GLOW_THRESHOLD {
            Emphasis::Glow
        } else if level > LINE_THRESHOLD {
            Emphasis::Line
        } else {
            Emphasis::Hidden
        }
    }

    /// Pitch class with the highest chroma value, if any is non-zero.
    pub fn dominant(&self) -> Option<PitchClass> {
        self.0
            .iter()
            .enumerate()
            .filter(|(_, v)| **v > 0.0)
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(i, _)| PitchClass::from_index(i))
    }
}
