//! # Spectral Aggregation Module
//!
//! Folds one amplitude-spectrum frame into a key/octave energy map. Every bin
//! inside the audible range and above the noise floor is mapped to its pitch
//! class and octave, weighted by how close it lies to the exact pitch, and
//! summed into that bucket.
//!
//! The map is rebuilt from scratch for every frame. Nothing carries over
//! between calls.

use crate::config::AggregatorConfig;
use crate::error::{PitchMapError, Result};
use crate::pitch::{self, PITCH_CLASS_COUNT, PitchClass};
use crate::spectrum::Frame;
use log::debug;
use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Composite map key: a pitch class at a specific octave, e.g. `A4`.
///
/// Orders by octave first, then chromatically within the octave.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct KeyOctave {
    pub octave: i32,
    pub pitch_class: PitchClass,
}

impl KeyOctave {
    pub fn new(pitch_class: PitchClass, octave: i32) -> Self {
        Self {
            octave,
            pitch_class,
        }
    }

    /// Octaves 6 and up hold mostly cymbal and percussion energy; visualizers
    /// draw them without chroma gating.
    pub fn is_percussive(&self) -> bool {
        self.octave >= 6
    }
}

impl fmt::Display for KeyOctave {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.pitch_class, self.octave)
    }
}

impl FromStr for KeyOctave {
    type Err = PitchMapError;

    /// Parses names like `"A4"`, `"C#3"`, `"Bb2"` or `"B-1"`.
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let split = s
            .find(|c: char| c.is_ascii_digit() || c == '-')
            .ok_or_else(|| PitchMapError::InvalidNoteName(s.to_string()))?;
        let (name, octave) = s.split_at(split);
        let pitch_class = name
            .parse::<PitchClass>()
            .map_err(|_| PitchMapError::InvalidNoteName(s.to_string()))?;
        let octave = octave
            .parse::<i32>()
            .map_err(|_| PitchMapError::InvalidNoteName(s.to_string()))?;
        Ok(Self::new(pitch_class, octave))
    }
}

impl Serialize for KeyOctave {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Accumulated, proximity-weighted amplitude per `(pitch class, octave)`.
///
/// Values are non-negative. Keys that received no energy are absent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KeyOctaveAmplitudeMap {
    entries: BTreeMap<KeyOctave, f32>,
}

impl KeyOctaveAmplitudeMap {
    pub fn new() -> Self {
        Self::default()
    }

    fn accumulate(&mut self, key: KeyOctave, value: f32) {
        *self.entries.entry(key).or_insert(0.0) += value;
    }

    /// Accumulated amplitude for a key, if any bin contributed to it.
    pub fn get(&self, pitch_class: PitchClass, octave: i32) -> Option<f32> {
        self.entries.get(&KeyOctave::new(pitch_class, octave)).copied()
    }

    /// Like [`get`](Self::get) but missing keys read as zero.
    pub fn amplitude(&self, pitch_class: PitchClass, octave: i32) -> f32 {
        self.get(pitch_class, octave).unwrap_or(0.0)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates entries ordered by octave, then pitch class.
    pub fn iter(&self) -> impl Iterator<Item = (KeyOctave, f32)> + '_ {
        self.entries.iter().map(|(k, v)| (*k, *v))
    }

    /// Distinct octaves present in the map, ascending.
    pub fn octaves(&self) -> Vec<i32> {
        let mut octaves: Vec<i32> = self.entries.keys().map(|k| k.octave).collect();
        octaves.dedup();
        octaves
    }

    /// Amplitudes of one octave in chromatic order, zero where absent.
    pub fn octave_row(&self, octave: i32) -> [f32; PITCH_CLASS_COUNT] {
        let mut row = [0.0; PITCH_CLASS_COUNT];
        for (key, value) in self.iter().filter(|(k, _)| k.octave == octave) {
            row[key.pitch_class.index()] = value;
        }
        row
    }

    /// Sum over octaves for each pitch class, in chromatic order.
    pub fn pitch_class_totals(&self) -> [f32; PITCH_CLASS_COUNT] {
        let mut totals = [0.0; PITCH_CLASS_COUNT];
        for (key, value) in self.iter() {
            totals[key.pitch_class.index()] += value;
        }
        totals
    }

    pub fn total_energy(&self) -> f32 {
        self.entries.values().sum()
    }

    /// The `n` loudest entries, loudest first.
    pub fn strongest(&self, n: usize) -> Vec<(KeyOctave, f32)> {
        let mut ranked: Vec<(KeyOctave, f32)> = self.iter().collect();
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        ranked.truncate(n);
        ranked
    }
}

impl Serialize for KeyOctaveAmplitudeMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (key, value) in &self.entries {
            map.serialize_entry(&key.to_string(), value)?;
        }
        map.end()
    }
}

/// Per-frame bookkeeping of what happened to each bin.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FrameReport {
    pub bins_total: usize,
    /// Bins that contributed non-zero energy to the map.
    pub bins_aggregated: usize,
    /// Non-finite amplitudes.
    pub malformed_bins: usize,
    /// Frequency outside the audible range or octave outside the configured range.
    /// Counted before the noise floor is checked, so silent bins count too.
    pub out_of_range: usize,
    pub below_noise_floor: usize,
    /// Bins at or beyond the weighting half width.
    pub zero_weight: usize,
    /// `(expected, actual)` when the spectrum length did not match the block size.
    pub length_mismatch: Option<(usize, usize)>,
}

/// Turns amplitude-spectrum frames into [`KeyOctaveAmplitudeMap`]s.
///
/// Holds only validated configuration. It never sees the audio source, only
/// the frame data passed to [`aggregate`](Self::aggregate).
#[derive(Debug, Clone)]
pub struct SpectralAggregator {
    config: AggregatorConfig,
    expected_bins: Option<usize>,
}

impl Default for SpectralAggregator {
    fn default() -> Self {
        Self {
            config: AggregatorConfig::default(),
            expected_bins: None,
        }
    }
}

impl SpectralAggregator {
    /// Creates an aggregator after validating `config`.
    pub fn new(config: AggregatorConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            expected_bins: None,
        })
    }

    /// Reports frames whose spectrum length differs from `bins`.
    pub fn with_expected_bins(mut self, bins: usize) -> Self {
        self.expected_bins = Some(bins);
        self
    }

    pub fn config(&self) -> &AggregatorConfig {
        &self.config
    }

    /// Builds the key/octave map for one frame.
    pub fn aggregate(&self, frame: &Frame) -> KeyOctaveAmplitudeMap {
        self.aggregate_with_report(frame).0
    }

    /// Builds the key/octave map for one frame and reports skipped bins.
    ///
    /// Per bin `i`:
    /// 1. `frequency = i * sample_rate / (2 * len)`
    /// 2. skip if the amplitude is non-finite, the frequency is outside the
    ///    audible range, or the amplitude is at or below the noise floor
    /// 3. map the frequency to `(pitch class, octave, cents)`
    /// 4. `weight = max(0, 1 - |cents| / half_width)`
    /// 5. add `amplitude * weight` to the bucket
    pub fn aggregate_with_report(&self, frame: &Frame) -> (KeyOctaveAmplitudeMap, FrameReport) {
        let cfg = &self.config;
        let spectrum = frame.amplitude_spectrum();
        let mut map = KeyOctaveAmplitudeMap::new();
        let mut report = FrameReport {
            bins_total: spectrum.len(),
            ..FrameReport::default()
        };

        if let Some(expected) = self.expected_bins {
            if expected != spectrum.len() {
                debug!(
                    "Spectrum length {} does not match expected {}; aggregating as delivered",
                    spectrum.len(),
                    expected
                );
                report.length_mismatch = Some((expected, spectrum.len()));
            }
        }

        for (index, &amplitude) in spectrum.iter().enumerate() {
            if !amplitude.is_finite() {
                report.malformed_bins += 1;
                continue;
            }

            let frequency = frame.bin_frequency(index);
            if frequency < cfg.min_frequency_hz || frequency > cfg.max_frequency_hz {
                report.out_of_range += 1;
                continue;
            }

            if amplitude <= cfg.noise_floor {
                report.below_noise_floor += 1;
                continue;
            }

            let mapping = match pitch::map_frequency_to_pitch(frequency) {
                Ok(mapping) => mapping,
                Err(_) => {
                    report.out_of_range += 1;
                    continue;
                }
            };
            if mapping.octave < cfg.min_octave || mapping.octave > cfg.max_octave {
                report.out_of_range += 1;
                continue;
            }

            let weight = self.proximity_weight(mapping.cents);
            if weight <= 0.0 {
                report.zero_weight += 1;
                continue;
            }

            map.accumulate(
                KeyOctave::new(mapping.pitch_class, mapping.octave),
                amplitude * weight,
            );
            report.bins_aggregated += 1;
        }

        if report.malformed_bins > 0 {
            debug!("Skipped {} non-finite bins", report.malformed_bins);
        }

        (map, report)
    }

    /// Linear falloff from 1 at the exact pitch to 0 at the half width.
    fn proximity_weight(&self, cents: i32) -> f32 {
        (1.0 - cents.unsigned_abs() as f32 / self.config.weighting_half_width_cents).max(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_with(bins: &[(usize, f32)], len: usize, sample_rate: f32) -> Frame {
        let mut spectrum = vec![0.0; len];
        for &(i, a) in bins {
            spectrum[i] = a;
        }
        Frame::new(spectrum, sample_rate).unwrap()
    }

    #[test]
    fn silent_frame_gives_empty_map() {
        let frame = frame_with(&[], 1024, 44100.0);
        let (map, report) = SpectralAggregator::default().aggregate_with_report(&frame);
        assert!(map.is_empty());
        assert_eq!(report.bins_aggregated, 0);
        assert_eq!(report.bins_total, 1024);
    }

    #[test]
    fn dc_bin_is_out_of_range() {
        // Out-of-range bins are counted whatever their amplitude, so a loud DC
        // bin reports exactly like silence.
        let aggregator = SpectralAggregator::default();
        let (_, baseline) = aggregator.aggregate_with_report(&frame_with(&[], 1024, 44100.0));
        assert_eq!(baseline.out_of_range, 96);
        let frame = frame_with(&[(0, 5.0)], 1024, 44100.0);
        let (map, report) = aggregator.aggregate_with_report(&frame);
        assert!(map.is_empty());
        assert_eq!(report, baseline);
    }

    #[test]
    fn noise_floor_is_exclusive() {
        let at_floor = frame_with(&[(20, 0.01)], 1024, 44100.0);
        let (map, report) = SpectralAggregator::default().aggregate_with_report(&at_floor);
        assert!(map.is_empty());
        assert_eq!(report.bins_aggregated, 0);

        let above_floor = frame_with(&[(20, 0.02)], 1024, 44100.0);
        assert_eq!(SpectralAggregator::default().aggregate(&above_floor).len(), 1);
    }

    #[test]
    fn corrupt_bins_are_skipped_individually() {
        let frame = frame_with(&[(2, f32::NAN), (3, f32::INFINITY), (20, 1.0)], 1024, 44100.0);
        let (map, report) = SpectralAggregator::default().aggregate_with_report(&frame);
        assert_eq!(report.malformed_bins, 2);
        assert_eq!(report.bins_aggregated, 1);
        assert!(map.total_energy() > 0.0);
        assert!(map.total_energy().is_finite());
    }

    #[test]
    fn bins_in_one_bucket_are_summed() {
        // At 8 kHz over 4096 bins, bins are ~0.98 Hz apart, so neighbours
        // around A2 (110 Hz) land in the same bucket.
        let frame = frame_with(&[(112, 1.0), (113, 1.0)], 4096, 8000.0);
        let aggregator = SpectralAggregator::default();
        let map = aggregator.aggregate(&frame);
        assert_eq!(map.len(), 1);
        let single_112 = aggregator.aggregate(&frame_with(&[(112, 1.0)], 4096, 8000.0));
        let single_113 = aggregator.aggregate(&frame_with(&[(113, 1.0)], 4096, 8000.0));
        let expected = single_112.amplitude(PitchClass::A, 2) + single_113.amplitude(PitchClass::A, 2);
        assert!((map.amplitude(PitchClass::A, 2) - expected).abs() < 1e-6);
    }

    #[test]
    fn octave_range_is_enforced() {
        // Bin 465 sits near 10 kHz, which is octave 9 above C0.
        let aggregator = SpectralAggregator::default();
        let (_, baseline) = aggregator.aggregate_with_report(&frame_with(&[], 1024, 44100.0));
        let (map, report) = aggregator.aggregate_with_report(&frame_with(&[(465, 1.0)], 1024, 44100.0));
        assert!(map.is_empty());
        assert_eq!(report.out_of_range, baseline.out_of_range + 1);

        let wide = SpectralAggregator::new(AggregatorConfig {
            max_octave: 10,
            ..AggregatorConfig::default()
        })
        .unwrap();
        let map = wide.aggregate(&frame_with(&[(465, 1.0)], 1024, 44100.0));
        assert_eq!(map.octaves(), vec![9]);
    }

    #[test]
    fn length_mismatch_is_reported_not_fatal() {
        let frame = frame_with(&[(20, 1.0)], 512, 44100.0);
        let aggregator = SpectralAggregator::default().with_expected_bins(1024);
        let (map, report) = aggregator.aggregate_with_report(&frame);
        assert_eq!(report.length_mismatch, Some((1024, 512)));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn key_octave_names() {
        let key: KeyOctave = "C#3".parse().unwrap();
        assert_eq!(key, KeyOctave::new(PitchClass::CSharp, 3));
        assert_eq!(key.to_string(), "C#3");
        let key: KeyOctave = "Bb-1".parse().unwrap();
        assert_eq!(key, KeyOctave::new(PitchClass::ASharp, -1));
        assert!("4".parse::<KeyOctave>().is_err());
        assert!("A".parse::<KeyOctave>().is_err());
    }

    #[test]
    fn strongest_orders_by_amplitude() {
        let frame = frame_with(&[(20, 0.5), (41, 2.0)], 1024, 44100.0);
        let map = SpectralAggregator::default().aggregate(&frame);
        let top = map.strongest(1);
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].1, map.iter().map(|(_, v)| v).fold(0.0, f32::max));
    }
}
