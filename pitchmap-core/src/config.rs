//! # Configuration Module
//!
//! Engine settings, loadable from TOML. Every field has a default so a config
//! file only needs to list what it changes.
//!
//! ```toml
//! [aggregator]
//! noise_floor = 0.02
//!
//! [session]
//! block_size = 4096
//! ```

use crate::error::{PitchMapError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub aggregator: AggregatorConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

/// Settings for [`crate::aggregate::SpectralAggregator`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatorConfig {
    /// Amplitudes at or below this are treated as noise.
    #[serde(default = "default_noise_floor")]
    pub noise_floor: f32,
    /// Cent distance at which a bin's weight reaches zero.
    #[serde(default = "default_half_width")]
    pub weighting_half_width_cents: f32,
    #[serde(default = "default_min_frequency")]
    pub min_frequency_hz: f32,
    #[serde(default = "default_max_frequency")]
    pub max_frequency_hz: f32,
    #[serde(default = "default_min_octave")]
    pub min_octave: i32,
    #[serde(default = "default_max_octave")]
    pub max_octave: i32,
}

/// Settings for [`crate::session::Session`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Samples per analysed block. The spectrum has `block_size / 2` bins.
    #[serde(default = "default_block_size")]
    pub block_size: usize,
    /// Derive chroma from the map when the source does not supply one.
    #[serde(default = "default_derive_chroma")]
    pub derive_chroma: bool,
    /// Pending update notifications per subscriber before new ones are dropped.
    #[serde(default = "default_notify_capacity")]
    pub notify_capacity: usize,
    /// Preferred capture rate for live input, in Hz.
    #[serde(default = "default_sample_rate")]
    pub expected_sample_rate: u32,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            noise_floor: default_noise_floor(),
            weighting_half_width_cents: default_half_width(),
            min_frequency_hz: default_min_frequency(),
            max_frequency_hz: default_max_frequency(),
            min_octave: default_min_octave(),
            max_octave: default_max_octave(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            block_size: default_block_size(),
            derive_chroma: default_derive_chroma(),
            notify_capacity: default_notify_capacity(),
            expected_sample_rate: default_sample_rate(),
        }
    }
}

fn default_noise_floor() -> f32 {
    0.01
}

fn default_half_width() -> f32 {
    50.0
}

fn default_min_frequency() -> f32 {
    20.0
}

fn default_max_frequency() -> f32 {
    20000.0
}

fn default_min_octave() -> i32 {
    0
}

fn default_max_octave() -> i32 {
    8
}

fn default_block_size() -> usize {
    2048
}

fn default_derive_chroma() -> bool {
    true
}

fn default_notify_capacity() -> usize {
    4
}

fn default_sample_rate() -> u32 {
    44100
}

impl AggregatorConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.noise_floor.is_finite() || self.noise_floor < 0.0 {
            return Err(invalid(format!("noise_floor must be >= 0, got {}", self.noise_floor)));
        }
        if !self.weighting_half_width_cents.is_finite() || self.weighting_half_width_cents <= 0.0 {
            return Err(invalid(format!(
                "weighting_half_width_cents must be > 0, got {}",
                self.weighting_half_width_cents
            )));
        }
        if !(self.min_frequency_hz.is_finite() && self.max_frequency_hz.is_finite())
            || self.min_frequency_hz <= 0.0
            || self.min_frequency_hz > self.max_frequency_hz
        {
            return Err(invalid(format!(
                "frequency range {}..={} Hz is empty or non-positive",
                self.min_frequency_hz, self.max_frequency_hz
            )));
        }
        if self.min_octave > self.max_octave {
            return Err(invalid(format!(
                "octave range {}..={} is empty",
                self.min_octave, self.max_octave
            )));
        }
        Ok(())
    }
}

impl SessionConfig {
    pub fn validate(&self) -> Result<()> {
        if self.block_size < 32 || !self.block_size.is_power_of_two() {
            return Err(invalid(format!(
                "block_size must be a power of two >= 32, got {}",
                self.block_size
            )));
        }
        if self.notify_capacity == 0 {
            return Err(invalid("notify_capacity must be at least 1".to_string()));
        }
        if self.expected_sample_rate == 0 {
            return Err(invalid("expected_sample_rate must be positive".to_string()));
        }
        Ok(())
    }

    /// Number of spectrum bins a block of this size produces.
    pub fn spectrum_bins(&self) -> usize {
        self.block_size / 2
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        self.aggregator.validate()?;
        self.session.validate()
    }
}

fn invalid(message: String) -> PitchMapError {
    PitchMapError::InvalidConfig(message)
}

/// Reads and validates an engine configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<EngineConfig> {
    let content = std::fs::read_to_string(path)?;
    let config: EngineConfig = toml::from_str(&content)?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        EngineConfig::default().validate().unwrap();
        assert_eq!(SessionConfig::default().spectrum_bins(), 1024);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config: EngineConfig = toml::from_str("[aggregator]\nnoise_floor = 0.05\n").unwrap();
        assert_eq!(config.aggregator.noise_floor, 0.05);
        assert_eq!(config.aggregator.weighting_half_width_cents, 50.0);
        assert_eq!(config.session, SessionConfig::default());
    }

    #[test]
    fn rejects_out_of_range_values() {
        let bad = AggregatorConfig {
            weighting_half_width_cents: 0.0,
            ..AggregatorConfig::default()
        };
        assert!(matches!(bad.validate(), Err(PitchMapError::InvalidConfig(_))));

        let bad = AggregatorConfig {
            min_octave: 5,
            max_octave: 2,
            ..AggregatorConfig::default()
        };
        assert!(bad.validate().is_err());

        let bad = SessionConfig {
            block_size: 1000,
            ..SessionConfig::default()
        };
        assert!(bad.validate().is_err());
    }
}
