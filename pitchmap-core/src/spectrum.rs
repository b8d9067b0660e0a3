//! # Spectrum Frame Module
//!
//! A [`Frame`] is one block of analysed audio as delivered by the feature
//! extraction collaborator: the amplitude spectrum up to Nyquist, the sample
//! rate it was taken at, and optionally a chroma vector computed upstream.

use crate::chroma::ChromaVector;
use crate::error::{PitchMapError, Result};

/// One amplitude-spectrum frame.
///
/// The sample rate is validated on construction. Individual bins are kept as
/// delivered; non-finite or negative values are skipped during aggregation
/// rather than rejected here, so one bad bin never discards the frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    amplitude_spectrum: Vec<f32>,
    sample_rate: f32,
    chroma: Option<ChromaVector>,
}

impl Frame {
    /// Creates a frame from an amplitude spectrum and its sample rate.
    ///
    /// # Returns
    /// * `Err(PitchMapError::MalformedFrame)` - Sample rate is zero, negative or non-finite
    pub fn new(amplitude_spectrum: Vec<f32>, sample_rate: f32) -> Result<Self> {
        if !sample_rate.is_finite() || sample_rate <= 0.0 {
            return Err(PitchMapError::MalformedFrame(format!(
                "sample rate must be positive and finite, got {sample_rate}"
            )));
        }
        Ok(Self {
            amplitude_spectrum,
            sample_rate,
            chroma: None,
        })
    }

    /// Attaches a chroma vector supplied by the extractor.
    pub fn with_chroma(mut self, chroma: ChromaVector) -> Self {
        self.chroma = Some(chroma);
        self
    }

    pub fn amplitude_spectrum(&self) -> &[f32] {
        &self.amplitude_spectrum
    }

    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    pub fn chroma(&self) -> Option<&ChromaVector> {
        self.chroma.as_ref()
    }

    /// Number of frequency bins in the spectrum.
    pub fn len(&self) -> usize {
        self.amplitude_spectrum.len()
    }

    pub fn is_empty(&self) -> bool {
        self.amplitude_spectrum.is_empty()
    }

    /// Width of one bin in Hz.
    pub fn bin_size(&self) -> f32 {
        if self.amplitude_spectrum.is_empty() {
            return 0.0;
        }
        self.sample_rate / (2.0 * self.amplitude_spectrum.len() as f32)
    }

    /// Centre frequency of bin `index` in Hz.
    pub fn bin_frequency(&self, index: usize) -> f32 {
        bin_frequency(index, self.amplitude_spectrum.len(), self.sample_rate)
    }
}

/// Converts a bin index to Hz for a spectrum of `spectrum_len` bins that spans
/// 0 Hz up to the Nyquist frequency.
///
/// f = i * sample_rate / (2 * spectrum_len)
pub fn bin_frequency(index: usize, spectrum_len: usize, sample_rate: f32) -> f32 {
    if spectrum_len == 0 {
        return 0.0;
    }
    index as f32 * sample_rate / (2.0 * spectrum_len as f32)
}
