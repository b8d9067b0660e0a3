//! # Spectrum Extraction Module
//!
//! Turns blocks of raw samples into amplitude spectra for [`crate::audio::CpalSource`].
//! This is the feature-extraction step that sits in front of the aggregator
//! when audio comes straight from a capture device.
//!
//! ## Features
//! - FFT plan computed once per block size using RustFFT
//! - Hann windowing for reduced spectral leakage
//! - DC offset removal before the transform

use rustfft::{Fft, FftPlanner, num_complex::Complex};
use std::sync::Arc;

/// Computes a symmetric Hann window of length `n`.
fn hann_window(n: usize) -> Vec<f32> {
    if n < 2 {
        return vec![1.0; n];
    }
    let n_minus_1 = (n - 1) as f32;
    (0..n)
        .map(|i| 0.5 * (1.0 - (2.0 * std::f32::consts::PI * i as f32 / n_minus_1).cos()))
        .collect()
}

/// Converts fixed-size sample blocks into `block_size / 2` magnitudes.
pub struct SpectrumExtractor {
    block_size: usize,
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    buffer: Vec<Complex<f32>>,
}

impl SpectrumExtractor {
    pub fn new(block_size: usize) -> Self {
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(block_size);
        Self {
            block_size,
            fft,
            window: hann_window(block_size),
            buffer: vec![Complex { re: 0.0, im: 0.0 }; block_size],
        }
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Computes the amplitude spectrum of one block.
    ///
    /// Processing steps:
    /// 1. DC offset removal
    /// 2. Hann windowing
    /// 3. Forward FFT
    /// 4. Magnitudes of the bins below Nyquist
    ///
    /// Returns `None` if `block` is not exactly `block_size` samples long.
    pub fn magnitudes(&mut self, block: &[f32]) -> Option<Vec<f32>> {
        if block.len() != self.block_size {
            return None;
        }

        // Centre the block so a DC component stays out of bin 0 and its neighbours.
        let mean = block.iter().sum::<f32>() / block.len().max(1) as f32;
        for ((slot, sample), w) in self.buffer.iter_mut().zip(block).zip(&self.window) {
            *slot = Complex { re: (sample - mean) * w, im: 0.0 };
        }
        self.fft.process(&mut self.buffer);

        Some(
            self.buffer
                .iter()
                .take(self.block_size / 2)
                .map(|c| c.norm()) // .norm() is sqrt(re^2 + im^2)
                .collect(),
        )
    }
}
