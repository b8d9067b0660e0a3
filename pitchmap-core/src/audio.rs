//! # Audio Capture Module
//!
//! This module binds a session to live input using CPAL (Cross-Platform Audio Library).
//! Samples arriving from the device are collected into fixed-size blocks, each
//! block is turned into an amplitude spectrum and delivered as a [`Frame`].
//!
//! ## Features
//! - Automatic audio device selection
//! - Closest supported sample rate to the configured target
//! - Block accumulation across callback boundaries
//! - Loss of the device reported to the session as a disconnected source;
//!   other stream errors are logged and capture continues

use crate::error::{PitchMapError, Result};
use crate::fft::SpectrumExtractor;
use crate::session::AudioSource;
use crate::spectrum::Frame;
use anyhow::anyhow;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::SupportedStreamConfigRange;
use crossbeam_channel::Sender;
use log::{debug, error, info, warn};
use std::sync::{Arc, Mutex, PoisonError};

type SharedSender = Arc<Mutex<Option<Sender<Frame>>>>;

/// Live microphone input from the host's default input device.
pub struct CpalSource {
    device: cpal::Device,
    target_sample_rate: u32,
    stream: Option<cpal::Stream>,
    sender: SharedSender,
}

impl CpalSource {
    /// Selects the default input device.
    ///
    /// # Arguments
    /// * `target_sample_rate` - Preferred capture rate in Hz (e.g. 44100)
    pub fn default_input(target_sample_rate: u32) -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| PitchMapError::SourceUnavailable("no input device available".to_string()))?;
        Ok(Self {
            device,
            target_sample_rate,
            stream: None,
            sender: Arc::new(Mutex::new(None)),
        })
    }

    /// Builds and starts the input stream.
    ///
    /// # Audio Configuration
    /// - Format: 32-bit float
    /// - Channels: Mono (1 channel)
    /// - Sample Rate: the supported rate nearest to the target
    /// - Block Size: `block_size` samples per frame (~46ms at 2048 / 44.1kHz)
    fn build_stream(&self, block_size: usize) -> anyhow::Result<cpal::Stream> {
        let configs = self.device.supported_input_configs()?.collect::<Vec<_>>();
        let supported_config = find_supported_config(configs, self.target_sample_rate)
            .ok_or_else(|| anyhow!("No suitable f32 mono input format found"))?;

        let rate = self
            .target_sample_rate
            .clamp(supported_config.min_sample_rate().0, supported_config.max_sample_rate().0);
        let config = supported_config.with_sample_rate(cpal::SampleRate(rate));
        let sample_rate = config.sample_rate().0 as f32;
        let config: cpal::StreamConfig = config.into();

        info!("Selected sample rate: {} Hz", sample_rate);

        let data_sender = Arc::clone(&self.sender);
        let error_sender = Arc::clone(&self.sender);
        let mut extractor = SpectrumExtractor::new(block_size);

        // This buffer will accumulate audio data from the callback.
        let mut audio_buffer: Vec<f32> = Vec::with_capacity(block_size * 2);

        let stream = self.device.build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                // Append new data to our buffer.
                audio_buffer.extend_from_slice(data);

                // While we have enough data for a full block, process it.
                while audio_buffer.len() >= block_size {
                    let spectrum = extractor.magnitudes(&audio_buffer[..block_size]);
                    audio_buffer.drain(..block_size);

                    let Some(spectrum) = spectrum else { continue };
                    let Ok(frame) = Frame::new(spectrum, sample_rate) else { continue };

                    let guard = data_sender.lock().unwrap_or_else(PoisonError::into_inner);
                    if let Some(sender) = guard.as_ref() {
                        // Drop the frame if analysis is behind.
                        if sender.try_send(frame).is_err() {
                            debug!("Analysis queue full; dropping block");
                        }
                    }
                }
            },
            move |err| handle_stream_error(err, &error_sender),
            None,
        )?;

        stream.play()?;
        Ok(stream)
    }
}

impl AudioSource for CpalSource {
    fn name(&self) -> String {
        self.device
            .name()
            .unwrap_or_else(|_| "unknown input device".to_string())
    }

    fn connect(&mut self, block_size: usize, frames: Sender<Frame>) -> Result<()> {
        if self.stream.is_some() {
            return Err(PitchMapError::SessionMisuse(format!(
                "{} is already capturing",
                self.name()
            )));
        }
        info!("Using audio input device: {}", self.name());

        *self.sender.lock().unwrap_or_else(PoisonError::into_inner) = Some(frames);
        match self.build_stream(block_size) {
            Ok(stream) => {
                self.stream = Some(stream);
                Ok(())
            }
            Err(e) => {
                self.sender.lock().unwrap_or_else(PoisonError::into_inner).take();
                Err(PitchMapError::SourceUnavailable(e.to_string()))
            }
        }
    }

    fn disconnect(&mut self) {
        if let Some(stream) = self.stream.take() {
            // Properly stop the stream before dropping it
            if let Err(e) = stream.pause() {
                warn!("Error pausing stream: {}", e);
            }
            drop(stream);
            debug!("Input stream released");
        }
        self.sender.lock().unwrap_or_else(PoisonError::into_inner).take();
    }
}

/// Drops the frame sender when the device is gone, so the session sees the
/// source as disconnected. Other stream errors are only logged.
fn handle_stream_error(err: cpal::StreamError, sender: &SharedSender) {
    match err {
        cpal::StreamError::DeviceNotAvailable => {
            error!("Audio input device is no longer available");
            sender.lock().unwrap_or_else(PoisonError::into_inner).take();
        }
        other => warn!("An error occurred on the audio stream: {}", other),
    }
}

/// Finds the best supported audio configuration for the target sample rate.
///
/// Only mono 32-bit float configurations are considered; among those the one
/// whose rate range lies closest to `target_rate` wins.
fn find_supported_config(
    configs: Vec<SupportedStreamConfigRange>,
    target_rate: u32,
) -> Option<SupportedStreamConfigRange> {
    configs
        .into_iter()
        .filter(|c| c.channels() == 1 && c.sample_format() == cpal::SampleFormat::F32)
        .min_by_key(|c| {
            let (min, max) = (c.min_sample_rate().0, c.max_sample_rate().0);
            if (min..=max).contains(&target_rate) {
                0
            } else {
                (min as i64 - target_rate as i64).abs().min((max as i64 - target_rate as i64).abs())
            }
        })
}
