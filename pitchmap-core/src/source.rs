//! # Channel Source Module
//!
//! An [`AudioSource`] fed from inside the process. The caller keeps a
//! [`FrameFeeder`] and pushes frames computed elsewhere (a file decoder, a
//! replay, a test). Closing or dropping the feeder disconnects the source.

use crate::error::{PitchMapError, Result};
use crate::session::AudioSource;
use crate::spectrum::Frame;
use crossbeam_channel::{Sender, TrySendError};
use log::debug;
use std::sync::{Arc, Mutex, PoisonError};

type SharedSender = Arc<Mutex<Option<Sender<Frame>>>>;

/// Source half, handed to [`crate::session::Session::start`].
pub struct ChannelSource {
    name: String,
    sender: SharedSender,
}

/// Caller half, used to push frames into a bound session.
pub struct FrameFeeder {
    sender: SharedSender,
}

impl ChannelSource {
    pub fn new(name: impl Into<String>) -> (ChannelSource, FrameFeeder) {
        let sender: SharedSender = Arc::new(Mutex::new(None));
        (
            ChannelSource {
                name: name.into(),
                sender: Arc::clone(&sender),
            },
            FrameFeeder { sender },
        )
    }
}

impl AudioSource for ChannelSource {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn connect(&mut self, _block_size: usize, frames: Sender<Frame>) -> Result<()> {
        let mut slot = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            return Err(PitchMapError::SessionMisuse(format!(
                "{} is already connected",
                self.name
            )));
        }
        *slot = Some(frames);
        Ok(())
    }

    fn disconnect(&mut self) {
        if self
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .is_some()
        {
            debug!("{} disconnected", self.name);
        }
    }
}

impl FrameFeeder {
    fn current(&self) -> Result<Sender<Frame>> {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| PitchMapError::SourceUnavailable("source is not connected".to_string()))
    }

    /// Delivers a frame, waiting while the analysis queue is full.
    pub fn send(&self, frame: Frame) -> Result<()> {
        self.current()?
            .send(frame)
            .map_err(|_| PitchMapError::SourceUnavailable("session stopped".to_string()))
    }

    /// Delivers a frame if there is room. Returns `Ok(false)` when the frame
    /// was dropped because the analysis queue is full.
    pub fn try_send(&self, frame: Frame) -> Result<bool> {
        match self.current()?.try_send(frame) {
            Ok(()) => Ok(true),
            Err(TrySendError::Full(_)) => Ok(false),
            Err(TrySendError::Disconnected(_)) => {
                Err(PitchMapError::SourceUnavailable("session stopped".to_string()))
            }
        }
    }

    /// True while a session is bound to the source.
    pub fn is_connected(&self) -> bool {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Simulates the source going away mid-session.
    pub fn close(self) {
        drop(self);
    }
}

impl Drop for FrameFeeder {
    fn drop(&mut self) {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}
