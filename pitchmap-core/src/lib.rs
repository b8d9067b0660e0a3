// pitchmap-core/src/lib.rs

//! The core logic for the live key/octave visualizer.
//! This crate maps streaming amplitude spectra onto pitch classes and
//! octaves and keeps a continuously updated energy map for a visualization
//! consumer. It is completely headless and contains no rendering code.

pub mod aggregate;
pub mod audio;
pub mod chroma;
pub mod config;
pub mod error;
pub mod fft;
pub mod pitch;
pub mod session;
pub mod source;
pub mod spectrum;

pub use aggregate::{FrameReport, KeyOctave, KeyOctaveAmplitudeMap, SpectralAggregator};
pub use chroma::{ChromaVector, Emphasis};
pub use config::{AggregatorConfig, EngineConfig, SessionConfig, load_config};
pub use error::{PitchMapError, Result};
pub use pitch::{PitchClass, PitchMapping, map_frequency_to_pitch};
pub use session::{AudioSource, Session, SessionState, Snapshot, SnapshotReader, StopReason};
pub use source::{ChannelSource, FrameFeeder};
pub use spectrum::Frame;
