//! # Streaming Session Module
//!
//! Owns the lifecycle of continuous analysis for one audio source.
//!
//! ## Architecture
//! - **Caller thread**: owns the [`Session`], and through it the bound source
//! - **Analysis thread**: one per binding, aggregates frames one at a time
//! - **Communication**: crossbeam channels for frames, shutdown and update
//!   notifications
//! - **Publication**: each result replaces the previous [`Snapshot`] as a whole
//!   behind an `Arc`, so readers never observe a half-built map
//!
//! A session moves `Idle -> Active -> Stopped`. It holds at most one source and
//! one analysis thread, and because the source is moved into the session it
//! cannot be bound anywhere else at the same time.

use crate::aggregate::{FrameReport, KeyOctaveAmplitudeMap, SpectralAggregator};
use crate::chroma::ChromaVector;
use crate::config::{AggregatorConfig, EngineConfig, SessionConfig};
use crate::error::{PitchMapError, Result};
use crate::spectrum::Frame;
use crossbeam_channel::{Receiver, Sender, TrySendError};
use log::{debug, info, warn};
use serde::Serialize;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, PoisonError, RwLock};
use std::thread::{self, JoinHandle};

/// Frames buffered between a source and the analysis thread.
const FRAME_QUEUE_DEPTH: usize = 8;

/// A supplier of amplitude-spectrum frames.
///
/// Implementations deliver frames into the sender handed to [`connect`]
/// until [`disconnect`] is called. Dropping every copy of that sender tells
/// the session the source has gone away.
///
/// [`connect`]: AudioSource::connect
/// [`disconnect`]: AudioSource::disconnect
pub trait AudioSource {
    /// Name used in log messages.
    fn name(&self) -> String;

    /// Starts delivering frames for blocks of `block_size` samples.
    fn connect(&mut self, block_size: usize, frames: Sender<Frame>) -> Result<()>;

    /// Stops delivery and releases any device handle. Must be safe to call
    /// more than once.
    fn disconnect(&mut self);
}

/// Lifecycle state of a [`Session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Active,
    Stopped,
}

/// Why the most recent binding ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StopReason {
    /// `stop`, `rebind` or drop.
    Requested,
    /// The source disconnected on its own.
    SourceUnavailable,
}

/// The published result of one analysed frame.
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    /// Frame number within the current binding, starting at 0.
    pub sequence: u64,
    pub sample_rate: f32,
    pub map: KeyOctaveAmplitudeMap,
    pub chroma: Option<ChromaVector>,
    pub report: FrameReport,
}

struct SlotState {
    owner: Option<u64>,
    latest: Option<Arc<Snapshot>>,
    subscribers: Vec<Sender<Arc<Snapshot>>>,
    stop_reason: Option<StopReason>,
}

/// The single destination every analysis thread of a session writes into.
///
/// Only the binding that currently owns the slot may publish. Releasing
/// ownership turns any later publish from that binding into a no-op.
struct SnapshotSlot {
    state: RwLock<SlotState>,
}

impl SnapshotSlot {
    fn new() -> Self {
        Self {
            state: RwLock::new(SlotState {
                owner: None,
                latest: None,
                subscribers: Vec::new(),
                stop_reason: None,
            }),
        }
    }

    fn claim(&self, binding: u64) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.owner = Some(binding);
        state.stop_reason = None;
    }

    /// Returns false if `binding` no longer owned the slot.
    fn release(&self, binding: u64, reason: StopReason) -> bool {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if state.owner != Some(binding) {
            return false;
        }
        state.owner = None;
        state.stop_reason = Some(reason);
        true
    }

    /// Swaps in `snapshot` and notifies subscribers. Returns false, dropping
    /// the snapshot, if `binding` no longer owns the slot.
    fn publish(&self, binding: u64, snapshot: Snapshot) -> bool {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if state.owner != Some(binding) {
            return false;
        }
        let snapshot = Arc::new(snapshot);
        state.latest = Some(Arc::clone(&snapshot));
        state.subscribers.retain(|tx| match tx.try_send(Arc::clone(&snapshot)) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                debug!("Subscriber is behind; dropping update {}", snapshot.sequence);
                true
            }
            Err(TrySendError::Disconnected(_)) => false,
        });
        true
    }

    fn subscribe(&self, tx: Sender<Arc<Snapshot>>) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.subscribers.push(tx);
    }

    fn latest(&self) -> Option<Arc<Snapshot>> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.latest.clone()
    }

    fn owner(&self) -> Option<u64> {
        self.state.read().unwrap_or_else(PoisonError::into_inner).owner
    }

    fn stop_reason(&self) -> Option<StopReason> {
        self.state.read().unwrap_or_else(PoisonError::into_inner).stop_reason
    }
}

/// Latest-value view of a session's published snapshots.
///
/// Cheap to clone and safe to read from any thread.
#[derive(Clone)]
pub struct SnapshotReader {
    slot: Arc<SnapshotSlot>,
}

impl SnapshotReader {
    /// Most recently published snapshot, if any frame has been analysed.
    pub fn latest(&self) -> Option<Arc<Snapshot>> {
        self.slot.latest()
    }

    /// True while some binding is allowed to publish.
    pub fn is_live(&self) -> bool {
        self.slot.owner().is_some()
    }
}

/// Analysis thread management structure.
struct AnalysisWorker {
    shutdown_tx: Sender<()>,
    thread_handle: Option<JoinHandle<()>>,
}

impl AnalysisWorker {
    /// Spawns the analysis thread for one binding.
    fn spawn(
        binding: u64,
        aggregator: SpectralAggregator,
        derive_chroma: bool,
        frames: Receiver<Frame>,
        slot: Arc<SnapshotSlot>,
    ) -> Result<Self> {
        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded::<()>(1);
        let thread_handle = thread::Builder::new()
            .name(format!("pitchmap-analysis-{binding}"))
            .spawn(move || {
                debug!("Analysis thread {binding} started");
                let mut sequence = 0u64;
                loop {
                    crossbeam_channel::select! {
                        recv(frames) -> msg => match msg {
                            Ok(frame) => {
                                let result = panic::catch_unwind(AssertUnwindSafe(|| {
                                    analyze(&aggregator, derive_chroma, &frame, sequence)
                                }));
                                match result {
                                    Ok(snapshot) => {
                                        if !slot.publish(binding, snapshot) {
                                            debug!("Binding {binding} released; dropping frame {sequence}");
                                        }
                                    }
                                    Err(_) => warn!("Analysis of frame {sequence} panicked; frame skipped"),
                                }
                                sequence += 1;
                            }
                            Err(_) => {
                                if slot.release(binding, StopReason::SourceUnavailable) {
                                    warn!("Audio source disconnected; session {binding} stopped");
                                }
                                break;
                            }
                        },
                        recv(shutdown_rx) -> _ => {
                            debug!("Analysis thread {binding} received shutdown signal");
                            break;
                        },
                    }
                }
                debug!("Analysis thread {binding} finished after {sequence} frames");
            })
            .map_err(|e| PitchMapError::SourceUnavailable(format!("failed to spawn analysis thread: {e}")))?;

        Ok(Self {
            shutdown_tx,
            thread_handle: Some(thread_handle),
        })
    }

    /// Signals the thread to exit. A frame already being analysed finishes first.
    fn signal(&self) {
        let _ = self.shutdown_tx.try_send(());
    }

    fn join(&mut self) {
        if let Some(handle) = self.thread_handle.take() {
            if handle.join().is_err() {
                warn!("Analysis thread exited with a panic");
            }
        }
    }
}

/// Aggregates one frame and assembles the snapshot published for it.
fn analyze(
    aggregator: &SpectralAggregator,
    derive_chroma: bool,
    frame: &Frame,
    sequence: u64,
) -> Snapshot {
    let (map, report) = aggregator.aggregate_with_report(frame);
    let chroma = match frame.chroma() {
        Some(supplied) => Some(*supplied),
        None if derive_chroma => Some(ChromaVector::from_map(&map)),
        None => None,
    };
    Snapshot {
        sequence,
        sample_rate: frame.sample_rate(),
        map,
        chroma,
        report,
    }
}

struct Binding {
    id: u64,
    source: Box<dyn AudioSource>,
    worker: AnalysisWorker,
}

/// A continuously running analysis bound to one audio source.
///
/// The session exclusively owns its source and analysis thread. Starting an
/// active session is rejected; [`stop`](Session::stop) and
/// [`rebind`](Session::rebind) always finish tearing the old binding down
/// before anything new is started.
pub struct Session {
    aggregator_config: AggregatorConfig,
    config: SessionConfig,
    slot: Arc<SnapshotSlot>,
    binding: Option<Binding>,
    next_binding: u64,
    started_once: bool,
}

impl Default for Session {
    fn default() -> Self {
        Self::with_aggregator(AggregatorConfig::default())
    }
}

impl Session {
    /// Creates an idle session that will aggregate with `aggregator_config`.
    pub fn new(aggregator_config: AggregatorConfig) -> Result<Self> {
        aggregator_config.validate()?;
        Ok(Self::with_aggregator(aggregator_config))
    }

    /// Creates an idle session from a full engine configuration.
    ///
    /// Subscriptions taken before the first `start` use
    /// `config.session.notify_capacity`.
    pub fn from_config(config: &EngineConfig) -> Result<Self> {
        config.validate()?;
        let mut session = Self::with_aggregator(config.aggregator.clone());
        session.config = config.session.clone();
        Ok(session)
    }

    fn with_aggregator(aggregator_config: AggregatorConfig) -> Self {
        Self {
            aggregator_config,
            config: SessionConfig::default(),
            slot: Arc::new(SnapshotSlot::new()),
            binding: None,
            next_binding: 0,
            started_once: false,
        }
    }

    pub fn state(&self) -> SessionState {
        match &self.binding {
            Some(binding) if self.slot.owner() == Some(binding.id) => SessionState::Active,
            Some(_) => SessionState::Stopped,
            None if self.started_once => SessionState::Stopped,
            None => SessionState::Idle,
        }
    }

    /// Why the last binding ended, or `None` if it is still running or the
    /// session never started.
    pub fn stop_reason(&self) -> Option<StopReason> {
        self.slot.stop_reason()
    }

    /// Session settings used by the current or most recent binding.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// A latest-value reader for published snapshots.
    pub fn reader(&self) -> SnapshotReader {
        SnapshotReader {
            slot: Arc::clone(&self.slot),
        }
    }

    /// Most recently published snapshot.
    pub fn latest(&self) -> Option<Arc<Snapshot>> {
        self.slot.latest()
    }

    /// Registers for "on update" notifications.
    ///
    /// Each published snapshot is offered to the returned receiver. When it
    /// already holds `notify_capacity` unread updates the new one is dropped
    /// for that subscriber; [`latest`](Session::latest) still returns it.
    /// The capacity is taken from the session settings at the time of the
    /// call: those given to [`from_config`](Session::from_config) before the
    /// first start, and those of the latest `start` afterwards.
    /// Subscriptions survive `stop` and `rebind`.
    pub fn subscribe(&self) -> Receiver<Arc<Snapshot>> {
        let (tx, rx) = crossbeam_channel::bounded(self.config.notify_capacity.max(1));
        self.slot.subscribe(tx);
        rx
    }

    /// Binds the session to `source` and starts analysing its frames.
    ///
    /// # Returns
    /// * `Err(PitchMapError::SessionMisuse)` - The session is already active
    /// * `Err(PitchMapError::InvalidConfig)` - `config` failed validation
    /// * `Err(PitchMapError::SourceUnavailable)` - The source refused to connect
    pub fn start<S: AudioSource + 'static>(&mut self, source: S, config: SessionConfig) -> Result<()> {
        if self.state() == SessionState::Active {
            return Err(PitchMapError::SessionMisuse(format!(
                "start({}) called on an active session; stop or rebind first",
                source.name()
            )));
        }
        config.validate()?;

        // A binding whose source disconnected by itself still holds its handles.
        self.teardown();

        let aggregator = SpectralAggregator::new(self.aggregator_config.clone())?
            .with_expected_bins(config.spectrum_bins());
        let id = self.next_binding;
        self.next_binding += 1;

        let (frame_tx, frame_rx) = crossbeam_channel::bounded::<Frame>(FRAME_QUEUE_DEPTH);
        self.slot.claim(id);
        let mut worker = match AnalysisWorker::spawn(
            id,
            aggregator,
            config.derive_chroma,
            frame_rx,
            Arc::clone(&self.slot),
        ) {
            Ok(worker) => worker,
            Err(e) => {
                self.slot.release(id, StopReason::Requested);
                return Err(e);
            }
        };

        let mut source: Box<dyn AudioSource> = Box::new(source);
        if let Err(e) = source.connect(config.block_size, frame_tx) {
            warn!("Failed to connect {}: {}", source.name(), e);
            self.slot.release(id, StopReason::SourceUnavailable);
            worker.signal();
            worker.join();
            source.disconnect();
            return Err(e);
        }

        info!(
            "Session bound to {} (block size {}, binding {})",
            source.name(),
            config.block_size,
            id
        );
        self.config = config;
        self.started_once = true;
        self.binding = Some(Binding { id, source, worker });
        Ok(())
    }

    /// Releases the analysis thread and disconnects the source.
    ///
    /// Idempotent: calling it on an idle or stopped session does nothing.
    pub fn stop(&mut self) {
        if let Some(name) = self.teardown() {
            info!("Session stopped ({name})");
        }
    }

    /// Stops the current binding completely, then starts on `source` with the
    /// same session settings.
    pub fn rebind<S: AudioSource + 'static>(&mut self, source: S) -> Result<()> {
        self.stop();
        let config = self.config.clone();
        self.start(source, config)
    }

    /// Tears the current binding down, returning the source name if there was one.
    fn teardown(&mut self) -> Option<String> {
        let mut binding = self.binding.take()?;
        // Release first so a frame still in flight is dropped, not published.
        self.slot.release(binding.id, StopReason::Requested);
        binding.worker.signal();
        binding.source.disconnect();
        binding.worker.join();
        Some(binding.source.name())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_snapshot(sequence: u64) -> Snapshot {
        Snapshot {
            sequence,
            sample_rate: 44100.0,
            map: KeyOctaveAmplitudeMap::new(),
            chroma: None,
            report: FrameReport::default(),
        }
    }

    #[test]
    fn only_the_owner_may_publish() {
        let slot = SnapshotSlot::new();
        slot.claim(1);
        assert!(!slot.publish(0, empty_snapshot(0)));
        assert!(slot.publish(1, empty_snapshot(7)));
        assert_eq!(slot.latest().map(|s| s.sequence), Some(7));
    }

    #[test]
    fn publish_after_release_is_dropped() {
        let slot = SnapshotSlot::new();
        slot.claim(3);
        assert!(slot.release(3, StopReason::Requested));
        assert!(!slot.publish(3, empty_snapshot(1)));
        assert!(slot.latest().is_none());
        assert!(!slot.release(3, StopReason::SourceUnavailable));
        assert_eq!(slot.stop_reason(), Some(StopReason::Requested));
    }

    #[test]
    fn full_subscribers_are_kept_and_closed_ones_pruned() {
        let slot = SnapshotSlot::new();
        let (full_tx, full_rx) = crossbeam_channel::bounded(1);
        let (closed_tx, closed_rx) = crossbeam_channel::bounded(1);
        slot.subscribe(full_tx);
        slot.subscribe(closed_tx);
        drop(closed_rx);
        slot.claim(0);
        assert!(slot.publish(0, empty_snapshot(0)));
        assert!(slot.publish(0, empty_snapshot(1)));
        assert_eq!(slot.state.read().unwrap().subscribers.len(), 1);
        assert_eq!(full_rx.try_recv().unwrap().sequence, 0);
        assert!(full_rx.try_recv().is_err());
        assert_eq!(slot.latest().unwrap().sequence, 1);
    }

    #[test]
    fn supplied_chroma_wins_over_derived() {
        let mut values = [0.0; 12];
        values[4] = 1.0;
        let supplied = ChromaVector::from_values(values);
        let frame = Frame::new(vec![0.0; 16], 44100.0).unwrap().with_chroma(supplied);
        let snapshot = analyze(&SpectralAggregator::default(), true, &frame, 0);
        assert_eq!(snapshot.chroma, Some(supplied));

        let bare = Frame::new(vec![0.0; 16], 44100.0).unwrap();
        assert!(analyze(&SpectralAggregator::default(), false, &bare, 0).chroma.is_none());
        assert_eq!(
            analyze(&SpectralAggregator::default(), true, &bare, 0).chroma,
            Some(ChromaVector::default())
        );
    }
}
