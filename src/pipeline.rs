//! The pipeline controller: lifecycle state machine and pump loop.
//!
//! One [`Pipeline`] instance owns at most one capture stream and one
//! fan-out sink set at a time. A dedicated pump thread runs the frame
//! loop (read, denoise, fan out) and is allowed to block on hardware
//! I/O; control calls run on whatever thread the host uses. The only
//! state both sides touch at audio rate is the suppression toggle, which
//! is a single atomic inside the [`DenoiseAdapter`]. Everything else is
//! serialized by one controller mutex, so a transition never interleaves
//! with a half-processed frame.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::JoinHandle;

use parking_lot::Mutex;

use crate::backend::AudioBackend;
use crate::event::{EventCallback, PipelineEvent};
use crate::sink::{OutputSpec, SinkSet};
use crate::source::FrameSource;
use crate::{DenoiseAdapter, DeviceInfo, DeviceSelector, PipelineError, StreamFault};

/// Observable lifecycle state of a [`Pipeline`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    /// No streams are open.
    Stopped,
    /// `start()` is acquiring devices.
    Starting,
    /// The pump loop is moving frames.
    Running,
    /// `stop()` is waiting for the pump to reach a frame boundary.
    Stopping,
    /// A fatal fault stopped the pump; streams are closed. `stop()`
    /// acknowledges and returns to `Stopped`.
    Error,
}

impl PipelineState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Starting,
            2 => Self::Running,
            3 => Self::Stopping,
            4 => Self::Error,
            _ => Self::Stopped,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Self::Stopped => 0,
            Self::Starting => 1,
            Self::Running => 2,
            Self::Stopping => 3,
            Self::Error => 4,
        }
    }
}

/// Counters describing a pipeline's activity since construction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    /// Frames read, transformed, and fanned out.
    pub frames_pumped: u64,
    /// Capture-side buffer overruns (frame still delivered).
    pub capture_overruns: u64,
    /// Playback underruns/overruns swallowed across all destinations.
    pub sink_transient_faults: u64,
}

struct SharedStats {
    frames_pumped: AtomicU64,
    capture_overruns: AtomicU64,
    sink_transient_faults: AtomicU64,
}

struct Worker {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

struct Control {
    worker: Option<Worker>,
    terminated: bool,
}

/// The real-time voice pipeline.
///
/// Data flow while running: capture one frame, pass it through the
/// [`DenoiseAdapter`] (identity when disabled), copy it into every
/// destination's private buffer and write, repeat. The stop signal is
/// checked only between iterations, so shutdown completes within one
/// frame period of `stop()` plus at most one blocking hardware call.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use clearvox::backend::CpalBackend;
/// use clearvox::sink::OutputSpec;
/// use clearvox::{DenoiseAdapter, DeviceSelector, Pipeline, RnnoiseSuppressor};
///
/// let adapter = DenoiseAdapter::new(Box::new(RnnoiseSuppressor::new()));
/// let pipeline = Pipeline::new(Arc::new(CpalBackend::new()), adapter);
///
/// pipeline.start(
///     DeviceSelector::Default,
///     &[OutputSpec::new(DeviceSelector::Name("blackhole".into())).high_latency()],
/// )?;
/// // ... later ...
/// pipeline.stop();
/// pipeline.terminate();
/// # Ok::<(), clearvox::PipelineError>(())
/// ```
pub struct Pipeline {
    backend: Arc<dyn AudioBackend>,
    denoise: DenoiseAdapter,
    events: Option<EventCallback>,
    control: Mutex<Control>,
    state: Arc<AtomicU8>,
    stats: Arc<SharedStats>,
}

impl Pipeline {
    /// Creates a stopped pipeline over the given backend and adapter.
    pub fn new(backend: Arc<dyn AudioBackend>, denoise: DenoiseAdapter) -> Self {
        Self {
            backend,
            denoise,
            events: None,
            control: Mutex::new(Control {
                worker: None,
                terminated: false,
            }),
            state: Arc::new(AtomicU8::new(PipelineState::Stopped.as_u8())),
            stats: Arc::new(SharedStats {
                frames_pumped: AtomicU64::new(0),
                capture_overruns: AtomicU64::new(0),
                sink_transient_faults: AtomicU64::new(0),
            }),
        }
    }

    /// Registers the status-notification callback.
    #[must_use]
    pub fn with_event_callback(mut self, callback: EventCallback) -> Self {
        self.events = Some(callback);
        self
    }

    /// Current lifecycle state.
    pub fn state(&self) -> PipelineState {
        PipelineState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Returns `true` while the pump loop is moving frames.
    pub fn is_running(&self) -> bool {
        self.state() == PipelineState::Running
    }

    /// Current activity counters.
    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            frames_pumped: self.stats.frames_pumped.load(Ordering::Relaxed),
            capture_overruns: self.stats.capture_overruns.load(Ordering::Relaxed),
            sink_transient_faults: self.stats.sink_transient_faults.load(Ordering::Relaxed),
        }
    }

    /// Flips noise suppression and returns the new value. Legal in any
    /// state; never blocks on the audio thread.
    pub fn toggle(&self) -> bool {
        self.denoise.toggle()
    }

    /// Lock-free read of the suppression flag.
    pub fn is_enabled(&self) -> bool {
        self.denoise.is_enabled()
    }

    /// Sets the suppression flag.
    pub fn set_enabled(&self, enabled: bool) {
        self.denoise.set_enabled(enabled);
    }

    /// Starts streaming: one capture device, fanned out to the given
    /// playback destinations (the platform default output if none are
    /// given).
    ///
    /// Resolution uses a single fresh catalog snapshot. On any failure
    /// every partially acquired resource is released and the pipeline
    /// remains stopped.
    ///
    /// # Errors
    ///
    /// [`PipelineError::AlreadyRunning`] unless stopped,
    /// [`PipelineError::Faulted`] from the unacknowledged error state,
    /// [`PipelineError::Terminated`] after `terminate()`, and device
    /// resolution/open errors.
    pub fn start(
        &self,
        input: DeviceSelector,
        outputs: &[OutputSpec],
    ) -> Result<(), PipelineError> {
        let mut control = self.control.lock();
        if control.terminated {
            return Err(PipelineError::Terminated);
        }
        match self.state() {
            PipelineState::Stopped => {}
            PipelineState::Error => return Err(PipelineError::Faulted),
            _ => return Err(PipelineError::AlreadyRunning),
        }

        self.set_state(PipelineState::Starting);
        // The pump thread publishes Running itself, before it starts
        // looping. Storing it here instead would race a fault on the
        // very first frame: the pump's Error store could land first and
        // be overwritten, leaving a dead pump behind a Running state.
        match self.start_locked(&mut control, input, outputs) {
            Ok(()) => Ok(()),
            Err(e) => {
                self.set_state(PipelineState::Stopped);
                Err(e)
            }
        }
    }

    fn start_locked(
        &self,
        control: &mut Control,
        input: DeviceSelector,
        outputs: &[OutputSpec],
    ) -> Result<(), PipelineError> {
        // One snapshot per start; every selector resolves against it.
        let catalog = self.backend.catalog()?;
        let source_device = catalog.resolve_input(&input)?.clone();

        let mut sink_devices: Vec<(DeviceInfo, bool)> = Vec::new();
        if outputs.is_empty() {
            let device = catalog.resolve_output(&DeviceSelector::Default)?.clone();
            sink_devices.push((device, false));
        } else {
            for spec in outputs {
                let device = catalog.resolve_output(&spec.selector)?.clone();
                sink_devices.push((device, spec.high_latency));
            }
        }

        // The pump thread opens the streams itself: CPAL streams are not
        // Send, so they must live on the thread that uses them. It
        // reports the outcome of acquisition before start() returns.
        let stop = Arc::new(AtomicBool::new(false));
        let (ready_tx, ready_rx) = mpsc::channel::<Result<(), PipelineError>>();

        let pump = Pump {
            backend: self.backend.clone(),
            denoise: self.denoise.clone(),
            events: self.events.clone(),
            state: self.state.clone(),
            stats: self.stats.clone(),
            stop: stop.clone(),
        };
        let handle = std::thread::Builder::new()
            .name("clearvox-pump".to_string())
            .spawn(move || pump.run(&source_device, sink_devices, &ready_tx))
            .map_err(|e| PipelineError::Backend(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                control.worker = Some(Worker { stop, handle });
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => {
                let _ = handle.join();
                Err(PipelineError::Backend(
                    "pump thread died during startup".to_string(),
                ))
            }
        }
    }

    /// Stops streaming at the next frame boundary and closes all
    /// streams. From the error state this acknowledges the fault.
    /// Idempotent no-op when already stopped. Never touches the
    /// suppressor's adaptive profile.
    pub fn stop(&self) {
        let mut control = self.control.lock();
        self.stop_locked(&mut control);
    }

    fn stop_locked(&self, control: &mut Control) {
        let Some(worker) = control.worker.take() else {
            return;
        };
        if self.state() == PipelineState::Running {
            self.set_state(PipelineState::Stopping);
        }
        worker.stop.store(true, Ordering::Release);
        let _ = worker.handle.join();
        self.set_state(PipelineState::Stopped);
        tracing::info!("pipeline stopped");
        self.emit(PipelineEvent::Stopped);
    }

    /// Stops if needed, then finalizes the denoise adapter and releases
    /// everything. Terminal: no further `start` is valid on this
    /// instance.
    pub fn terminate(&self) {
        let mut control = self.control.lock();
        self.stop_locked(&mut control);
        if !control.terminated {
            control.terminated = true;
            self.denoise.finalize();
            tracing::info!("pipeline terminated");
        }
    }

    fn set_state(&self, state: PipelineState) {
        self.state.store(state.as_u8(), Ordering::Release);
    }

    fn emit(&self, event: PipelineEvent) {
        if let Some(ref events) = self.events {
            events(event);
        }
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.terminate();
    }
}

/// Everything the pump thread owns or shares.
struct Pump {
    backend: Arc<dyn AudioBackend>,
    denoise: DenoiseAdapter,
    events: Option<EventCallback>,
    state: Arc<AtomicU8>,
    stats: Arc<SharedStats>,
    stop: Arc<AtomicBool>,
}

impl Pump {
    fn run(
        self,
        source_device: &DeviceInfo,
        sink_devices: Vec<(DeviceInfo, bool)>,
        ready_tx: &mpsc::Sender<Result<(), PipelineError>>,
    ) {
        let mut source = match self.backend.open_source(source_device) {
            Ok(source) => source,
            Err(e) => {
                let _ = ready_tx.send(Err(e));
                return;
            }
        };
        let mut sinks =
            match SinkSet::open(&*self.backend, &sink_devices, self.events.clone()) {
                Ok(sinks) => sinks,
                Err(e) => {
                    source.close();
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };
        // Running is published before the ready ack so that by the time
        // start() returns, the state is already Running, and any later
        // Error store from a faulting first frame is never overwritten.
        self.state
            .store(PipelineState::Running.as_u8(), Ordering::Release);
        tracing::info!("pipeline running");
        if let Some(ref events) = self.events {
            events(PipelineEvent::Running);
        }
        let _ = ready_tx.send(Ok(()));

        let fault = self.pump_loop(source.as_mut(), &mut sinks);

        // Orderly teardown on every exit path; the adapter stays warm.
        source.close();
        sinks.remove_all();

        if let Some(reason) = fault {
            self.state
                .store(PipelineState::Error.as_u8(), Ordering::Release);
            tracing::error!(%reason, "pipeline faulted");
            if let Some(ref events) = self.events {
                events(PipelineEvent::Error { reason });
            }
        }
    }

    /// The frame loop. Returns `None` on cooperative stop, or the fault
    /// reason that ended the run.
    fn pump_loop(&self, source: &mut dyn FrameSource, sinks: &mut SinkSet) -> Option<String> {
        let mut seen_transients = 0;
        loop {
            if self.stop.load(Ordering::Acquire) {
                return None;
            }

            let captured = match source.read_frame() {
                Ok(captured) => captured,
                Err(StreamFault::Transient) => continue,
                Err(StreamFault::Fatal { reason }) => return Some(reason),
            };
            if captured.overran() {
                self.stats.capture_overruns.fetch_add(1, Ordering::Relaxed);
                tracing::warn!("capture buffer overran; frame may contain a gap");
            }

            let mut frame = captured.into_frame();
            if let Err(e) = self.denoise.apply(&mut frame) {
                return Some(e.to_string());
            }
            sinks.write_frame(&frame);

            self.stats.frames_pumped.fetch_add(1, Ordering::Relaxed);
            // Fold this run's transient count into the lifetime total.
            let transients = sinks.stats().transient_faults;
            self.stats
                .sink_transient_faults
                .fetch_add(transients - seen_transients, Ordering::Relaxed);
            seen_transients = transients;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_round_trip() {
        for state in [
            PipelineState::Stopped,
            PipelineState::Starting,
            PipelineState::Running,
            PipelineState::Stopping,
            PipelineState::Error,
        ] {
            assert_eq!(PipelineState::from_u8(state.as_u8()), state);
        }
    }

    #[test]
    fn test_unknown_state_decodes_to_stopped() {
        assert_eq!(PipelineState::from_u8(200), PipelineState::Stopped);
    }
}
