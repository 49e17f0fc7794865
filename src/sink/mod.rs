//! Fan-out sink set: the playback side of the pipeline.
//!
//! A [`SinkSet`] owns zero or more playback destinations. Each destination
//! is a [`SinkBinding`] with its own private frame buffer and independent
//! failure handling: destinations run on independent hardware timing, so
//! one failing or stalling sink must never block the others or the caller.

mod device;
mod mock;

pub use device::DeviceSink;
pub use mock::MemorySink;

use crate::backend::AudioBackend;
use crate::event::{EventCallback, PipelineEvent};
use crate::{DeviceInfo, Frame, PipelineError, StreamFault, FRAME_SIZE};

/// A playback destination's underlying stream.
///
/// `write` submits exactly one frame of samples. [`StreamFault::Transient`]
/// means the destination could not take the frame right now (underrun or
/// overrun); any other fault means the destination is gone.
pub trait OutputStream {
    /// Human-readable name for logging and events.
    fn name(&self) -> &str;

    /// Submits one frame of samples to the destination.
    ///
    /// # Errors
    ///
    /// [`StreamFault::Transient`] on underrun/overrun (the frame is
    /// dropped for this destination only), [`StreamFault::Fatal`] when the
    /// destination is unusable.
    fn write(&mut self, samples: &[i16]) -> Result<(), StreamFault>;

    /// Stops and releases the stream. Idempotent.
    fn close(&mut self);
}

/// How one playback destination is selected and configured.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputSpec {
    /// Which device to open.
    pub selector: crate::DeviceSelector,
    /// Open with the device's high-latency profile. Flag this for
    /// virtual/loopback destinations, which chronically underrun at low
    /// latency.
    pub high_latency: bool,
}

impl OutputSpec {
    /// Selects a destination with the low-latency profile.
    pub fn new(selector: crate::DeviceSelector) -> Self {
        Self {
            selector,
            high_latency: false,
        }
    }

    /// Switches this destination to the high-latency profile.
    #[must_use]
    pub fn high_latency(mut self) -> Self {
        self.high_latency = true;
        self
    }
}

/// One playback destination: its stream, its private frame buffer, and
/// its health. Owned exclusively by the [`SinkSet`], never aliased.
pub struct SinkBinding {
    name: String,
    buffer: Vec<i16>,
    stream: Box<dyn OutputStream>,
    degraded: bool,
    transient_faults: u64,
}

impl SinkBinding {
    /// Wraps an output stream in a healthy binding with a fresh buffer.
    pub fn new(stream: Box<dyn OutputStream>) -> Self {
        Self {
            name: stream.name().to_string(),
            buffer: vec![0; FRAME_SIZE],
            stream,
            degraded: false,
            transient_faults: 0,
        }
    }

    /// The destination's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns `true` once the destination has failed and been taken out
    /// of the fan-out.
    pub fn is_degraded(&self) -> bool {
        self.degraded
    }
}

/// Aggregate health counters for a sink set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SinkSetStats {
    /// Destinations still receiving audio.
    pub healthy: usize,
    /// Destinations taken out of the fan-out after a fault.
    pub degraded: usize,
    /// Total underruns/overruns swallowed across all destinations.
    pub transient_faults: u64,
}

/// The fan-out set of playback destinations.
pub struct SinkSet {
    bindings: Vec<SinkBinding>,
    events: Option<EventCallback>,
}

impl SinkSet {
    /// Creates an empty set.
    pub fn new(events: Option<EventCallback>) -> Self {
        Self {
            bindings: Vec::new(),
            events,
        }
    }

    /// Opens a batch of destinations through `backend`.
    ///
    /// All-or-nothing: if any destination fails to open, every destination
    /// already opened in this batch is released before the original error
    /// is returned. No partially-open fan-out set is left behind.
    ///
    /// # Errors
    ///
    /// The first open failure, typically [`PipelineError::DeviceUnavailable`].
    pub fn open(
        backend: &dyn AudioBackend,
        outputs: &[(DeviceInfo, bool)],
        events: Option<EventCallback>,
    ) -> Result<Self, PipelineError> {
        let mut set = Self::new(events);
        for (device, high_latency) in outputs {
            match backend.open_sink(device, *high_latency) {
                Ok(stream) => set.add(SinkBinding::new(stream)),
                Err(e) => {
                    set.remove_all();
                    return Err(e);
                }
            }
        }
        Ok(set)
    }

    /// Adds an already-open destination to the fan-out.
    pub fn add(&mut self, binding: SinkBinding) {
        self.bindings.push(binding);
    }

    /// Number of destinations, healthy or not.
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    /// Returns `true` if the set has no destinations.
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Delivers one frame to every healthy destination.
    ///
    /// The frame is copied into each binding's private buffer before the
    /// write; bindings never share sample storage. Transient faults are
    /// swallowed and counted. Any other fault marks that binding degraded
    /// and the remaining bindings still receive the frame. Nothing here
    /// ever fails the caller.
    pub fn write_frame(&mut self, frame: &Frame) {
        for binding in &mut self.bindings {
            if binding.degraded {
                continue;
            }
            binding.buffer.copy_from_slice(frame.samples());
            match binding.stream.write(&binding.buffer) {
                Ok(()) => {}
                Err(StreamFault::Transient) => {
                    binding.transient_faults += 1;
                    tracing::trace!(sink = %binding.name, "transient fault swallowed");
                }
                Err(StreamFault::Fatal { reason }) => {
                    binding.degraded = true;
                    binding.stream.close();
                    tracing::warn!(sink = %binding.name, %reason, "output degraded");
                    if let Some(ref events) = self.events {
                        events(PipelineEvent::SinkDegraded {
                            sink_name: binding.name.clone(),
                            reason,
                        });
                    }
                }
            }
        }
    }

    /// Stops and releases every destination. Idempotent.
    pub fn remove_all(&mut self) {
        for binding in &mut self.bindings {
            binding.stream.close();
        }
        if !self.bindings.is_empty() {
            tracing::debug!(count = self.bindings.len(), "released output streams");
        }
        self.bindings.clear();
    }

    /// Current health counters.
    pub fn stats(&self) -> SinkSetStats {
        let degraded = self.bindings.iter().filter(|b| b.degraded).count();
        SinkSetStats {
            healthy: self.bindings.len() - degraded,
            degraded,
            transient_faults: self.bindings.iter().map(|b| b.transient_faults).sum(),
        }
    }
}

impl Drop for SinkSet {
    fn drop(&mut self) {
        self.remove_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::event_callback;
    use crate::sink::mock::MemorySink;
    use parking_lot::Mutex;
    use std::sync::Arc;

    fn recording_binding(name: &str) -> (SinkBinding, Arc<Mutex<Vec<Vec<i16>>>>) {
        let sink = MemorySink::new(name);
        let recorded = sink.recorded_handle();
        (SinkBinding::new(Box::new(sink)), recorded)
    }

    #[test]
    fn test_write_frame_reaches_all_sinks() {
        let (a, recorded_a) = recording_binding("a");
        let (b, recorded_b) = recording_binding("b");
        let mut set = SinkSet::new(None);
        set.add(a);
        set.add(b);

        set.write_frame(&Frame::filled(11));
        set.write_frame(&Frame::filled(22));

        for recorded in [recorded_a, recorded_b] {
            let frames = recorded.lock();
            assert_eq!(frames.len(), 2);
            assert!(frames[0].iter().all(|&s| s == 11));
            assert!(frames[1].iter().all(|&s| s == 22));
        }
    }

    #[test]
    fn test_private_buffers_are_isolated() {
        let (a, _) = recording_binding("a");
        let (b, recorded_b) = recording_binding("b");
        let mut set = SinkSet::new(None);
        set.add(a);
        set.add(b);

        set.write_frame(&Frame::filled(5));

        // Scribble over the first binding's private buffer.
        set.bindings[0].buffer.fill(-1);

        assert!(set.bindings[1].buffer.iter().all(|&s| s == 5));
        assert!(recorded_b.lock()[0].iter().all(|&s| s == 5));
    }

    #[test]
    fn test_transient_fault_is_swallowed_and_counted() {
        let sink = MemorySink::new("flaky").with_transient_at(&[1]);
        let mut set = SinkSet::new(None);
        set.add(SinkBinding::new(Box::new(sink)));

        set.write_frame(&Frame::filled(1));
        set.write_frame(&Frame::filled(2)); // dropped: transient
        set.write_frame(&Frame::filled(3));

        let stats = set.stats();
        assert_eq!(stats.healthy, 1);
        assert_eq!(stats.transient_faults, 1);
    }

    #[test]
    fn test_fatal_fault_degrades_only_that_sink() {
        let failing = MemorySink::new("dying").with_fatal_after(1);
        let (healthy, recorded) = recording_binding("steady");

        let degraded_events = Arc::new(Mutex::new(Vec::new()));
        let events_clone = degraded_events.clone();
        let mut set = SinkSet::new(Some(event_callback(move |event| {
            if let PipelineEvent::SinkDegraded { sink_name, .. } = event {
                events_clone.lock().push(sink_name);
            }
        })));
        set.add(SinkBinding::new(Box::new(failing)));
        set.add(healthy);

        set.write_frame(&Frame::filled(1));
        set.write_frame(&Frame::filled(2)); // "dying" fails here
        set.write_frame(&Frame::filled(3));

        let stats = set.stats();
        assert_eq!(stats.healthy, 1);
        assert_eq!(stats.degraded, 1);
        assert_eq!(recorded.lock().len(), 3);
        assert_eq!(*degraded_events.lock(), vec!["dying".to_string()]);
    }

    #[test]
    fn test_remove_all_is_idempotent() {
        let (binding, _) = recording_binding("a");
        let mut set = SinkSet::new(None);
        set.add(binding);

        set.remove_all();
        set.remove_all();
        assert!(set.is_empty());
    }
}
