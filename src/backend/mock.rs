//! Scripted backend for testing the full pipeline without hardware.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::backend::AudioBackend;
use crate::sink::{MemorySink, OutputStream};
use crate::source::{FrameHook, FrameSource, ScriptStep, ScriptedSource};
use crate::{DeviceCatalog, DeviceInfo, Frame, PipelineError};

/// An [`AudioBackend`] with scripted capture and recording playback.
///
/// Devices are declared up front and become the catalog snapshot. The
/// capture script is handed to the first source opened; playback
/// destinations record every frame into shared buffers retrievable by
/// device name after the run.
///
/// # Example
///
/// ```
/// use clearvox::backend::MockBackend;
/// use clearvox::Frame;
///
/// let backend = MockBackend::new()
///     .with_input("Mock Mic")
///     .with_output("Virtual Mic")
///     .with_frames(vec![Frame::filled(42)]);
/// ```
pub struct MockBackend {
    entries: Vec<DeviceInfo>,
    script: Mutex<Vec<ScriptStep>>,
    hook: Mutex<Option<FrameHook>>,
    recordings: Mutex<HashMap<String, Arc<Mutex<Vec<Vec<i16>>>>>>,
    unopenable: HashSet<String>,
    sink_fatal_after: HashMap<String, usize>,
    sink_transient_at: HashMap<String, Vec<usize>>,
}

impl MockBackend {
    /// Creates an empty backend with no devices and no script.
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            script: Mutex::new(Vec::new()),
            hook: Mutex::new(None),
            recordings: Mutex::new(HashMap::new()),
            unopenable: HashSet::new(),
            sink_fatal_after: HashMap::new(),
            sink_transient_at: HashMap::new(),
        }
    }

    /// Declares a capture device.
    #[must_use]
    pub fn with_input(mut self, name: &str) -> Self {
        self.entries.push(mock_entry(name, 1, 0));
        self
    }

    /// Declares a playback device.
    #[must_use]
    pub fn with_output(mut self, name: &str) -> Self {
        self.entries.push(mock_entry(name, 0, 2));
        self
    }

    /// Declares a playback device whose open always fails, for exercising
    /// the batch-open rollback path.
    #[must_use]
    pub fn with_unopenable_output(mut self, name: &str) -> Self {
        self.entries.push(mock_entry(name, 0, 2));
        self.unopenable.insert(name.to_string());
        self
    }

    /// Makes the named playback device fail fatally on write `n`.
    #[must_use]
    pub fn with_sink_fatal_after(mut self, name: &str, n: usize) -> Self {
        self.sink_fatal_after.insert(name.to_string(), n);
        self
    }

    /// Makes the named playback device report a transient fault on the
    /// given write indices (per opened stream).
    #[must_use]
    pub fn with_sink_transient_at(mut self, name: &str, indices: &[usize]) -> Self {
        self.sink_transient_at
            .insert(name.to_string(), indices.to_vec());
        self
    }

    /// Scripts the capture sequence: these frames in order, then silence.
    #[must_use]
    pub fn with_frames(self, frames: Vec<Frame>) -> Self {
        self.with_script(frames.into_iter().map(ScriptStep::Frame).collect())
    }

    /// Scripts the capture sequence with explicit steps.
    #[must_use]
    pub fn with_script(self, steps: Vec<ScriptStep>) -> Self {
        *self.script.lock() = steps;
        self
    }

    /// Registers a hook invoked with each scripted frame's index just
    /// before it is captured.
    #[must_use]
    pub fn on_frame(self, hook: FrameHook) -> Self {
        *self.hook.lock() = Some(hook);
        self
    }

    /// Frames recorded by the named playback device so far.
    pub fn recorded(&self, name: &str) -> Vec<Vec<i16>> {
        self.recordings
            .lock()
            .get(name)
            .map(|r| r.lock().clone())
            .unwrap_or_default()
    }

    /// Number of frames recorded by the named playback device so far.
    pub fn recorded_len(&self, name: &str) -> usize {
        self.recordings
            .lock()
            .get(name)
            .map_or(0, |r| r.lock().len())
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioBackend for MockBackend {
    fn catalog(&self) -> Result<DeviceCatalog, PipelineError> {
        Ok(DeviceCatalog::from_entries(self.entries.clone()))
    }

    fn open_source(&self, _device: &DeviceInfo) -> Result<Box<dyn FrameSource>, PipelineError> {
        // The script is consumed by the first open of a run.
        let steps = std::mem::take(&mut *self.script.lock());
        let mut source = ScriptedSource::new(steps);
        if let Some(hook) = self.hook.lock().clone() {
            source = source.with_hook(hook);
        }
        Ok(Box::new(source))
    }

    fn open_sink(
        &self,
        device: &DeviceInfo,
        _high_latency: bool,
    ) -> Result<Box<dyn OutputStream>, PipelineError> {
        if self.unopenable.contains(&device.name) {
            return Err(PipelineError::DeviceUnavailable {
                name: device.name.clone(),
                reason: "scripted open failure".to_string(),
            });
        }

        let recorded = self
            .recordings
            .lock()
            .entry(device.name.clone())
            .or_default()
            .clone();
        let mut sink = MemorySink::with_shared(&device.name, recorded);
        if let Some(&n) = self.sink_fatal_after.get(&device.name) {
            sink = sink.with_fatal_after(n);
        }
        if let Some(indices) = self.sink_transient_at.get(&device.name) {
            sink = sink.with_transient_at(indices);
        }
        Ok(Box::new(sink))
    }
}

fn mock_entry(name: &str, inputs: u16, outputs: u16) -> DeviceInfo {
    DeviceInfo {
        name: name.to_string(),
        max_input_channels: inputs,
        max_output_channels: outputs,
        default_low_latency: Duration::from_millis(10),
        default_high_latency: Duration::from_millis(100),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DeviceSelector;

    #[test]
    fn test_mock_catalog_and_defaults() {
        let backend = MockBackend::new()
            .with_input("Mock Mic")
            .with_output("Speakers")
            .with_output("Virtual Mic");

        let catalog = backend.catalog().unwrap();
        assert_eq!(catalog.entries().len(), 3);
        assert_eq!(
            catalog.resolve_input(&DeviceSelector::Default).unwrap().name,
            "Mock Mic"
        );
        assert_eq!(
            catalog
                .resolve_output(&DeviceSelector::Default)
                .unwrap()
                .name,
            "Speakers"
        );
    }

    #[test]
    fn test_sinks_record_by_name() {
        let backend = MockBackend::new().with_output("Speakers");
        let catalog = backend.catalog().unwrap();
        let device = catalog
            .resolve_output(&DeviceSelector::Default)
            .unwrap()
            .clone();

        let mut sink = backend.open_sink(&device, false).unwrap();
        sink.write(&[1, 2, 3]).unwrap();

        assert_eq!(backend.recorded("Speakers"), vec![vec![1, 2, 3]]);
        assert_eq!(backend.recorded_len("Speakers"), 1);
        assert!(backend.recorded("Nonexistent").is_empty());
    }

    #[test]
    fn test_unopenable_output() {
        let backend = MockBackend::new().with_unopenable_output("Broken");
        let device = mock_entry("Broken", 0, 2);
        assert!(backend.open_sink(&device, false).is_err());
    }
}
