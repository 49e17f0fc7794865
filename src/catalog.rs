//! Point-in-time snapshot of the audio device catalog.
//!
//! The pipeline takes exactly one snapshot per `start()` and resolves every
//! selector against it, so one run never mixes device lists taken at
//! different times. Resolution is a pure function over the snapshot.

use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait};
use cpal::SupportedBufferSize;

use crate::{PipelineError, SAMPLE_RATE};

/// Fallback latency defaults when a device does not report a buffer range.
const DEFAULT_LOW_LATENCY: Duration = Duration::from_millis(10);
const DEFAULT_HIGH_LATENCY: Duration = Duration::from_millis(100);

/// Capability metadata for one audio device.
///
/// Immutable once obtained from a [`DeviceCatalog`] snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Stable device name as reported by the host.
    pub name: String,
    /// Maximum capture channel count (0 for output-only devices).
    pub max_input_channels: u16,
    /// Maximum playback channel count (0 for input-only devices).
    pub max_output_channels: u16,
    /// Latency the device suggests for interactive use.
    pub default_low_latency: Duration,
    /// Latency the device suggests for robust, underrun-averse use.
    pub default_high_latency: Duration,
}

impl DeviceInfo {
    /// Returns `true` if the device can capture audio.
    pub fn is_input(&self) -> bool {
        self.max_input_channels > 0
    }

    /// Returns `true` if the device can play audio.
    pub fn is_output(&self) -> bool {
        self.max_output_channels > 0
    }
}

/// How a capture or playback device is chosen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceSelector {
    /// The platform default device for the direction.
    Default,
    /// Case-insensitive substring match on the device name
    /// (e.g. `"blackhole"` matches `"BlackHole 2ch"`).
    Name(String),
    /// Index into the direction-filtered catalog listing.
    Index(usize),
}

/// A point-in-time snapshot of the available audio devices.
///
/// # Example
///
/// ```no_run
/// use clearvox::{DeviceCatalog, DeviceSelector};
///
/// let catalog = DeviceCatalog::snapshot()?;
/// let virtual_mic = catalog.resolve_output(&DeviceSelector::Name("blackhole".into()))?;
/// println!("routing into {}", virtual_mic.name);
/// # Ok::<(), clearvox::PipelineError>(())
/// ```
#[derive(Debug, Clone)]
pub struct DeviceCatalog {
    entries: Vec<DeviceInfo>,
    default_input: Option<String>,
    default_output: Option<String>,
}

impl DeviceCatalog {
    /// Takes a fresh snapshot of the host's devices.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Backend`] if the host cannot enumerate
    /// devices at all.
    pub fn snapshot() -> Result<Self, PipelineError> {
        let host = cpal::default_host();
        let devices = host
            .devices()
            .map_err(|e| PipelineError::Backend(e.to_string()))?;

        let mut entries = Vec::new();
        for device in devices {
            let name = device.name().unwrap_or_else(|_| "unknown".to_string());
            let (max_input_channels, input_buffer) = direction_caps(device.supported_input_configs());
            let (max_output_channels, output_buffer) =
                direction_caps(device.supported_output_configs());

            // Prefer the playback buffer range for latency hints; it is the
            // side the fan-out sizes its buffers for.
            let buffer = output_buffer.or(input_buffer);
            let (default_low_latency, default_high_latency) = latency_bounds(buffer.as_ref());

            entries.push(DeviceInfo {
                name,
                max_input_channels,
                max_output_channels,
                default_low_latency,
                default_high_latency,
            });
        }

        let default_input = host
            .default_input_device()
            .and_then(|d| d.name().ok());
        let default_output = host
            .default_output_device()
            .and_then(|d| d.name().ok());

        Ok(Self {
            entries,
            default_input,
            default_output,
        })
    }

    /// Builds a catalog from pre-made entries (for tests and mock backends).
    ///
    /// The first input-capable entry becomes the default input device and
    /// the first output-capable entry the default output device.
    pub fn from_entries(entries: Vec<DeviceInfo>) -> Self {
        let default_input = entries.iter().find(|e| e.is_input()).map(|e| e.name.clone());
        let default_output = entries
            .iter()
            .find(|e| e.is_output())
            .map(|e| e.name.clone());
        Self {
            entries,
            default_input,
            default_output,
        }
    }

    /// All devices in the snapshot.
    pub fn entries(&self) -> &[DeviceInfo] {
        &self.entries
    }

    /// Capture-capable devices, in listing order.
    pub fn inputs(&self) -> impl Iterator<Item = &DeviceInfo> {
        self.entries.iter().filter(|e| e.is_input())
    }

    /// Playback-capable devices, in listing order.
    pub fn outputs(&self) -> impl Iterator<Item = &DeviceInfo> {
        self.entries.iter().filter(|e| e.is_output())
    }

    /// Resolves a capture device selector against this snapshot.
    ///
    /// # Errors
    ///
    /// `DeviceNotFound` if nothing matches, `NoDefaultDevice` if
    /// [`DeviceSelector::Default`] is used on a host without one.
    pub fn resolve_input(&self, selector: &DeviceSelector) -> Result<&DeviceInfo, PipelineError> {
        resolve(
            selector,
            self.inputs(),
            self.default_input.as_deref(),
            "input",
        )
    }

    /// Resolves a playback device selector against this snapshot.
    ///
    /// # Errors
    ///
    /// Same as [`DeviceCatalog::resolve_input`], for the output direction.
    pub fn resolve_output(&self, selector: &DeviceSelector) -> Result<&DeviceInfo, PipelineError> {
        resolve(
            selector,
            self.outputs(),
            self.default_output.as_deref(),
            "output",
        )
    }

    /// Returns `true` if an output device whose name contains `name`
    /// (case-insensitive) is present.
    ///
    /// This is the presence probe the virtual-driver provisioning workflow
    /// uses to decide whether installation is needed.
    pub fn has_output_device(&self, name: &str) -> bool {
        let needle = name.to_lowercase();
        self.outputs().any(|e| e.name.to_lowercase().contains(&needle))
    }
}

/// Convenience: snapshot and return the playback devices.
pub fn list_output_devices() -> Result<Vec<DeviceInfo>, PipelineError> {
    Ok(DeviceCatalog::snapshot()?.outputs().cloned().collect())
}

/// Convenience: snapshot and return the capture devices.
pub fn list_input_devices() -> Result<Vec<DeviceInfo>, PipelineError> {
    Ok(DeviceCatalog::snapshot()?.inputs().cloned().collect())
}

fn resolve<'a>(
    selector: &DeviceSelector,
    mut candidates: impl Iterator<Item = &'a DeviceInfo>,
    default_name: Option<&str>,
    direction: &'static str,
) -> Result<&'a DeviceInfo, PipelineError> {
    match selector {
        DeviceSelector::Default => {
            let name = default_name.ok_or(PipelineError::NoDefaultDevice { direction })?;
            candidates
                .find(|e| e.name == name)
                .ok_or(PipelineError::NoDefaultDevice { direction })
        }
        DeviceSelector::Name(name) => {
            let needle = name.to_lowercase();
            candidates
                .find(|e| e.name.to_lowercase().contains(&needle))
                .ok_or_else(|| PipelineError::DeviceNotFound { name: name.clone() })
        }
        DeviceSelector::Index(index) => {
            candidates
                .nth(*index)
                .ok_or_else(|| PipelineError::DeviceNotFound {
                    name: format!("{direction} #{index}"),
                })
        }
    }
}

fn direction_caps(
    configs: Result<
        impl Iterator<Item = cpal::SupportedStreamConfigRange>,
        cpal::SupportedStreamConfigsError,
    >,
) -> (u16, Option<SupportedBufferSize>) {
    let Ok(configs) = configs else {
        return (0, None);
    };
    let mut max_channels = 0;
    let mut buffer = None;
    for range in configs {
        max_channels = max_channels.max(range.channels());
        if buffer.is_none() {
            buffer = Some(range.buffer_size().clone());
        }
    }
    (max_channels, buffer)
}

fn latency_bounds(buffer: Option<&SupportedBufferSize>) -> (Duration, Duration) {
    match buffer {
        Some(SupportedBufferSize::Range { min, max }) => {
            let low_frames = (*min).max(64).min(*max);
            // Cap the high profile at 100ms worth of frames.
            let high_frames = (*max).min(SAMPLE_RATE / 10).max(low_frames);
            (
                Duration::from_secs_f64(f64::from(low_frames) / f64::from(SAMPLE_RATE)),
                Duration::from_secs_f64(f64::from(high_frames) / f64::from(SAMPLE_RATE)),
            )
        }
        _ => (DEFAULT_LOW_LATENCY, DEFAULT_HIGH_LATENCY),
    }
}
