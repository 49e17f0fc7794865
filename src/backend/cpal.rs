//! Production backend over CPAL.

use cpal::traits::{DeviceTrait, HostTrait};

use crate::backend::AudioBackend;
use crate::sink::{DeviceSink, OutputStream};
use crate::source::{DeviceSource, FrameSource};
use crate::{DeviceCatalog, DeviceInfo, PipelineError};

/// The default, hardware-backed [`AudioBackend`].
#[derive(Debug, Default)]
pub struct CpalBackend;

impl CpalBackend {
    /// Creates the backend. Cheap; no hardware is touched until a
    /// snapshot or open.
    pub fn new() -> Self {
        Self
    }

    /// Finds the concrete CPAL device for a catalog entry by exact name.
    fn find_device(&self, name: &str) -> Result<cpal::Device, PipelineError> {
        let host = cpal::default_host();
        let devices = host
            .devices()
            .map_err(|e| PipelineError::Backend(e.to_string()))?;
        for device in devices {
            if device.name().is_ok_and(|n| n == name) {
                return Ok(device);
            }
        }
        // The device was in the snapshot but is gone now (unplugged
        // between snapshot and open).
        Err(PipelineError::DeviceUnavailable {
            name: name.to_string(),
            reason: "device disappeared since the catalog snapshot".to_string(),
        })
    }
}

impl AudioBackend for CpalBackend {
    fn catalog(&self) -> Result<DeviceCatalog, PipelineError> {
        DeviceCatalog::snapshot()
    }

    fn open_source(&self, device: &DeviceInfo) -> Result<Box<dyn FrameSource>, PipelineError> {
        let cpal_device = self.find_device(&device.name)?;
        Ok(Box::new(DeviceSource::open(&cpal_device)?))
    }

    fn open_sink(
        &self,
        device: &DeviceInfo,
        high_latency: bool,
    ) -> Result<Box<dyn OutputStream>, PipelineError> {
        let cpal_device = self.find_device(&device.name)?;
        Ok(Box::new(DeviceSink::open(&cpal_device, device, high_latency)?))
    }
}
