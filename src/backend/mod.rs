//! The hardware seam: where the pipeline meets actual audio devices.
//!
//! [`AudioBackend`] is the swappable boundary between the pipeline
//! controller and the audio hardware. [`CpalBackend`] is the production
//! implementation; [`MockBackend`] runs the identical pipeline against
//! scripted sources and recording sinks so the whole thing is testable
//! (and embeddable) without a sound card.

mod cpal;
mod mock;

pub use self::cpal::CpalBackend;
pub use mock::MockBackend;

use crate::sink::OutputStream;
use crate::source::FrameSource;
use crate::{DeviceCatalog, DeviceInfo, PipelineError};

/// Opens capture and playback streams for resolved devices.
///
/// The controller resolves selectors against one catalog snapshot per
/// start, then asks the backend to open the concrete devices. All opens
/// happen on the pipeline's pump thread, and the streams stay there; the
/// backend itself is shared across threads.
pub trait AudioBackend: Send + Sync {
    /// Takes a fresh device catalog snapshot.
    ///
    /// # Errors
    ///
    /// [`PipelineError::Backend`] if devices cannot be enumerated.
    fn catalog(&self) -> Result<DeviceCatalog, PipelineError>;

    /// Opens a capture stream on the given device.
    ///
    /// # Errors
    ///
    /// [`PipelineError::DeviceUnavailable`] and friends.
    fn open_source(&self, device: &DeviceInfo) -> Result<Box<dyn FrameSource>, PipelineError>;

    /// Opens a playback stream on the given device with the requested
    /// latency profile.
    ///
    /// # Errors
    ///
    /// [`PipelineError::DeviceUnavailable`] and friends.
    fn open_sink(
        &self,
        device: &DeviceInfo,
        high_latency: bool,
    ) -> Result<Box<dyn OutputStream>, PipelineError>;
}
