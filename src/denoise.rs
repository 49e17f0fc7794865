//! Noise suppression capability and the live enable/disable adapter.
//!
//! The suppression DSP itself is consumed as an opaque, length-preserving
//! frame transform behind the [`NoiseSuppressor`] trait. The
//! [`DenoiseAdapter`] wraps one suppressor with the lock-free toggle that
//! the control thread flips while the pump thread reads it at audio rate.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::{Frame, PipelineError, FRAME_SIZE};

/// A stateful, length-preserving frame transform.
///
/// The suppressor adapts to the incoming noise floor over successive
/// frames; that internal profile is process-scoped and survives until the
/// suppressor is dropped. Implementations must return exactly as many
/// samples as they were given.
pub trait NoiseSuppressor: Send {
    /// Processes one frame of samples, returning the denoised frame.
    fn process(&mut self, frame: &[i16]) -> Vec<i16>;
}

/// RNNoise-based suppressor backed by the pure-Rust `nnnoiseless` crate.
///
/// `nnnoiseless` operates on 480-sample frames of f32 values in the i16
/// range, which is exactly the pipeline's frame format.
pub struct RnnoiseSuppressor {
    state: Box<nnnoiseless::DenoiseState<'static>>,
}

impl RnnoiseSuppressor {
    /// Creates a suppressor with a fresh (cold) noise profile.
    pub fn new() -> Self {
        Self {
            state: nnnoiseless::DenoiseState::new(),
        }
    }
}

impl Default for RnnoiseSuppressor {
    fn default() -> Self {
        Self::new()
    }
}

impl NoiseSuppressor for RnnoiseSuppressor {
    fn process(&mut self, frame: &[i16]) -> Vec<i16> {
        let input: Vec<f32> = frame.iter().map(|&s| f32::from(s)).collect();
        let mut output = vec![0.0f32; input.len()];
        self.state.process_frame(&mut output, &input);
        output
            .iter()
            .map(|&s| s.clamp(f32::from(i16::MIN), f32::from(i16::MAX)) as i16)
            .collect()
    }
}

struct AdapterInner {
    enabled: AtomicBool,
    // Taken by finalize(); apply() while enabled after that is a defect.
    suppressor: Mutex<Option<Box<dyn NoiseSuppressor>>>,
}

/// Wraps a [`NoiseSuppressor`] with a lock-free enable/disable flag.
///
/// Clones share the same suppressor and flag, so a control surface can
/// hold one clone while the pump thread holds another. The enabled flag is
/// the only state the audio thread and the control thread share; flipping
/// it never blocks either side.
///
/// Stopping the pipeline does not touch the adapter: the suppressor's
/// warmed-up noise profile deliberately survives stop/start cycles and is
/// released only by [`DenoiseAdapter::finalize`] at full teardown.
///
/// # Example
///
/// ```
/// use clearvox::{DenoiseAdapter, Frame, NoiseSuppressor};
///
/// struct Mute;
/// impl NoiseSuppressor for Mute {
///     fn process(&mut self, frame: &[i16]) -> Vec<i16> {
///         vec![0; frame.len()]
///     }
/// }
///
/// let adapter = DenoiseAdapter::new(Box::new(Mute));
/// assert!(adapter.is_enabled());
///
/// let mut frame = Frame::filled(500);
/// adapter.apply(&mut frame)?;
/// assert!(frame.is_silent());
/// # Ok::<(), clearvox::PipelineError>(())
/// ```
#[derive(Clone)]
pub struct DenoiseAdapter {
    inner: Arc<AdapterInner>,
}

impl DenoiseAdapter {
    /// Wraps a suppressor. Suppression starts enabled.
    pub fn new(suppressor: Box<dyn NoiseSuppressor>) -> Self {
        Self {
            inner: Arc::new(AdapterInner {
                enabled: AtomicBool::new(true),
                suppressor: Mutex::new(Some(suppressor)),
            }),
        }
    }

    /// Atomically flips the enabled flag and returns the new value.
    pub fn toggle(&self) -> bool {
        !self.inner.enabled.fetch_xor(true, Ordering::AcqRel)
    }

    /// Lock-free read of the enabled flag.
    pub fn is_enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::Acquire)
    }

    /// Sets the enabled flag.
    pub fn set_enabled(&self, enabled: bool) {
        self.inner.enabled.store(enabled, Ordering::Release);
    }

    /// Applies suppression to `frame` in place.
    ///
    /// The enabled flag is snapshotted once at entry, so a toggle landing
    /// mid-call never tears a frame. Disabled means byte-identical
    /// passthrough.
    ///
    /// # Errors
    ///
    /// [`PipelineError::FrameLengthMismatch`] if the suppressor is not
    /// length-preserving, [`PipelineError::Terminated`] if the adapter was
    /// already finalized. Both are assembly defects, not runtime
    /// conditions.
    pub fn apply(&self, frame: &mut Frame) -> Result<(), PipelineError> {
        if !self.inner.enabled.load(Ordering::Acquire) {
            return Ok(());
        }

        let mut guard = self.inner.suppressor.lock();
        let suppressor = guard.as_mut().ok_or(PipelineError::Terminated)?;
        let output = suppressor.process(frame.samples());
        if output.len() != FRAME_SIZE {
            return Err(PipelineError::FrameLengthMismatch {
                expected: FRAME_SIZE,
                actual: output.len(),
            });
        }
        frame.samples_mut().copy_from_slice(&output);
        Ok(())
    }

    /// Releases the suppressor and its adaptive profile.
    ///
    /// Called exactly once, at process teardown, never at stop. A second
    /// call is a no-op.
    pub fn finalize(&self) {
        if self.inner.suppressor.lock().take().is_some() {
            tracing::debug!("noise suppressor finalized");
        }
    }
}
