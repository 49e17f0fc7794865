//! Fixed-size audio frame and the pipeline-wide format constants.

use std::time::Duration;

use crate::PipelineError;

/// Sample rate shared by capture and every playback destination, in Hz.
pub const SAMPLE_RATE: u32 = 48_000;

/// Samples per frame. 480 samples at 48 kHz is 10 ms of mono audio, the
/// frame size the RNNoise family of suppressors operates on.
pub const FRAME_SIZE: usize = 480;

/// Channel count. The pipeline is mono end to end.
pub const CHANNELS: u16 = 1;

/// Wall-clock duration of one frame.
pub const FRAME_DURATION: Duration = Duration::from_millis(10);

/// One fixed-length block of signed 16-bit PCM samples.
///
/// Every frame in the pipeline has exactly [`FRAME_SIZE`] samples; the only
/// way to build one from raw samples is [`Frame::from_samples`], which
/// rejects any other length. A wrong-length frame is an assembly defect,
/// never a runtime condition, so nothing downstream re-validates.
///
/// # Example
///
/// ```
/// use clearvox::{Frame, FRAME_SIZE};
///
/// let frame = Frame::filled(100);
/// assert_eq!(frame.samples().len(), FRAME_SIZE);
/// assert!(frame.samples().iter().all(|&s| s == 100));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    samples: Vec<i16>,
}

impl Frame {
    /// Returns a frame of digital silence.
    pub fn silence() -> Self {
        Self {
            samples: vec![0; FRAME_SIZE],
        }
    }

    /// Returns a frame with every sample set to `value`.
    pub fn filled(value: i16) -> Self {
        Self {
            samples: vec![value; FRAME_SIZE],
        }
    }

    /// Builds a frame from raw samples.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::FrameLengthMismatch`] unless `samples` has
    /// exactly [`FRAME_SIZE`] elements.
    pub fn from_samples(samples: Vec<i16>) -> Result<Self, PipelineError> {
        if samples.len() != FRAME_SIZE {
            return Err(PipelineError::FrameLengthMismatch {
                expected: FRAME_SIZE,
                actual: samples.len(),
            });
        }
        Ok(Self { samples })
    }

    /// The frame's samples.
    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    /// Mutable access to the frame's samples. The length cannot change.
    pub fn samples_mut(&mut self) -> &mut [i16] {
        &mut self.samples
    }

    /// Returns `true` if every sample is zero.
    pub fn is_silent(&self) -> bool {
        self.samples.iter().all(|&s| s == 0)
    }
}

impl Default for Frame {
    fn default() -> Self {
        Self::silence()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_silence_has_frame_size() {
        let frame = Frame::silence();
        assert_eq!(frame.samples().len(), FRAME_SIZE);
        assert!(frame.is_silent());
    }

    #[test]
    fn test_filled_frame() {
        let frame = Frame::filled(1234);
        assert!(frame.samples().iter().all(|&s| s == 1234));
        assert!(!frame.is_silent());
    }

    #[test]
    fn test_from_samples_exact_length() {
        let frame = Frame::from_samples(vec![7; FRAME_SIZE]).unwrap();
        assert_eq!(frame.samples()[0], 7);
    }

    #[test]
    fn test_from_samples_rejects_wrong_length() {
        let err = Frame::from_samples(vec![0; FRAME_SIZE - 1]).unwrap_err();
        match err {
            PipelineError::FrameLengthMismatch { expected, actual } => {
                assert_eq!(expected, FRAME_SIZE);
                assert_eq!(actual, FRAME_SIZE - 1);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_frame_duration_matches_rate() {
        let per_frame = f64::from(SAMPLE_RATE) * FRAME_DURATION.as_secs_f64();
        assert_eq!(per_frame as usize, FRAME_SIZE);
    }
}
