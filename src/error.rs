//! Error types for clearvox.
//!
//! Errors split into two categories:
//! - **Control errors** ([`PipelineError`]): returned to the caller of
//!   `start`/`terminate` and friends; the caller decides whether to retry.
//! - **Stream faults** ([`StreamFault`]): raised by a capture or playback
//!   stream while audio is flowing. Transient faults are absorbed and
//!   counted inside the pipeline; fatal faults escalate to the controller.

/// Errors returned from pipeline control operations.
///
/// No operation in this crate terminates the process on failure; every
/// hardware problem comes back as one of these so the hosting control
/// surface can retry, alert, or exit as it sees fit.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// The requested audio device was not found in the catalog snapshot.
    #[error("device not found: {name}")]
    DeviceNotFound {
        /// Selector text or index that matched nothing.
        name: String,
    },

    /// The requested device exists but could not be opened.
    #[error("device unavailable: {name} - {reason}")]
    DeviceUnavailable {
        /// Name of the unavailable device.
        name: String,
        /// Reason the device could not be opened.
        reason: String,
    },

    /// No default device is configured for the requested direction.
    #[error("no default {direction} device configured")]
    NoDefaultDevice {
        /// `"input"` or `"output"`.
        direction: &'static str,
    },

    /// `start()` was called while the pipeline is already running.
    #[error("pipeline is already running")]
    AlreadyRunning,

    /// `start()` was called while the pipeline is in the error state.
    ///
    /// Call `stop()` first to acknowledge the fault and return to stopped.
    #[error("pipeline is faulted; call stop() to acknowledge before restarting")]
    Faulted,

    /// `start()` was called after `terminate()`.
    ///
    /// Termination is final for the lifetime of the pipeline instance; a
    /// fresh instance is required to stream again.
    #[error("pipeline has been terminated")]
    Terminated,

    /// A stage produced or was handed a frame of the wrong length.
    ///
    /// This is a defect in pipeline assembly (for example a suppressor that
    /// is not length-preserving), never a recoverable runtime condition.
    #[error("frame length mismatch: expected {expected} samples, got {actual}")]
    FrameLengthMismatch {
        /// Required sample count.
        expected: usize,
        /// Sample count actually seen.
        actual: usize,
    },

    /// An error from the underlying audio library (CPAL).
    #[error("audio backend error: {0}")]
    Backend(String),
}

/// Faults raised by a running capture or playback stream.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StreamFault {
    /// Buffer underrun or overrun. Common with virtual/loopback devices;
    /// absorbed and counted, never surfaced as a failure.
    #[error("transient stream fault (buffer underrun/overrun)")]
    Transient,

    /// The stream is gone (device disconnected, driver failure). The
    /// caller must not keep reading or writing after this.
    #[error("fatal stream fault: {reason}")]
    Fatal {
        /// Description of what killed the stream.
        reason: String,
    },
}

impl StreamFault {
    /// Creates a fatal fault with the given reason.
    pub fn fatal(reason: impl Into<String>) -> Self {
        Self::Fatal {
            reason: reason.into(),
        }
    }

    /// Returns `true` for [`StreamFault::Transient`].
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_error_display() {
        let err = PipelineError::DeviceNotFound {
            name: "BlackHole".to_string(),
        };
        assert_eq!(err.to_string(), "device not found: BlackHole");
    }

    #[test]
    fn test_frame_length_mismatch_display() {
        let err = PipelineError::FrameLengthMismatch {
            expected: 480,
            actual: 479,
        };
        assert_eq!(
            err.to_string(),
            "frame length mismatch: expected 480 samples, got 479"
        );
    }

    #[test]
    fn test_stream_fault_transient() {
        let fault = StreamFault::Transient;
        assert!(fault.is_transient());
    }

    #[test]
    fn test_stream_fault_fatal() {
        let fault = StreamFault::fatal("device disconnected");
        assert!(!fault.is_transient());
        assert_eq!(fault.to_string(), "fatal stream fault: device disconnected");
    }
}
