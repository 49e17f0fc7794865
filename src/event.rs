//! Status notifications for the hosting control surface.
//!
//! The pipeline reports lifecycle changes asynchronously through a
//! registered callback. Events are informational; the control surface
//! decides what, if anything, to do about them.

use std::sync::Arc;

/// Asynchronous status notifications emitted by the pipeline.
///
/// Lifecycle events ([`Running`], [`Stopped`], [`Error`]) are emitted once
/// per transition. [`SinkDegraded`] is emitted when one playback
/// destination fails while the rest keep receiving audio.
///
/// [`Running`]: PipelineEvent::Running
/// [`Stopped`]: PipelineEvent::Stopped
/// [`Error`]: PipelineEvent::Error
/// [`SinkDegraded`]: PipelineEvent::SinkDegraded
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    /// The pipeline started pumping frames.
    Running,

    /// The pipeline stopped cleanly (explicit stop or fault acknowledged).
    Stopped,

    /// A fatal fault stopped the pipeline; it is now in the error state.
    ///
    /// The capture and playback streams are already closed. The noise
    /// suppressor keeps its adapted profile so a restart resumes warm.
    Error {
        /// Description of the fault.
        reason: String,
    },

    /// One playback destination failed and was taken out of the fan-out.
    ///
    /// The remaining destinations continue to receive every frame.
    SinkDegraded {
        /// Name of the degraded destination.
        sink_name: String,
        /// Description of the failure.
        reason: String,
    },
}

/// Callback type for receiving [`PipelineEvent`] notifications.
///
/// The callback is invoked from the pipeline's pump thread and from
/// control calls, so it must be cheap and must not block.
pub type EventCallback = Arc<dyn Fn(PipelineEvent) + Send + Sync>;

/// Creates an [`EventCallback`] from a closure.
///
/// # Example
///
/// ```
/// use clearvox::{event_callback, PipelineEvent};
///
/// let callback = event_callback(|event| {
///     if let PipelineEvent::Error { reason } = event {
///         eprintln!("pipeline fault: {reason}");
///     }
/// });
/// callback(PipelineEvent::Running);
/// ```
pub fn event_callback<F>(f: F) -> EventCallback
where
    F: Fn(PipelineEvent) + Send + Sync + 'static,
{
    Arc::new(f)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_debug() {
        let event = PipelineEvent::Error {
            reason: "device lost".to_string(),
        };
        let debug = format!("{event:?}");
        assert!(debug.contains("device lost"));
    }

    #[test]
    fn test_event_callback_helper() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let hits = Arc::new(AtomicUsize::new(0));
        let hits_clone = hits.clone();

        let callback = event_callback(move |_| {
            hits_clone.fetch_add(1, Ordering::SeqCst);
        });

        callback(PipelineEvent::Running);
        callback(PipelineEvent::Stopped);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }
}
