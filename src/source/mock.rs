//! Scripted frame source for testing without hardware.

use std::collections::VecDeque;
use std::sync::Arc;

use crate::source::{Captured, FrameSource};
use crate::{Frame, StreamFault, FRAME_DURATION};

/// Hook invoked just before a scripted frame is delivered, with the
/// zero-based index of that frame. Lets tests act at an exact frame
/// boundary (for example, flipping the suppression toggle at frame 50).
pub type FrameHook = Arc<dyn Fn(usize) + Send + Sync>;

/// One step of a capture script.
#[derive(Debug, Clone)]
pub enum ScriptStep {
    /// Deliver this frame normally.
    Frame(Frame),
    /// Deliver this frame flagged as following a buffer overrun.
    Overrun(Frame),
    /// Fail with a fatal fault.
    Fault(String),
}

/// A [`FrameSource`] that replays a pre-written script.
///
/// After the script runs out the source behaves like a live microphone in
/// a quiet room: it keeps delivering silence at roughly real-time pace, so
/// a pipeline built on it can still be stopped cooperatively.
///
/// # Example
///
/// ```
/// use clearvox::source::{FrameSource, ScriptedSource};
/// use clearvox::Frame;
///
/// let mut source = ScriptedSource::from_frames(vec![Frame::filled(1), Frame::filled(2)]);
/// assert_eq!(source.read_frame().unwrap().into_frame(), Frame::filled(1));
/// assert_eq!(source.read_frame().unwrap().into_frame(), Frame::filled(2));
/// ```
pub struct ScriptedSource {
    steps: VecDeque<ScriptStep>,
    hook: Option<FrameHook>,
    next_index: usize,
    closed: bool,
}

impl ScriptedSource {
    /// Creates a source from explicit script steps.
    pub fn new(steps: Vec<ScriptStep>) -> Self {
        Self {
            steps: steps.into(),
            hook: None,
            next_index: 0,
            closed: false,
        }
    }

    /// Creates a source that delivers `frames` in order, then silence.
    pub fn from_frames(frames: Vec<Frame>) -> Self {
        Self::new(frames.into_iter().map(ScriptStep::Frame).collect())
    }

    /// Registers a per-frame hook.
    pub fn with_hook(mut self, hook: FrameHook) -> Self {
        self.hook = Some(hook);
        self
    }
}

impl FrameSource for ScriptedSource {
    fn read_frame(&mut self) -> Result<Captured, StreamFault> {
        if self.closed {
            return Err(StreamFault::fatal("capture stream closed"));
        }

        let Some(step) = self.steps.pop_front() else {
            // Script exhausted: act like a silent live mic.
            std::thread::sleep(FRAME_DURATION);
            return Ok(Captured::Clean(Frame::silence()));
        };

        match step {
            ScriptStep::Frame(frame) => {
                if let Some(ref hook) = self.hook {
                    hook(self.next_index);
                }
                self.next_index += 1;
                Ok(Captured::Clean(frame))
            }
            ScriptStep::Overrun(frame) => {
                if let Some(ref hook) = self.hook {
                    hook(self.next_index);
                }
                self.next_index += 1;
                Ok(Captured::AfterOverrun(frame))
            }
            ScriptStep::Fault(reason) => {
                self.closed = true;
                Err(StreamFault::Fatal { reason })
            }
        }
    }

    fn close(&mut self) {
        self.closed = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_scripted_frames_in_order() {
        let mut source =
            ScriptedSource::from_frames(vec![Frame::filled(1), Frame::filled(2), Frame::filled(3)]);

        for expected in 1..=3 {
            let frame = source.read_frame().unwrap().into_frame();
            assert_eq!(frame, Frame::filled(expected));
        }
    }

    #[test]
    fn test_silence_after_script() {
        let mut source = ScriptedSource::from_frames(vec![Frame::filled(1)]);
        source.read_frame().unwrap();
        let frame = source.read_frame().unwrap().into_frame();
        assert!(frame.is_silent());
    }

    #[test]
    fn test_overrun_step() {
        let mut source = ScriptedSource::new(vec![ScriptStep::Overrun(Frame::filled(7))]);
        let captured = source.read_frame().unwrap();
        assert!(captured.overran());
        assert_eq!(captured.into_frame(), Frame::filled(7));
    }

    #[test]
    fn test_fault_step_is_fatal_and_sticky() {
        let mut source = ScriptedSource::new(vec![
            ScriptStep::Frame(Frame::silence()),
            ScriptStep::Fault("unplugged".to_string()),
        ]);
        source.read_frame().unwrap();

        let err = source.read_frame().unwrap_err();
        assert!(matches!(err, StreamFault::Fatal { ref reason } if reason == "unplugged"));

        // Reads after a fatal fault keep failing.
        assert!(source.read_frame().is_err());
    }

    #[test]
    fn test_hook_sees_frame_indices() {
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_clone = seen.clone();
        let mut source = ScriptedSource::from_frames(vec![Frame::silence(); 5]).with_hook(
            Arc::new(move |index| {
                seen_clone.store(index + 1, Ordering::SeqCst);
            }),
        );

        for _ in 0..5 {
            source.read_frame().unwrap();
        }
        assert_eq!(seen.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn test_close_is_idempotent() {
        let mut source = ScriptedSource::from_frames(vec![Frame::silence()]);
        source.close();
        source.close();
        assert!(source.read_frame().is_err());
    }
}
