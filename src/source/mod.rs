//! Frame sources: the capture side of the pipeline.
//!
//! A [`FrameSource`] owns one capture stream and produces fixed-size
//! frames on demand. The crate provides [`DeviceSource`] for real
//! microphones and [`ScriptedSource`] for hardware-free tests.

mod device;
mod mock;

pub use device::DeviceSource;
pub use mock::{FrameHook, ScriptStep, ScriptedSource};

use crate::{Frame, StreamFault};

/// One frame delivered by a source, with overrun information attached.
///
/// A capture-side buffer overrun still delivers a frame (possibly with a
/// gap where samples were dropped); it is a transient condition, counted
/// by the pump and never escalated.
#[derive(Debug, Clone)]
pub enum Captured {
    /// Frame delivered normally.
    Clean(Frame),
    /// Frame delivered after the capture buffer overran.
    AfterOverrun(Frame),
}

impl Captured {
    /// Consumes the read result, yielding the frame either way.
    pub fn into_frame(self) -> Frame {
        match self {
            Self::Clean(frame) | Self::AfterOverrun(frame) => frame,
        }
    }

    /// Returns `true` if the capture buffer overran before this frame.
    pub fn overran(&self) -> bool {
        matches!(self, Self::AfterOverrun(_))
    }
}

/// A source of fixed-size audio frames.
///
/// `read_frame` blocks until exactly one full frame is available. After it
/// returns [`StreamFault::Fatal`] the source is dead and must not be read
/// again.
pub trait FrameSource {
    /// Blocks until one full frame is available and returns it.
    ///
    /// # Errors
    ///
    /// [`StreamFault::Fatal`] when the capture stream is gone (device
    /// disconnected, stream closed).
    fn read_frame(&mut self) -> Result<Captured, StreamFault>;

    /// Stops and releases the capture stream. Idempotent: closing twice
    /// is a no-op, never an error.
    fn close(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_captured_into_frame() {
        let frame = Frame::filled(9);
        assert_eq!(Captured::Clean(frame.clone()).into_frame(), frame);
        assert_eq!(Captured::AfterOverrun(frame.clone()).into_frame(), frame);
    }

    #[test]
    fn test_captured_overran() {
        assert!(!Captured::Clean(Frame::silence()).overran());
        assert!(Captured::AfterOverrun(Frame::silence()).overran());
    }
}
