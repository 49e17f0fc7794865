//! In-memory playback destination for testing without hardware.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::sink::OutputStream;
use crate::StreamFault;

/// An [`OutputStream`] that records every frame it accepts.
///
/// Faults can be scripted by write index: transient faults drop that one
/// frame, a fatal fault kills the sink. The recorded frames are shared
/// through [`MemorySink::recorded_handle`], so a test keeps access after
/// the sink has been moved into a pipeline.
pub struct MemorySink {
    name: String,
    recorded: Arc<Mutex<Vec<Vec<i16>>>>,
    transient_at: Vec<usize>,
    fatal_after: Option<usize>,
    writes: usize,
    closed: bool,
}

impl MemorySink {
    /// Creates a sink that accepts every write.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            recorded: Arc::new(Mutex::new(Vec::new())),
            transient_at: Vec::new(),
            fatal_after: None,
            writes: 0,
            closed: false,
        }
    }

    /// Creates a sink recording into an existing shared buffer.
    pub fn with_shared(name: &str, recorded: Arc<Mutex<Vec<Vec<i16>>>>) -> Self {
        Self {
            recorded,
            ..Self::new(name)
        }
    }

    /// Returns [`StreamFault::Transient`] for the given write indices.
    #[must_use]
    pub fn with_transient_at(mut self, indices: &[usize]) -> Self {
        self.transient_at = indices.to_vec();
        self
    }

    /// Fails fatally on the write with index `n` (zero-based).
    #[must_use]
    pub fn with_fatal_after(mut self, n: usize) -> Self {
        self.fatal_after = Some(n);
        self
    }

    /// Shared handle to the recorded frames.
    pub fn recorded_handle(&self) -> Arc<Mutex<Vec<Vec<i16>>>> {
        self.recorded.clone()
    }
}

impl OutputStream for MemorySink {
    fn name(&self) -> &str {
        &self.name
    }

    fn write(&mut self, samples: &[i16]) -> Result<(), StreamFault> {
        if self.closed {
            return Err(StreamFault::fatal("sink closed"));
        }
        let index = self.writes;
        self.writes += 1;

        if self.fatal_after == Some(index) {
            return Err(StreamFault::fatal("scripted sink failure"));
        }
        if self.transient_at.contains(&index) {
            return Err(StreamFault::Transient);
        }
        self.recorded.lock().push(samples.to_vec());
        Ok(())
    }

    fn close(&mut self) {
        self.closed = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_records_writes() {
        let mut sink = MemorySink::new("mem");
        sink.write(&[1, 2, 3]).unwrap();
        sink.write(&[4, 5, 6]).unwrap();

        let recorded = sink.recorded_handle();
        assert_eq!(*recorded.lock(), vec![vec![1, 2, 3], vec![4, 5, 6]]);
    }

    #[test]
    fn test_transient_drops_frame() {
        let mut sink = MemorySink::new("mem").with_transient_at(&[0]);
        assert!(matches!(sink.write(&[1]), Err(StreamFault::Transient)));
        sink.write(&[2]).unwrap();
        assert_eq!(*sink.recorded_handle().lock(), vec![vec![2]]);
    }

    #[test]
    fn test_fatal_after() {
        let mut sink = MemorySink::new("mem").with_fatal_after(1);
        sink.write(&[1]).unwrap();
        let err = sink.write(&[2]).unwrap_err();
        assert!(!err.is_transient());
    }

    #[test]
    fn test_write_after_close_fails() {
        let mut sink = MemorySink::new("mem");
        sink.close();
        assert!(sink.write(&[1]).is_err());
    }
}
