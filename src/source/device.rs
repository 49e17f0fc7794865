//! CPAL-backed microphone source.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{BufferSize, SampleFormat, SampleRate, Stream, StreamConfig as CpalStreamConfig};
use parking_lot::Mutex;
use ringbuf::traits::{Consumer, Producer, Split};
use ringbuf::HeapRb;

use crate::source::{Captured, FrameSource};
use crate::{Frame, PipelineError, StreamFault, CHANNELS, FRAME_SIZE, SAMPLE_RATE};

/// Symmetric i16 max for f32 conversion (avoids asymmetric clipping).
const I16_MAX_SYMMETRIC: f32 = i16::MAX as f32;

/// Capture ring capacity: 250ms of audio. The pump drains it every 10ms;
/// anything slower than that for a quarter second is an overrun.
const RING_CAPACITY: usize = SAMPLE_RATE as usize / 4;

/// How long to park between polls while waiting for a full frame.
const READ_POLL: Duration = Duration::from_millis(1);

/// A capture stream over a real input device.
///
/// The CPAL callback pushes samples into a lock-free ring; `read_frame`
/// pops exactly one frame's worth, parking briefly while the ring is
/// short. Overruns in the callback (ring full) are counted and reported
/// on the next read as [`Captured::AfterOverrun`]. Device loss reported
/// through the CPAL error callback surfaces as [`StreamFault::Fatal`].
pub struct DeviceSource {
    name: String,
    consumer: ringbuf::HeapCons<i16>,
    stream: Option<Stream>,
    overruns: Arc<AtomicU64>,
    seen_overruns: u64,
    fatal: Arc<Mutex<Option<String>>>,
}

impl DeviceSource {
    /// Opens and starts a capture stream on `device` at the pipeline
    /// format (48 kHz mono i16; f32 devices are converted inline).
    ///
    /// # Errors
    ///
    /// [`PipelineError::DeviceUnavailable`] if the device rejects the
    /// format or the stream cannot be built or started.
    pub fn open(device: &cpal::Device) -> Result<Self, PipelineError> {
        let name = device.name().unwrap_or_else(|_| "unknown".to_string());
        let sample_format = capture_format(device, &name)?;

        let ring = HeapRb::<i16>::new(RING_CAPACITY);
        let (producer, consumer) = ring.split();

        let overruns = Arc::new(AtomicU64::new(0));
        let fatal: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));

        let config = CpalStreamConfig {
            channels: CHANNELS,
            sample_rate: SampleRate(SAMPLE_RATE),
            buffer_size: BufferSize::Default,
        };

        let stream = match sample_format {
            SampleFormat::I16 => {
                build_i16_stream(device, &config, producer, overruns.clone(), fatal.clone())
            }
            SampleFormat::F32 => {
                build_f32_stream(device, &config, producer, overruns.clone(), fatal.clone())
            }
            format => Err(PipelineError::DeviceUnavailable {
                name: name.clone(),
                reason: format!("unsupported sample format {format:?}"),
            }),
        }?;

        stream.play().map_err(|e| PipelineError::DeviceUnavailable {
            name: name.clone(),
            reason: e.to_string(),
        })?;

        tracing::info!(device = %name, "opened capture stream");

        Ok(Self {
            name,
            consumer,
            stream: Some(stream),
            overruns,
            seen_overruns: 0,
            fatal,
        })
    }

    fn take_fatal(&self) -> Option<String> {
        self.fatal.lock().take()
    }
}

impl FrameSource for DeviceSource {
    fn read_frame(&mut self) -> Result<Captured, StreamFault> {
        if self.stream.is_none() {
            return Err(StreamFault::fatal("capture stream closed"));
        }

        let mut frame = Frame::silence();
        let mut filled = 0;
        while filled < FRAME_SIZE {
            filled += self.consumer.pop_slice(&mut frame.samples_mut()[filled..]);
            if filled < FRAME_SIZE {
                if let Some(reason) = self.take_fatal() {
                    tracing::error!(device = %self.name, %reason, "capture stream lost");
                    self.close();
                    return Err(StreamFault::Fatal { reason });
                }
                std::thread::sleep(READ_POLL);
            }
        }

        let overruns = self.overruns.load(Ordering::Relaxed);
        if overruns != self.seen_overruns {
            self.seen_overruns = overruns;
            return Ok(Captured::AfterOverrun(frame));
        }
        Ok(Captured::Clean(frame))
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            drop(stream);
            tracing::debug!(device = %self.name, "closed capture stream");
        }
    }
}

fn capture_format(device: &cpal::Device, name: &str) -> Result<SampleFormat, PipelineError> {
    let configs = device
        .supported_input_configs()
        .map_err(|e| PipelineError::DeviceUnavailable {
            name: name.to_string(),
            reason: e.to_string(),
        })?;

    let mut fallback = None;
    for range in configs {
        let rate_ok = range.min_sample_rate().0 <= SAMPLE_RATE
            && SAMPLE_RATE <= range.max_sample_rate().0;
        if !rate_ok {
            continue;
        }
        match range.sample_format() {
            SampleFormat::I16 => return Ok(SampleFormat::I16),
            SampleFormat::F32 => fallback = Some(SampleFormat::F32),
            _ => {}
        }
    }

    fallback.ok_or_else(|| PipelineError::DeviceUnavailable {
        name: name.to_string(),
        reason: format!("no {SAMPLE_RATE} Hz capture configuration"),
    })
}

fn build_i16_stream(
    device: &cpal::Device,
    config: &CpalStreamConfig,
    mut producer: ringbuf::HeapProd<i16>,
    overruns: Arc<AtomicU64>,
    fatal: Arc<Mutex<Option<String>>>,
) -> Result<Stream, PipelineError> {
    device
        .build_input_stream(
            config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                let pushed = producer.push_slice(data);
                if pushed < data.len() {
                    overruns.fetch_add(1, Ordering::Relaxed);
                }
            },
            move |err| {
                *fatal.lock() = Some(err.to_string());
            },
            None,
        )
        .map_err(|e| backend_unavailable(device, e))
}

fn build_f32_stream(
    device: &cpal::Device,
    config: &CpalStreamConfig,
    mut producer: ringbuf::HeapProd<i16>,
    overruns: Arc<AtomicU64>,
    fatal: Arc<Mutex<Option<String>>>,
) -> Result<Stream, PipelineError> {
    device
        .build_input_stream(
            config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                let mut overran = false;
                for &sample in data {
                    let converted = (sample * I16_MAX_SYMMETRIC)
                        .clamp(f32::from(i16::MIN), f32::from(i16::MAX))
                        as i16;
                    if producer.try_push(converted).is_err() {
                        overran = true;
                    }
                }
                if overran {
                    overruns.fetch_add(1, Ordering::Relaxed);
                }
            },
            move |err| {
                *fatal.lock() = Some(err.to_string());
            },
            None,
        )
        .map_err(|e| backend_unavailable(device, e))
}

fn backend_unavailable(device: &cpal::Device, err: cpal::BuildStreamError) -> PipelineError {
    PipelineError::DeviceUnavailable {
        name: device.name().unwrap_or_else(|_| "unknown".to_string()),
        reason: err.to_string(),
    }
}
