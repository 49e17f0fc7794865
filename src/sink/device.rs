//! CPAL-backed playback destination.

use std::sync::Arc;

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{BufferSize, SampleFormat, SampleRate, Stream, StreamConfig as CpalStreamConfig};
use parking_lot::Mutex;
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::HeapRb;

use crate::sink::OutputStream;
use crate::{DeviceInfo, PipelineError, StreamFault, CHANNELS, FRAME_SIZE, SAMPLE_RATE};

/// Ring depth for the low-latency profile, in frames.
const LOW_LATENCY_FRAMES: usize = 4;
/// Ring depth for the high-latency profile, in frames. Virtual/loopback
/// devices pull on their own clock and need the extra headroom.
const HIGH_LATENCY_FRAMES: usize = 16;

/// A playback stream over a real output device.
///
/// `write` pushes one frame into the destination's private ring; the CPAL
/// callback drains it on the device's clock, substituting silence on
/// underrun. A full ring (the device is not keeping up) is a
/// [`StreamFault::Transient`]; device loss reported through the CPAL
/// error callback is fatal.
pub struct DeviceSink {
    name: String,
    producer: ringbuf::HeapProd<i16>,
    stream: Option<Stream>,
    fatal: Arc<Mutex<Option<String>>>,
}

impl DeviceSink {
    /// Opens and starts a playback stream on `device` at the pipeline
    /// format, sized for the requested latency profile.
    ///
    /// # Errors
    ///
    /// [`PipelineError::DeviceUnavailable`] if the device rejects the
    /// format or the stream cannot be built or started.
    pub fn open(
        device: &cpal::Device,
        info: &DeviceInfo,
        high_latency: bool,
    ) -> Result<Self, PipelineError> {
        let name = device.name().unwrap_or_else(|_| "unknown".to_string());
        let sample_format = playback_format(device, &name)?;

        let frames = if high_latency {
            HIGH_LATENCY_FRAMES
        } else {
            LOW_LATENCY_FRAMES
        };
        let ring = HeapRb::<i16>::new(frames * FRAME_SIZE);
        let (mut producer, consumer) = ring.split();

        // Prime half the ring with silence so the callback has headroom
        // before the first frame lands.
        for _ in 0..(frames / 2) * FRAME_SIZE {
            let _ = producer.try_push(0);
        }

        let fatal: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));

        let config = CpalStreamConfig {
            channels: CHANNELS,
            sample_rate: SampleRate(SAMPLE_RATE),
            buffer_size: BufferSize::Default,
        };

        let stream = match sample_format {
            SampleFormat::I16 => build_i16_stream(device, &config, consumer, fatal.clone()),
            SampleFormat::F32 => build_f32_stream(device, &config, consumer, fatal.clone()),
            format => Err(PipelineError::DeviceUnavailable {
                name: name.clone(),
                reason: format!("unsupported sample format {format:?}"),
            }),
        }?;

        stream.play().map_err(|e| PipelineError::DeviceUnavailable {
            name: name.clone(),
            reason: e.to_string(),
        })?;

        let latency = if high_latency {
            info.default_high_latency
        } else {
            info.default_low_latency
        };
        tracing::info!(
            device = %name,
            latency_ms = latency.as_secs_f64() * 1000.0,
            profile = if high_latency { "high" } else { "low" },
            "opened output stream"
        );

        Ok(Self {
            name,
            producer,
            stream: Some(stream),
            fatal,
        })
    }
}

impl OutputStream for DeviceSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn write(&mut self, samples: &[i16]) -> Result<(), StreamFault> {
        if self.stream.is_none() {
            return Err(StreamFault::fatal("playback stream closed"));
        }
        if let Some(reason) = self.fatal.lock().take() {
            return Err(StreamFault::Fatal { reason });
        }
        if self.producer.vacant_len() < samples.len() {
            // The device is not draining; drop this frame for this
            // destination only.
            return Err(StreamFault::Transient);
        }
        self.producer.push_slice(samples);
        Ok(())
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            drop(stream);
            tracing::debug!(device = %self.name, "closed output stream");
        }
    }
}

fn playback_format(device: &cpal::Device, name: &str) -> Result<SampleFormat, PipelineError> {
    let configs = device
        .supported_output_configs()
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
        reason: format!("no {SAMPLE_RATE} Hz playback configuration"),
    })
}

fn build_i16_stream(
    device: &cpal::Device,
    config: &CpalStreamConfig,
    mut consumer: ringbuf::HeapCons<i16>,
    fatal: Arc<Mutex<Option<String>>>,
) -> Result<Stream, PipelineError> {
    device
        .build_output_stream(
            config,
            move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                let popped = consumer.pop_slice(data);
                // Underrun on the device side: pad with silence.
                data[popped..].fill(0);
            },
            move |err| {
                *fatal.lock() = Some(err.to_string());
            },
            None,
        )
        .map_err(|e| open_failed(device, e))
}

fn build_f32_stream(
    device: &cpal::Device,
    config: &CpalStreamConfig,
    mut consumer: ringbuf::HeapCons<i16>,
    fatal: Arc<Mutex<Option<String>>>,
) -> Result<Stream, PipelineError> {
    device
        .build_output_stream(
            config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                for slot in data.iter_mut() {
                    *slot = consumer.try_pop().map_or(0.0, |s| f32::from(s) / 32768.0);
                }
            },
            move |err| {
                *fatal.lock() = Some(err.to_string());
            },
            None,
        )
        .map_err(|e| open_failed(device, e))
}

fn open_failed(device: &cpal::Device, err: cpal::BuildStreamError) -> PipelineError {
    PipelineError::DeviceUnavailable {
        name: device.name().unwrap_or_else(|_| "unknown".to_string()),
        reason: err.to_string(),
    }
}
