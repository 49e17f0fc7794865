//! Real-time noise suppression pipeline for voice audio.
//!
//! `clearvox` captures mono 48 kHz voice audio from a microphone, runs
//! each 10 ms frame through an RNNoise-based suppressor, and fans the
//! cleaned audio out to one or more playback destinations. Point one of
//! the destinations at a virtual loopback device and any conferencing
//! app can use the cleaned signal as its microphone.
//!
//! # Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use clearvox::backend::CpalBackend;
//! use clearvox::sink::OutputSpec;
//! use clearvox::{DenoiseAdapter, DeviceSelector, Pipeline, RnnoiseSuppressor};
//!
//! let adapter = DenoiseAdapter::new(Box::new(RnnoiseSuppressor::new()));
//! let pipeline = Pipeline::new(Arc::new(CpalBackend::new()), adapter);
//!
//! pipeline.start(DeviceSelector::Default, &[])?;
//! pipeline.toggle(); // bypass suppression, keep streaming
//! pipeline.stop();
//! # Ok::<(), clearvox::PipelineError>(())
//! ```
//!
//! The whole pipeline also runs against [`backend::MockBackend`] with
//! scripted capture and recording playback, so integration tests (and
//! headless CI) never need a sound card.

#![warn(missing_docs)]

mod catalog;
mod denoise;
mod error;
mod event;
mod frame;
mod pipeline;

pub mod backend;
pub mod sink;
pub mod source;

pub use catalog::{
    list_input_devices, list_output_devices, DeviceCatalog, DeviceInfo, DeviceSelector,
};
pub use denoise::{DenoiseAdapter, NoiseSuppressor, RnnoiseSuppressor};
pub use error::{PipelineError, StreamFault};
pub use event::{event_callback, EventCallback, PipelineEvent};
pub use frame::{Frame, CHANNELS, FRAME_DURATION, FRAME_SIZE, SAMPLE_RATE};
pub use pipeline::{Pipeline, PipelineState, PipelineStats};
