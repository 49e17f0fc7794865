//! Command-line front end: microphone in, denoised audio out.

use std::io::BufRead;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;

use clearvox::backend::CpalBackend;
use clearvox::sink::OutputSpec;
use clearvox::{
    event_callback, list_input_devices, list_output_devices, DenoiseAdapter, DeviceSelector,
    Pipeline, PipelineEvent, RnnoiseSuppressor,
};

#[derive(Parser, Debug)]
#[command(name = "clearvox", about = "Real-time noise suppression for voice audio")]
struct Args {
    /// List available audio devices and exit.
    #[arg(long)]
    list_devices: bool,

    /// Output device to stream denoised audio to (substring match, e.g. a
    /// virtual loopback device). Defaults to the system output.
    #[arg(long)]
    device: Option<String>,

    /// Additional output device for monitoring the denoised signal live.
    #[arg(long)]
    monitor_device: Option<String>,

    /// Input device to capture from. Defaults to the system microphone.
    #[arg(long)]
    input_device: Option<String>,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "clearvox=info".into()),
        )
        .init();

    let args = Args::parse();

    if args.list_devices {
        return print_devices();
    }

    let mut outputs = Vec::new();
    if let Some(name) = args.device {
        // Virtual loopback devices chronically underrun at low latency.
        outputs.push(OutputSpec::new(DeviceSelector::Name(name)).high_latency());
    }
    if let Some(name) = args.monitor_device {
        outputs.push(OutputSpec::new(DeviceSelector::Name(name)));
    }

    let input = match args.input_device {
        Some(name) => DeviceSelector::Name(name),
        None => DeviceSelector::Default,
    };

    let adapter = DenoiseAdapter::new(Box::new(RnnoiseSuppressor::new()));
    let pipeline = Pipeline::new(Arc::new(CpalBackend::new()), adapter)
        .with_event_callback(event_callback(|event| match event {
            PipelineEvent::Running => eprintln!("streaming (press 't' to toggle, 'q' to quit)"),
            PipelineEvent::Stopped => eprintln!("stopped"),
            PipelineEvent::Error { reason } => eprintln!("pipeline error: {reason}"),
            PipelineEvent::SinkDegraded { sink_name, reason } => {
                eprintln!("output '{sink_name}' dropped: {reason}");
            }
        }));

    pipeline
        .start(input, &outputs)
        .context("failed to start the audio pipeline")?;

    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let line = line.context("failed to read stdin")?;
        match line.trim() {
            "t" => {
                let enabled = pipeline.toggle();
                eprintln!(
                    "noise suppression {}",
                    if enabled { "enabled" } else { "disabled" }
                );
            }
            "q" => break,
            "" => {}
            other => eprintln!("unknown command '{other}' (use 't' or 'q')"),
        }
        if !pipeline.is_running() {
            break;
        }
    }

    let stats = pipeline.stats();
    pipeline.terminate();
    eprintln!(
        "pumped {} frames ({} capture overruns, {} playback glitches)",
        stats.frames_pumped, stats.capture_overruns, stats.sink_transient_faults
    );
    Ok(())
}

fn print_devices() -> anyhow::Result<()> {
    println!("Input devices:");
    for (i, device) in list_input_devices()?.iter().enumerate() {
        println!("  [{i}] {}", device.name);
    }
    println!("Output devices:");
    for (i, device) in list_output_devices()?.iter().enumerate() {
        println!("  [{i}] {}", device.name);
    }
    Ok(())
}
