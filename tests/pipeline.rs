//! End-to-end pipeline tests over the scripted backend. No audio
//! hardware is involved; capture is scripted and playback records into
//! memory.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use clearvox::backend::MockBackend;
use clearvox::sink::OutputSpec;
use clearvox::source::ScriptStep;
use clearvox::{
    event_callback, DenoiseAdapter, DeviceSelector, Frame, NoiseSuppressor, Pipeline,
    PipelineError, PipelineEvent, PipelineState,
};

/// A suppressor with a trivially recognizable output: every frame it
/// touches becomes silence.
struct ZeroSuppressor;

impl NoiseSuppressor for ZeroSuppressor {
    fn process(&mut self, frame: &[i16]) -> Vec<i16> {
        vec![0; frame.len()]
    }
}

fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    cond()
}

fn collecting_events() -> (clearvox::EventCallback, Arc<Mutex<Vec<PipelineEvent>>>) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    (event_callback(move |event| sink.lock().push(event)), events)
}

#[test]
fn test_denoised_stream_reaches_every_output_with_mid_stream_toggle() {
    // 100 frames with distinct fill values, two playback destinations.
    // Suppression starts off and is switched on at frame 50, so the
    // recordings must show the raw values for 0..50 and silence after.
    let frames: Vec<Frame> = (0..100)
        .map(|i| Frame::filled(((i * 100) % 32768) as i16))
        .collect();

    let adapter = DenoiseAdapter::new(Box::new(ZeroSuppressor));
    adapter.set_enabled(false);
    let toggle_handle = adapter.clone();

    let backend = Arc::new(
        MockBackend::new()
            .with_input("Mock Mic")
            .with_output("Speakers")
            .with_output("Virtual Mic")
            .with_frames(frames)
            .on_frame(Arc::new(move |index| {
                if index == 50 {
                    toggle_handle.set_enabled(true);
                }
            })),
    );

    let pipeline = Pipeline::new(backend.clone(), adapter);
    pipeline
        .start(
            DeviceSelector::Default,
            &[
                OutputSpec::new(DeviceSelector::Name("Speakers".into())),
                OutputSpec::new(DeviceSelector::Name("Virtual Mic".into())).high_latency(),
            ],
        )
        .unwrap();
    assert_eq!(pipeline.state(), PipelineState::Running);

    assert!(wait_until(Duration::from_secs(5), || {
        backend.recorded_len("Speakers") >= 100 && backend.recorded_len("Virtual Mic") >= 100
    }));
    pipeline.stop();
    assert_eq!(pipeline.state(), PipelineState::Stopped);

    for output in ["Speakers", "Virtual Mic"] {
        let recorded = backend.recorded(output);
        for (i, samples) in recorded.iter().take(100).enumerate() {
            let expected = if i < 50 { ((i * 100) % 32768) as i16 } else { 0 };
            assert!(
                samples.iter().all(|&s| s == expected),
                "{output} frame {i}: expected every sample to be {expected}"
            );
        }
    }

    assert!(pipeline.stats().frames_pumped >= 100);
}

#[test]
fn test_empty_output_list_uses_default_output() {
    let backend = Arc::new(
        MockBackend::new()
            .with_input("Mock Mic")
            .with_output("Speakers")
            .with_frames(vec![Frame::filled(7); 5]),
    );
    let adapter = DenoiseAdapter::new(Box::new(ZeroSuppressor));
    adapter.set_enabled(false);

    let pipeline = Pipeline::new(backend.clone(), adapter);
    pipeline.start(DeviceSelector::Default, &[]).unwrap();

    assert!(wait_until(Duration::from_secs(2), || {
        backend.recorded_len("Speakers") >= 5
    }));
    pipeline.stop();

    let recorded = backend.recorded("Speakers");
    assert!(recorded[..5]
        .iter()
        .all(|frame| frame.iter().all(|&s| s == 7)));
}

#[test]
fn test_start_while_running_is_rejected() {
    let backend = Arc::new(MockBackend::new().with_input("Mic").with_output("Out"));
    let pipeline = Pipeline::new(backend, DenoiseAdapter::new(Box::new(ZeroSuppressor)));

    pipeline.start(DeviceSelector::Default, &[]).unwrap();
    let err = pipeline.start(DeviceSelector::Default, &[]).unwrap_err();
    assert!(matches!(err, PipelineError::AlreadyRunning));
    pipeline.stop();
}

#[test]
fn test_stop_is_idempotent() {
    let backend = Arc::new(MockBackend::new().with_input("Mic").with_output("Out"));
    let (callback, events) = collecting_events();
    let pipeline = Pipeline::new(backend, DenoiseAdapter::new(Box::new(ZeroSuppressor)))
        .with_event_callback(callback);

    // Stopping a pipeline that never started is a no-op.
    pipeline.stop();
    assert!(events.lock().is_empty());

    pipeline.start(DeviceSelector::Default, &[]).unwrap();
    pipeline.stop();
    pipeline.stop();
    assert_eq!(pipeline.state(), PipelineState::Stopped);

    let stopped = events
        .lock()
        .iter()
        .filter(|e| matches!(e, PipelineEvent::Stopped))
        .count();
    assert_eq!(stopped, 1);
}

#[test]
fn test_terminate_is_terminal() {
    let backend = Arc::new(MockBackend::new().with_input("Mic").with_output("Out"));
    let pipeline = Pipeline::new(backend, DenoiseAdapter::new(Box::new(ZeroSuppressor)));

    pipeline.start(DeviceSelector::Default, &[]).unwrap();
    pipeline.terminate();
    assert_eq!(pipeline.state(), PipelineState::Stopped);

    let err = pipeline.start(DeviceSelector::Default, &[]).unwrap_err();
    assert!(matches!(err, PipelineError::Terminated));

    // Terminating again is harmless.
    pipeline.terminate();
}

#[test]
fn test_fatal_capture_fault_enters_error_state_until_acknowledged() {
    let backend = Arc::new(
        MockBackend::new()
            .with_input("Mic")
            .with_output("Out")
            .with_script(vec![
                ScriptStep::Frame(Frame::filled(1)),
                ScriptStep::Fault("microphone unplugged".to_string()),
            ]),
    );
    let (callback, events) = collecting_events();
    let pipeline = Pipeline::new(backend, DenoiseAdapter::new(Box::new(ZeroSuppressor)))
        .with_event_callback(callback);

    pipeline.start(DeviceSelector::Default, &[]).unwrap();
    assert!(wait_until(Duration::from_secs(2), || {
        pipeline.state() == PipelineState::Error
    }));

    assert!(events.lock().iter().any(|e| matches!(
        e,
        PipelineEvent::Error { reason } if reason == "microphone unplugged"
    )));

    // The error state refuses a restart until stop() acknowledges it.
    let err = pipeline.start(DeviceSelector::Default, &[]).unwrap_err();
    assert!(matches!(err, PipelineError::Faulted));

    pipeline.stop();
    assert_eq!(pipeline.state(), PipelineState::Stopped);

    // Acknowledged, the pipeline restarts normally.
    pipeline.start(DeviceSelector::Default, &[]).unwrap();
    assert_eq!(pipeline.state(), PipelineState::Running);
    pipeline.stop();
}

#[test]
fn test_fault_on_the_first_frame_reaches_error_state() {
    // The source opens fine and then faults immediately, before the
    // control thread has necessarily returned from start(). The fault
    // must still land the pipeline in Error, never be masked by the
    // Running transition, and the events must arrive in order.
    let backend = Arc::new(
        MockBackend::new()
            .with_input("Mic")
            .with_output("Out")
            .with_script(vec![ScriptStep::Fault("cable yanked".to_string())]),
    );
    let (callback, events) = collecting_events();
    let pipeline = Pipeline::new(backend, DenoiseAdapter::new(Box::new(ZeroSuppressor)))
        .with_event_callback(callback);

    pipeline.start(DeviceSelector::Default, &[]).unwrap();
    assert!(wait_until(Duration::from_secs(2), || {
        pipeline.state() == PipelineState::Error
    }));

    let names: Vec<&str> = events
        .lock()
        .iter()
        .map(|e| match e {
            PipelineEvent::Running => "running",
            PipelineEvent::Error { .. } => "error",
            _ => "other",
        })
        .collect();
    assert_eq!(names, vec!["running", "error"]);

    pipeline.stop();
    assert_eq!(pipeline.state(), PipelineState::Stopped);
}

#[test]
fn test_unopenable_output_rolls_back_the_whole_start() {
    let backend = Arc::new(
        MockBackend::new()
            .with_input("Mic")
            .with_output("Good")
            .with_unopenable_output("Broken"),
    );
    let (callback, events) = collecting_events();
    let pipeline = Pipeline::new(backend.clone(), DenoiseAdapter::new(Box::new(ZeroSuppressor)))
        .with_event_callback(callback);

    let err = pipeline
        .start(
            DeviceSelector::Default,
            &[
                OutputSpec::new(DeviceSelector::Name("Good".into())),
                OutputSpec::new(DeviceSelector::Name("Broken".into())),
            ],
        )
        .unwrap_err();

    assert!(matches!(err, PipelineError::DeviceUnavailable { ref name, .. } if name == "Broken"));
    assert_eq!(pipeline.state(), PipelineState::Stopped);
    assert_eq!(backend.recorded_len("Good"), 0);
    assert!(events.lock().is_empty());
}

#[test]
fn test_unknown_device_fails_start() {
    let backend = Arc::new(MockBackend::new().with_input("Mic").with_output("Out"));
    let pipeline = Pipeline::new(backend, DenoiseAdapter::new(Box::new(ZeroSuppressor)));

    let err = pipeline
        .start(
            DeviceSelector::Default,
            &[OutputSpec::new(DeviceSelector::Name("no such device".into()))],
        )
        .unwrap_err();
    assert!(matches!(err, PipelineError::DeviceNotFound { .. }));
    assert_eq!(pipeline.state(), PipelineState::Stopped);
}

#[test]
fn test_degraded_output_does_not_stall_the_rest() {
    let backend = Arc::new(
        MockBackend::new()
            .with_input("Mic")
            .with_output("Flaky")
            .with_output("Steady")
            .with_sink_fatal_after("Flaky", 2)
            .with_frames((0..10).map(|i| Frame::filled(i + 1)).collect()),
    );
    let (callback, events) = collecting_events();
    let adapter = DenoiseAdapter::new(Box::new(ZeroSuppressor));
    adapter.set_enabled(false);
    let pipeline = Pipeline::new(backend.clone(), adapter).with_event_callback(callback);

    pipeline
        .start(
            DeviceSelector::Default,
            &[
                OutputSpec::new(DeviceSelector::Name("Flaky".into())),
                OutputSpec::new(DeviceSelector::Name("Steady".into())),
            ],
        )
        .unwrap();

    assert!(wait_until(Duration::from_secs(2), || {
        backend.recorded_len("Steady") >= 10
    }));
    pipeline.stop();

    // The failing destination dropped out; the run itself kept going.
    assert_eq!(pipeline.state(), PipelineState::Stopped);
    assert!(events.lock().iter().any(|e| matches!(
        e,
        PipelineEvent::SinkDegraded { sink_name, .. } if sink_name == "Flaky"
    )));

    let steady = backend.recorded("Steady");
    for (i, samples) in steady.iter().take(10).enumerate() {
        assert!(samples.iter().all(|&s| s == (i as i16 + 1)));
    }
    assert_eq!(backend.recorded_len("Flaky"), 2);
}

#[test]
fn test_capture_overrun_still_delivers_the_frame() {
    let backend = Arc::new(
        MockBackend::new()
            .with_input("Mic")
            .with_output("Out")
            .with_script(vec![
                ScriptStep::Frame(Frame::filled(1)),
                ScriptStep::Overrun(Frame::filled(2)),
                ScriptStep::Frame(Frame::filled(3)),
            ]),
    );
    let adapter = DenoiseAdapter::new(Box::new(ZeroSuppressor));
    adapter.set_enabled(false);
    let pipeline = Pipeline::new(backend.clone(), adapter);

    pipeline.start(DeviceSelector::Default, &[]).unwrap();
    assert!(wait_until(Duration::from_secs(2), || {
        backend.recorded_len("Out") >= 3
    }));
    pipeline.stop();

    assert_eq!(pipeline.stats().capture_overruns, 1);
    let recorded = backend.recorded("Out");
    for (i, samples) in recorded.iter().take(3).enumerate() {
        assert!(samples.iter().all(|&s| s == (i as i16 + 1)));
    }
}

#[test]
fn test_toggle_works_in_any_state() {
    let backend = Arc::new(MockBackend::new().with_input("Mic").with_output("Out"));
    let pipeline = Pipeline::new(backend, DenoiseAdapter::new(Box::new(ZeroSuppressor)));

    // Stopped: toggling is legal and takes effect.
    assert!(pipeline.is_enabled());
    assert!(!pipeline.toggle());
    assert!(pipeline.toggle());

    pipeline.start(DeviceSelector::Default, &[]).unwrap();
    assert!(!pipeline.toggle());
    assert!(!pipeline.is_enabled());
    pipeline.stop();
    assert!(!pipeline.is_enabled());
}

#[test]
fn test_lifecycle_events_in_order() {
    let backend = Arc::new(MockBackend::new().with_input("Mic").with_output("Out"));
    let (callback, events) = collecting_events();
    let pipeline = Pipeline::new(backend, DenoiseAdapter::new(Box::new(ZeroSuppressor)))
        .with_event_callback(callback);

    pipeline.start(DeviceSelector::Default, &[]).unwrap();
    pipeline.stop();

    let names: Vec<&str> = events
        .lock()
        .iter()
        .map(|e| match e {
            PipelineEvent::Running => "running",
            PipelineEvent::Stopped => "stopped",
            PipelineEvent::Error { .. } => "error",
            PipelineEvent::SinkDegraded { .. } => "degraded",
        })
        .collect();
    assert_eq!(names, vec!["running", "stopped"]);
}

#[test]
fn test_stats_accumulate_across_restarts() {
    // One transient per run on the second write. The lifetime counter
    // keeps growing across stop/start cycles; it never resets to the
    // current run's count.
    let backend = Arc::new(
        MockBackend::new()
            .with_input("Mic")
            .with_output("Out")
            .with_sink_transient_at("Out", &[1])
            .with_frames(vec![Frame::filled(1); 3]),
    );
    let adapter = DenoiseAdapter::new(Box::new(ZeroSuppressor));
    adapter.set_enabled(false);
    let pipeline = Pipeline::new(backend, adapter);

    pipeline.start(DeviceSelector::Default, &[]).unwrap();
    assert!(wait_until(Duration::from_secs(2), || {
        pipeline.stats().sink_transient_faults >= 1
    }));
    pipeline.stop();
    let first_run = pipeline.stats();
    assert_eq!(first_run.sink_transient_faults, 1);

    pipeline.start(DeviceSelector::Default, &[]).unwrap();
    assert!(wait_until(Duration::from_secs(2), || {
        pipeline.stats().sink_transient_faults >= 2
    }));
    pipeline.stop();

    let second_run = pipeline.stats();
    assert_eq!(second_run.sink_transient_faults, 2);
    assert!(second_run.frames_pumped > first_run.frames_pumped);
}

#[test]
fn test_many_start_stop_cycles() {
    let backend = Arc::new(MockBackend::new().with_input("Mic").with_output("Out"));
    let pipeline = Pipeline::new(backend, DenoiseAdapter::new(Box::new(ZeroSuppressor)));

    for _ in 0..5 {
        pipeline.start(DeviceSelector::Default, &[]).unwrap();
        assert_eq!(pipeline.state(), PipelineState::Running);
        pipeline.stop();
        assert_eq!(pipeline.state(), PipelineState::Stopped);
    }
}
