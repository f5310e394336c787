use std::sync::{Arc, Mutex};

use anyhow::Result;

use superres::error::Result as CoreResult;
use superres::ingest::Y4mSource;
use superres::sink::Y4mSink;
use superres::{
    open_output, open_source, CancelToken, ComputeBackend, Driver, Frame, FrameSink, FrameSource,
    MotionEstimator, MotionEstimatorKind, MotionField, OutputOptions, PreviewSink, SinkSet,
    SourceOptions, SuperResConfig, SuperResError, SuperResolution,
};

#[derive(Default, Clone)]
struct Collected(Arc<Mutex<Vec<Frame>>>);

struct CollectingSink {
    frames: Collected,
    fail_after: Option<usize>,
}

impl FrameSink for CollectingSink {
    fn name(&self) -> String {
        "collect".to_string()
    }

    fn write(&mut self, frame: &Frame) -> Result<()> {
        let mut frames = self.frames.0.lock().unwrap();
        if self.fail_after == Some(frames.len()) {
            anyhow::bail!("device unplugged");
        }
        frames.push(frame.clone());
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

fn collecting_set(fail_after: Option<usize>) -> (SinkSet, Collected) {
    let frames = Collected::default();
    let mut set = SinkSet::new();
    set.push(Box::new(CollectingSink {
        frames: frames.clone(),
        fail_after,
    }));
    (set, frames)
}

fn engine(scale: usize, radius: usize, flow: MotionEstimatorKind) -> SuperResolution {
    let config = SuperResConfig {
        scale,
        iterations: 3,
        temporal_radius: radius,
        flow,
        ..SuperResConfig::default()
    };
    SuperResolution::new(config, &superres::DeviceCapabilities::cpu_only()).unwrap()
}

/// Fails for one source frame, zero motion otherwise.
struct FailingFlow {
    fail_on: u64,
}

impl MotionEstimator for FailingFlow {
    fn name(&self) -> &'static str {
        "failing"
    }

    fn backend(&self) -> ComputeBackend {
        ComputeBackend::Cpu
    }

    fn estimate(&self, reference: &Frame, source: &Frame) -> CoreResult<MotionField> {
        if source.index() == self.fail_on {
            return Err(SuperResError::Estimation {
                reference_index: reference.index(),
                source_index: source.index(),
                reason: "no texture".to_string(),
            });
        }
        Ok(MotionField::zeros(source.dims()))
    }
}

/// Skips one index to simulate a dropped frame.
struct GappedSource {
    inner: Box<dyn FrameSource>,
    skip: u64,
}

impl FrameSource for GappedSource {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        let next = self.inner.next_frame()?;
        match next {
            Some(frame) if frame.index() == self.skip => self.inner.next_frame(),
            other => Ok(other),
        }
    }

    fn describe(&self) -> String {
        format!("gapped {}", self.inner.describe())
    }

    fn frames_read(&self) -> u64 {
        self.inner.frames_read()
    }
}

#[test]
fn every_input_frame_yields_one_scaled_output() -> Result<()> {
    let mut source = open_source(
        "stub://grid?frames=6&width=16&height=12&dx=0.5&dy=0.25",
        &SourceOptions::default(),
    )?;
    let (mut sinks, collected) = collecting_set(None);
    let mut driver = Driver::new(engine(2, 1, MotionEstimatorKind::Simple), CancelToken::new());

    let summary = driver.run(source.as_mut(), &mut sinks)?;

    assert_eq!(summary.frames_in, 6);
    assert_eq!(summary.frames_out, 6);
    let frames = collected.0.lock().unwrap();
    let indices: Vec<u64> = frames.iter().map(|f| f.index()).collect();
    assert_eq!(indices, vec![0, 1, 2, 3, 4, 5]);
    for frame in frames.iter() {
        assert_eq!(frame.dims(), (24, 32));
        assert_eq!(frame.channels(), 3);
    }
    Ok(())
}

#[test]
fn stream_shorter_than_radius_still_emits_every_frame() -> Result<()> {
    let mut source = open_source(
        "stub://short?frames=3&width=8&height=8&channels=1",
        &SourceOptions::default(),
    )?;
    let (mut sinks, collected) = collecting_set(None);
    let mut driver = Driver::new(
        engine(3, 8, MotionEstimatorKind::Farneback),
        CancelToken::new(),
    );
    let summary = driver.run(source.as_mut(), &mut sinks)?;
    assert_eq!(summary.frames_out, 3);
    let frames = collected.0.lock().unwrap();
    assert!(frames.iter().all(|f| f.dims() == (24, 24)));
    Ok(())
}

#[test]
fn dropped_frame_is_fatal_discontinuity() {
    let inner = open_source(
        "stub://grid?frames=6&width=8&height=8",
        &SourceOptions::default(),
    )
    .unwrap();
    let mut source = GappedSource { inner, skip: 3 };
    let (mut sinks, _) = collecting_set(None);
    let mut driver = Driver::new(engine(2, 1, MotionEstimatorKind::Simple), CancelToken::new());

    let err = driver.run(&mut source, &mut sinks).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<SuperResError>(),
        Some(SuperResError::StreamDiscontinuity {
            expected: 3,
            got: 4
        })
    ));
}

#[test]
fn failed_estimate_degrades_to_warnings() -> Result<()> {
    let config = SuperResConfig {
        scale: 2,
        iterations: 2,
        temporal_radius: 2,
        ..SuperResConfig::default()
    };
    let engine = SuperResolution::with_estimator(config, Box::new(FailingFlow { fail_on: 3 }))?;
    let mut source = open_source(
        "stub://grid?frames=6&width=8&height=8&channels=1",
        &SourceOptions::default(),
    )?;
    let (mut sinks, collected) = collecting_set(None);
    let mut driver = Driver::new(engine, CancelToken::new());

    let summary = driver.run(source.as_mut(), &mut sinks)?;

    assert_eq!(summary.frames_out, 6);
    assert_eq!(collected.0.lock().unwrap().len(), 6);
    // Frame 3 sits in the windows of references 1, 2, 4 and 5.
    assert_eq!(summary.warnings.len(), 4);
    assert!(summary
        .warnings
        .iter()
        .all(|w| w.starts_with("frame 3 excluded")));
    Ok(())
}

#[test]
fn file_sink_failure_falls_back_to_preview() -> Result<()> {
    let mut source = open_source(
        "stub://grid?frames=4&width=8&height=8&channels=1",
        &SourceOptions::default(),
    )?;
    let (mut sinks, collected) = collecting_set(Some(1));
    sinks.push(Box::new(PreviewSink::new(false)));
    let mut driver = Driver::new(engine(2, 1, MotionEstimatorKind::Simple), CancelToken::new());

    let summary = driver.run(source.as_mut(), &mut sinks)?;
    assert_eq!(summary.frames_out, 4);
    assert_eq!(collected.0.lock().unwrap().len(), 1);
    assert_eq!(sinks.names(), vec!["preview".to_string()]);
    Ok(())
}

#[test]
fn file_sink_failure_without_preview_is_fatal() {
    let mut source = open_source(
        "stub://grid?frames=4&width=8&height=8&channels=1",
        &SourceOptions::default(),
    )
    .unwrap();
    let (mut sinks, _) = collecting_set(Some(1));
    let mut driver = Driver::new(engine(2, 1, MotionEstimatorKind::Simple), CancelToken::new());

    let err = driver.run(source.as_mut(), &mut sinks).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<SuperResError>(),
        Some(SuperResError::Sink { .. })
    ));
}

#[test]
fn y4m_file_in_y4m_file_out() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let input = dir.path().join("input.y4m");
    let output = dir.path().join("output.y4m");

    let mut synthetic = open_source(
        "stub://clip?frames=5&width=12&height=8",
        &SourceOptions::default(),
    )?;
    let mut writer = Y4mSink::new(&input, 25);
    while let Some(frame) = synthetic.next_frame()? {
        writer.write(&frame)?;
    }
    writer.finish()?;

    let mut source = open_source(input.to_str().unwrap(), &SourceOptions::default())?;
    let mut sinks = SinkSet::new();
    sinks.push(open_output(&output, &OutputOptions::default())?);
    let mut driver = Driver::new(engine(2, 1, MotionEstimatorKind::Simple), CancelToken::new())
        .with_discard_first_frame(true);
    let summary = driver.run(source.as_mut(), &mut sinks)?;
    assert_eq!(summary.frames_in, 4);
    assert_eq!(summary.frames_out, 4);

    let mut result = Y4mSource::open(&output)?;
    let mut count = 0;
    while let Some(frame) = result.next_frame()? {
        assert_eq!(frame.dims(), (16, 24));
        assert_eq!(frame.channels(), 3);
        count += 1;
    }
    assert_eq!(count, 4);
    Ok(())
}

#[test]
fn stop_request_before_start_emits_nothing() -> Result<()> {
    let cancel = CancelToken::new();
    cancel.cancel();
    let mut source = open_source("stub://grid?frames=4", &SourceOptions::default())?;
    let (mut sinks, collected) = collecting_set(None);
    let mut driver = Driver::new(engine(2, 1, MotionEstimatorKind::Simple), cancel);
    let summary = driver.run(source.as_mut(), &mut sinks)?;
    assert!(summary.cancelled);
    assert_eq!(summary.frames_out, 0);
    assert!(collected.0.lock().unwrap().is_empty());
    Ok(())
}

#[test]
fn data_residual_never_increases_with_default_regulariser() -> Result<()> {
    for flow in [
        MotionEstimatorKind::Farneback,
        MotionEstimatorKind::Simple,
        MotionEstimatorKind::Tvl1,
    ] {
        let config = SuperResConfig {
            scale: 2,
            iterations: 5,
            temporal_radius: 1,
            flow,
            ..SuperResConfig::default()
        };
        let mut engine =
            SuperResolution::new(config, &superres::DeviceCapabilities::cpu_only())?;
        let mut source = open_source("stub://grid?frames=10", &SourceOptions::default())?;
        let cancel = CancelToken::new();

        let mut traces = Vec::new();
        while let Some(frame) = source.next_frame()? {
            engine.push(frame)?;
            while engine.is_ready() {
                if let Some(out) = engine.reconstruct(&cancel)? {
                    traces.push(out.residual_trace);
                }
            }
        }
        while engine.has_pending() {
            if let Some(out) = engine.reconstruct(&cancel)? {
                traces.push(out.residual_trace);
            }
        }

        assert_eq!(traces.len(), 10, "{}", flow.as_str());
        for trace in &traces {
            assert_eq!(trace.len(), 5);
            for pair in trace.windows(2) {
                assert!(
                    pair[1] <= pair[0] * (1.0 + 1e-5) + 1e-6,
                    "{}: {trace:?}",
                    flow.as_str()
                );
            }
        }
    }
    Ok(())
}
