//! Driver loop: source → engine → sinks.
//!
//! ```text
//! Starting --first frame--> Warming --window full--> Steady
//!     |                        |                         |
//!     +---------- source exhausted, frames pending ------+--> Draining --> Stopped
//! ```
//!
//! A stop request moves any state straight to `Stopped`. Sinks are finished
//! on every exit path so partial output stays readable.

use anyhow::{Context, Result};
use std::time::{Duration, Instant};

use crate::engine::SuperResolution;
use crate::frame::CancelToken;
use crate::ingest::FrameSource;
use crate::sink::SinkSet;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DriverState {
    Starting,
    /// The window has not reached `2r+1` frames yet. A stream shorter than
    /// that never leaves this state before draining.
    Warming,
    /// One output per input.
    Steady,
    /// Source exhausted; emitting what is still buffered.
    Draining,
    Stopped,
}

/// What a run did.
#[derive(Clone, Debug)]
pub struct RunSummary {
    pub frames_in: u64,
    pub frames_out: u64,
    /// Outputs emitted while the driver was `Steady`.
    pub steady_outputs: u64,
    pub warnings: Vec<String>,
    pub final_state: DriverState,
    /// Reconstruction wall-clock time per output, in emission order.
    pub latencies: Vec<Duration>,
    pub cancelled: bool,
}

impl RunSummary {
    pub fn mean_latency(&self) -> Option<Duration> {
        let count = u32::try_from(self.latencies.len()).ok().filter(|n| *n > 0)?;
        Some(self.latencies.iter().sum::<Duration>() / count)
    }
}

pub struct Driver {
    engine: SuperResolution,
    cancel: CancelToken,
    discard_first_frame: bool,
    state: DriverState,
}

impl Driver {
    pub fn new(engine: SuperResolution, cancel: CancelToken) -> Self {
        Self {
            engine,
            cancel,
            discard_first_frame: false,
            state: DriverState::Starting,
        }
    }

    /// Drop the first pulled frame (some decoders hand out a stale one).
    pub fn with_discard_first_frame(mut self, discard: bool) -> Self {
        self.discard_first_frame = discard;
        self
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    pub fn engine(&self) -> &SuperResolution {
        &self.engine
    }

    /// Run until the source is exhausted, a stop is requested, or a fatal
    /// error occurs. Errors keep their `SuperResError` for `downcast_ref`.
    pub fn run(
        &mut self,
        source: &mut dyn FrameSource,
        sinks: &mut SinkSet,
    ) -> Result<RunSummary> {
        let mut summary = RunSummary {
            frames_in: 0,
            frames_out: 0,
            steady_outputs: 0,
            warnings: Vec::new(),
            final_state: DriverState::Starting,
            latencies: Vec::new(),
            cancelled: false,
        };
        let outcome = self.pump(source, sinks, &mut summary);
        self.state = DriverState::Stopped;
        summary.final_state = DriverState::Stopped;

        let finished = sinks.finish();
        outcome?;
        finished.context("finishing output")?;
        log::info!(
            "run finished: {} frames in, {} frames out, {} warnings{}",
            summary.frames_in,
            summary.frames_out,
            summary.warnings.len(),
            if summary.cancelled { " (stopped early)" } else { "" }
        );
        Ok(summary)
    }

    fn pump(
        &mut self,
        source: &mut dyn FrameSource,
        sinks: &mut SinkSet,
        summary: &mut RunSummary,
    ) -> Result<()> {
        let mut pulled = 0u64;
        loop {
            if self.stop_requested(summary) {
                return Ok(());
            }
            let Some(frame) = source
                .next_frame()
                .with_context(|| format!("reading {}", source.describe()))?
            else {
                break;
            };
            pulled += 1;
            if pulled == 1 && self.discard_first_frame {
                log::debug!("discarding first frame {}", frame.index());
                continue;
            }

            self.engine.push(frame)?;
            summary.frames_in += 1;
            if self.state == DriverState::Starting {
                self.state = DriverState::Warming;
            }
            if self.state == DriverState::Warming && self.engine.window().is_full() {
                log::debug!("temporal window full, steady state");
                self.state = DriverState::Steady;
            }
            while self.engine.is_ready() {
                if !self.emit(sinks, summary)? {
                    return Ok(());
                }
            }
        }

        if self.engine.has_pending() {
            self.state = DriverState::Draining;
            log::debug!("source exhausted, draining buffered frames");
        }
        while self.engine.has_pending() {
            if !self.emit(sinks, summary)? {
                return Ok(());
            }
        }
        Ok(())
    }

    /// Reconstruct and write one frame. `false` once the run was stopped.
    fn emit(&mut self, sinks: &mut SinkSet, summary: &mut RunSummary) -> Result<bool> {
        if self.stop_requested(summary) {
            return Ok(false);
        }
        let started = Instant::now();
        let Some(reconstruction) = self.engine.reconstruct(&self.cancel)? else {
            // Cancelled mid-cycle, or nothing was pending.
            return Ok(!self.stop_requested(summary));
        };
        let latency = started.elapsed();
        log::info!(
            "[{:>3}] : {:.3} sec",
            reconstruction.frame.index(),
            latency.as_secs_f64()
        );

        sinks.write(&reconstruction.frame)?;
        summary.frames_out += 1;
        summary.latencies.push(latency);
        summary.warnings.extend(reconstruction.warnings);
        if self.state == DriverState::Steady {
            summary.steady_outputs += 1;
        }
        Ok(true)
    }

    fn stop_requested(&mut self, summary: &mut RunSummary) -> bool {
        if self.cancel.is_cancelled() {
            if !summary.cancelled {
                log::info!("stop requested, abandoning in-flight work");
            }
            summary.cancelled = true;
            self.state = DriverState::Stopped;
        }
        summary.cancelled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SuperResConfig;
    use crate::error::SuperResError;
    use crate::flow::{ComputeBackend, MotionEstimator, MotionField};
    use crate::frame::Frame;
    use crate::sink::test_support::RecordingSink;
    use ndarray::Array2;
    use std::collections::VecDeque;

    struct ZeroFlow;

    impl MotionEstimator for ZeroFlow {
        fn name(&self) -> &'static str {
            "zero"
        }

        fn backend(&self) -> ComputeBackend {
            ComputeBackend::Cpu
        }

        fn estimate(
            &self,
            reference: &Frame,
            _source: &Frame,
        ) -> crate::error::Result<MotionField> {
            Ok(MotionField::zeros(reference.dims()))
        }
    }

    struct ListSource {
        frames: VecDeque<Frame>,
        read: u64,
        cancel_after: Option<(u64, CancelToken)>,
    }

    impl ListSource {
        fn new(indices: &[u64]) -> Self {
            let frames = indices
                .iter()
                .map(|&i| {
                    Frame::from_luma(i, Array2::from_elem((4, 5), 10.0 + i as f32)).unwrap()
                })
                .collect();
            Self {
                frames,
                read: 0,
                cancel_after: None,
            }
        }
    }

    impl FrameSource for ListSource {
        fn next_frame(&mut self) -> Result<Option<Frame>> {
            if let Some((after, token)) = &self.cancel_after {
                if self.read == *after {
                    token.cancel();
                }
            }
            self.read += 1;
            Ok(self.frames.pop_front())
        }

        fn describe(&self) -> String {
            "list".to_string()
        }

        fn frames_read(&self) -> u64 {
            self.read
        }
    }

    fn driver(radius: usize, cancel: CancelToken) -> Driver {
        let config = SuperResConfig {
            scale: 2,
            iterations: 2,
            temporal_radius: radius,
            ..SuperResConfig::default()
        };
        let engine = SuperResolution::with_estimator(config, Box::new(ZeroFlow)).unwrap();
        Driver::new(engine, cancel)
    }

    fn recording_set() -> (SinkSet, std::sync::Arc<std::sync::Mutex<Vec<u64>>>) {
        let sink = RecordingSink::new("memory", false);
        let written = sink.written.clone();
        let mut set = SinkSet::new();
        set.push(Box::new(sink));
        (set, written)
    }

    #[test]
    fn emits_one_frame_per_input_in_order() -> Result<()> {
        let mut source = ListSource::new(&[0, 1, 2, 3, 4, 5]);
        let (mut sinks, written) = recording_set();
        let mut driver = driver(2, CancelToken::new());
        let summary = driver.run(&mut source, &mut sinks)?;

        assert_eq!(summary.frames_in, 6);
        assert_eq!(summary.frames_out, 6);
        assert_eq!(summary.latencies.len(), 6);
        assert_eq!(*written.lock().unwrap(), vec![0, 1, 2, 3, 4, 5]);
        assert_eq!(summary.final_state, DriverState::Stopped);
        assert!(!summary.cancelled);
        Ok(())
    }

    #[test]
    fn short_stream_drains_without_steady_state() -> Result<()> {
        let mut source = ListSource::new(&[0, 1]);
        let (mut sinks, written) = recording_set();
        let mut driver = driver(4, CancelToken::new());
        let summary = driver.run(&mut source, &mut sinks)?;
        assert_eq!(summary.frames_out, 2);
        assert_eq!(summary.steady_outputs, 0);
        assert_eq!(*written.lock().unwrap(), vec![0, 1]);
        Ok(())
    }

    #[test]
    fn discarding_first_frame_keeps_count_balanced() -> Result<()> {
        let mut source = ListSource::new(&[0, 1, 2, 3]);
        let (mut sinks, written) = recording_set();
        let mut driver = driver(1, CancelToken::new()).with_discard_first_frame(true);
        let summary = driver.run(&mut source, &mut sinks)?;
        assert_eq!(summary.frames_in, 3);
        assert_eq!(summary.frames_out, 3);
        assert_eq!(*written.lock().unwrap(), vec![1, 2, 3]);
        Ok(())
    }

    #[test]
    fn gap_in_indices_is_fatal() {
        let mut source = ListSource::new(&[0, 1, 2, 4]);
        let (mut sinks, _) = recording_set();
        let mut driver = driver(1, CancelToken::new());
        let err = driver.run(&mut source, &mut sinks).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SuperResError>(),
            Some(SuperResError::StreamDiscontinuity {
                expected: 3,
                got: 4
            })
        ));
        assert_eq!(driver.state(), DriverState::Stopped);
    }

    #[test]
    fn stop_request_ends_run_and_finishes_sinks() -> Result<()> {
        let cancel = CancelToken::new();
        let mut source = ListSource::new(&[0, 1, 2, 3, 4, 5, 6, 7]);
        source.cancel_after = Some((4, cancel.clone()));
        let sink = RecordingSink::new("memory", false);
        let finished = sink.finished.clone();
        let mut sinks = SinkSet::new();
        sinks.push(Box::new(sink));

        let mut driver = driver(1, cancel);
        let summary = driver.run(&mut source, &mut sinks)?;
        assert!(summary.cancelled);
        assert!(summary.frames_out < 8);
        assert_eq!(summary.final_state, DriverState::Stopped);
        assert!(*finished.lock().unwrap());
        Ok(())
    }


    fn empty_summary() -> RunSummary {
        RunSummary {
            frames_in: 0,
            frames_out: 0,
            steady_outputs: 0,
            warnings: Vec::new(),
            final_state: DriverState::Starting,
            latencies: Vec::new(),
            cancelled: false,
        }
    }

    #[test]
    fn window_that_never_fills_never_reaches_steady() -> Result<()> {
        for len in [3u64, 4] {
            let indices: Vec<u64> = (0..len).collect();
            let mut source = ListSource::new(&indices);
            let (mut sinks, written) = recording_set();
            let mut driver = driver(2, CancelToken::new());
            let mut summary = empty_summary();

            driver.pump(&mut source, &mut sinks, &mut summary)?;
            assert_eq!(driver.state(), DriverState::Draining);
            assert_eq!(summary.frames_out, len);
            assert_eq!(summary.steady_outputs, 0);
            assert_eq!(*written.lock().unwrap(), indices);
        }
        Ok(())
    }

    #[test]
    fn full_window_switches_warming_to_steady() -> Result<()> {
        let mut driver = driver(2, CancelToken::new());
        assert_eq!(driver.state(), DriverState::Starting);
        let (mut sinks, _) = recording_set();
        let mut summary = empty_summary();

        let mut source = ListSource::new(&[0, 1, 2, 3, 4, 5]);
        driver.pump(&mut source, &mut sinks, &mut summary)?;
        // 0 and 1 come out during warm-up, 2 and 3 with a full window,
        // 4 and 5 while draining.
        assert_eq!(summary.frames_out, 6);
        assert_eq!(summary.steady_outputs, 2);
        assert_eq!(driver.state(), DriverState::Draining);
        Ok(())
    }

    #[test]
    fn zero_radius_is_steady_from_the_first_frame() -> Result<()> {
        let mut source = ListSource::new(&[0, 1, 2]);
        let (mut sinks, _) = recording_set();
        let mut driver = driver(0, CancelToken::new());
        let summary = driver.run(&mut source, &mut sinks)?;
        assert_eq!(summary.frames_out, 3);
        assert_eq!(summary.steady_outputs, 3);
        Ok(())
    }
}
