//! Multi-frame video super-resolution (`superres`)
//!
//! This crate reconstructs a higher-resolution video stream from a
//! lower-resolution one by fusing temporally adjacent frames aligned with
//! dense motion fields.
//!
//! # Architecture
//!
//! Frame source → temporal window + motion estimator → reconstruction engine →
//! frame sinks, orchestrated by a synchronous driver loop:
//!
//! 1. **One in, one out**: every consumed frame yields exactly one output, in order.
//! 2. **Exact geometry**: outputs are exactly `scale` times the input in each dimension.
//! 3. **Contiguous input**: a gap in sequence indices is fatal.
//! 4. **Local degradation**: a failed motion estimate excludes one frame from one
//!    reconstruction and is reported as a warning.
//! 5. **Immutable configuration**: scale, iterations, radius and estimator are
//!    fixed at startup.
//!
//! # Module Structure
//!
//! - `frame`: `Frame` and `CancelToken`
//! - `imgproc`: sampling, pyramids, gradients and resampling kernels
//! - `flow`: motion fields, estimator trait, estimator kinds and compute backends
//! - `window`: temporal ring buffer around the reference frame
//! - `engine`: observation model, BTV regulariser, iterative reconstruction
//! - `ingest`: frame sources (synthetic, Y4M, image sequences, FFmpeg, V4L2)
//! - `sink`: frame sinks (Y4M, image sequences, FFmpeg, terminal preview)
//! - `driver`: the run loop and its state machine
//! - `config`, `ui`, `error`: ambient plumbing

pub mod config;
pub mod driver;
pub mod engine;
pub mod error;
pub mod flow;
pub mod frame;
pub mod imgproc;
pub mod ingest;
pub mod sink;
pub mod ui;
pub mod window;

pub use config::{ConfigOverrides, PipelineConfig, SuperResConfig};
pub use driver::{Driver, DriverState, RunSummary};
pub use engine::{BtvParams, Reconstruction, SuperResolution};
pub use error::SuperResError;
pub use flow::{
    create_estimator, select_backend, BackendSelection, ComputeBackend, DeviceCapabilities,
    MotionEstimator, MotionEstimatorKind, MotionField,
};
pub use frame::{CancelToken, Frame};
pub use ingest::{open_source, FrameSource, SourceOptions, SyntheticConfig, SyntheticSource};
#[cfg(feature = "ingest-v4l2")]
pub use ingest::{V4l2Config, V4l2Source};
pub use sink::{open_output, FrameSink, OutputOptions, PreviewSink, SinkSet};
pub use window::TemporalWindow;
