//! Frame ingestion sources.
//!
//! This module provides different sources for low-resolution frames:
//! - Synthetic translating scenes (`stub://`, testing and demos)
//! - YUV4MPEG2 files
//! - Directories of PNG/JPEG stills
//! - Local video files (feature: ingest-ffmpeg)
//! - USB/V4L2 cameras (feature: ingest-v4l2), selected with `*`
//!
//! Every source hands out frames with contiguous sequence indices starting at
//! zero. Exhaustion is `Ok(None)`, never an error.

#[cfg(feature = "ingest-ffmpeg")]
pub(crate) mod file_ffmpeg;
pub mod image_seq;
pub(crate) mod normalize;
pub mod synthetic;
#[cfg(feature = "ingest-v4l2")]
pub mod v4l2;
pub mod y4m;

use anyhow::Result;
use std::path::Path;

use crate::error::SuperResError;
use crate::flow::BackendSelection;
use crate::frame::Frame;

#[cfg(feature = "ingest-ffmpeg")]
pub use file_ffmpeg::FfmpegFileSource;
pub use image_seq::ImageSequenceSource;
pub(crate) use normalize::rgb_to_yuv444;
pub use synthetic::{SyntheticConfig, SyntheticSource};
#[cfg(feature = "ingest-v4l2")]
pub use v4l2::{V4l2Config, V4l2Source};
pub use self::y4m::Y4mSource;

/// Input name that selects the live camera.
pub const CAMERA_INPUT: &str = "*";

/// Blocking pull-one source of frames.
pub trait FrameSource {
    /// Next frame, or `None` once the source is exhausted.
    fn next_frame(&mut self) -> Result<Option<Frame>>;

    fn describe(&self) -> String;

    fn frames_read(&self) -> u64;

    fn is_camera(&self) -> bool {
        false
    }
}

#[derive(Clone, Debug)]
pub struct SourceOptions {
    /// Decoder preference for container inputs.
    pub backend: BackendSelection,
    /// Camera device used for the `*` input.
    pub device: String,
}

impl Default for SourceOptions {
    fn default() -> Self {
        Self {
            backend: BackendSelection::Auto,
            device: "/dev/video0".to_string(),
        }
    }
}

/// Pick and open the source for `input`.
pub fn open_source(input: &str, options: &SourceOptions) -> Result<Box<dyn FrameSource>> {
    if input.starts_with("stub://") {
        let config = SyntheticConfig::from_url(input)
            .map_err(|e| SuperResError::source_open(input, format!("{:#}", e)))?;
        return Ok(Box::new(SyntheticSource::new(config)?));
    }
    if input == CAMERA_INPUT {
        return open_camera(options);
    }

    let path = Path::new(input);
    let is_y4m = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("y4m"));
    if is_y4m {
        return Ok(Box::new(Y4mSource::open(path)?));
    }
    if path.is_dir() {
        return Ok(Box::new(ImageSequenceSource::open(path)?));
    }
    open_container(path, options)
}

#[cfg(feature = "ingest-v4l2")]
fn open_camera(options: &SourceOptions) -> Result<Box<dyn FrameSource>> {
    let config = V4l2Config {
        device: options.device.clone(),
        ..V4l2Config::default()
    };
    Ok(Box::new(V4l2Source::open(config)?))
}

#[cfg(not(feature = "ingest-v4l2"))]
fn open_camera(_options: &SourceOptions) -> Result<Box<dyn FrameSource>> {
    Err(SuperResError::config("camera input requires the ingest-v4l2 feature").into())
}

#[cfg(feature = "ingest-ffmpeg")]
fn open_container(path: &Path, options: &SourceOptions) -> Result<Box<dyn FrameSource>> {
    Ok(Box::new(FfmpegFileSource::open(path, options.backend)?))
}

#[cfg(not(feature = "ingest-ffmpeg"))]
fn open_container(path: &Path, _options: &SourceOptions) -> Result<Box<dyn FrameSource>> {
    if !path.exists() {
        return Err(SuperResError::source_open(path.display().to_string(), "no such file").into());
    }
    Err(SuperResError::config(format!(
        "{}: video files require the ingest-ffmpeg feature (y4m and image directories are built in)",
        path.display()
    ))
    .into())
}
