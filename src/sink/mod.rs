//! Frame sinks for reconstructed output.
//!
//! Sinks are opened lazily: the output geometry is known only once the first
//! high-resolution frame exists. `SinkSet` fans each frame out to every sink
//! and applies the failure policy.

#[cfg(feature = "encode-ffmpeg")]
pub(crate) mod ffmpeg;
pub mod image_seq;
pub mod preview;
pub mod y4m;

use anyhow::Result;
use std::path::Path;

use crate::error::SuperResError;
use crate::frame::Frame;

#[cfg(feature = "encode-ffmpeg")]
pub use self::ffmpeg::FfmpegSink;
pub use self::image_seq::ImageSequenceSink;
pub use self::preview::PreviewSink;
pub use self::y4m::Y4mSink;

pub const DEFAULT_FPS: u32 = 25;

/// Blocking push-one consumer of output frames.
pub trait FrameSink {
    fn name(&self) -> String;

    /// Display sinks keep a run alive when every file sink has failed.
    fn is_display(&self) -> bool {
        false
    }

    fn write(&mut self, frame: &Frame) -> Result<()>;

    /// Flush and close. Called once, after the last frame.
    fn finish(&mut self) -> Result<()>;
}

#[derive(Clone, Debug)]
pub struct OutputOptions {
    pub fps: u32,
}

impl Default for OutputOptions {
    fn default() -> Self {
        Self { fps: DEFAULT_FPS }
    }
}

/// Pick the sink for `path`.
///
/// `*.y4m` writes YUV4MPEG2, a directory or a path containing `{}` writes one
/// PNG per frame, anything else goes to the FFmpeg encoder.
pub fn open_output(path: &Path, options: &OutputOptions) -> Result<Box<dyn FrameSink>> {
    if options.fps == 0 {
        return Err(SuperResError::config("output frame rate must be positive").into());
    }
    let text = path.to_string_lossy();
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase());

    if extension.as_deref() == Some("y4m") {
        return Ok(Box::new(Y4mSink::new(path, options.fps)));
    }
    if text.contains("{}") || text.ends_with('/') || path.is_dir() {
        return Ok(Box::new(ImageSequenceSink::new(path)?));
    }
    open_encoder(path, options)
}

#[cfg(feature = "encode-ffmpeg")]
fn open_encoder(path: &Path, options: &OutputOptions) -> Result<Box<dyn FrameSink>> {
    Ok(Box::new(FfmpegSink::new(path, options.fps)))
}

#[cfg(not(feature = "encode-ffmpeg"))]
fn open_encoder(path: &Path, _options: &OutputOptions) -> Result<Box<dyn FrameSink>> {
    Err(SuperResError::config(format!(
        "{}: encoded video output requires the encode-ffmpeg feature (use .y4m or an image pattern)",
        path.display()
    ))
    .into())
}

/// Every active sink of a run.
///
/// A sink whose write fails is logged and dropped. The failure ends the run
/// only when no sink is left, or when the dropped sink was a file sink and no
/// display sink remains to show the output.
#[derive(Default)]
pub struct SinkSet {
    sinks: Vec<Box<dyn FrameSink>>,
}

impl SinkSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, sink: Box<dyn FrameSink>) {
        self.sinks.push(sink);
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    pub fn has_display(&self) -> bool {
        self.sinks.iter().any(|sink| sink.is_display())
    }

    pub fn names(&self) -> Vec<String> {
        self.sinks.iter().map(|sink| sink.name()).collect()
    }

    pub fn write(&mut self, frame: &Frame) -> Result<()> {
        let mut file_failure = None;
        let mut display_failure = None;
        let mut index = 0;
        while index < self.sinks.len() {
            let sink = &mut self.sinks[index];
            match sink.write(frame) {
                Ok(()) => index += 1,
                Err(err) => {
                    let name = sink.name();
                    log::error!("sink {} failed on frame {}: {:#}", name, frame.index(), err);
                    let failure = SuperResError::sink(name, format!("{:#}", err));
                    if sink.is_display() {
                        display_failure = Some(failure);
                    } else if file_failure.is_none() {
                        file_failure = Some(failure);
                    }
                    self.sinks.remove(index);
                }
            }
        }

        if self.sinks.is_empty() {
            if let Some(err) = file_failure.take().or(display_failure) {
                return Err(err.into());
            }
        }
        match file_failure {
            Some(err) if !self.has_display() => Err(err.into()),
            Some(err) => {
                log::warn!("continuing with display output only ({})", err);
                Ok(())
            }
            None => Ok(()),
        }
    }

    /// Finish every sink; the first failure is returned after all were tried.
    pub fn finish(&mut self) -> Result<()> {
        let mut first = None;
        for sink in &mut self.sinks {
            if let Err(err) = sink.finish() {
                log::error!("sink {} failed to finish: {:#}", sink.name(), err);
                if first.is_none() {
                    first = Some(SuperResError::sink(sink.name(), format!("{:#}", err)));
                }
            }
        }
        match first {
            Some(err) => Err(err.into()),
            None => Ok(()),
        }
    }
}
