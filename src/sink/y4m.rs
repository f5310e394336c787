//! YUV4MPEG2 file sink.
//!
//! RGB frames are written as 4:4:4 so no chroma is lost to subsampling; luma
//! frames are written as `Cmono`.

use anyhow::{anyhow, Context, Result};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use super::FrameSink;
use crate::frame::Frame;
use crate::ingest::rgb_to_yuv444;

struct OpenStream {
    encoder: y4m::Encoder<BufWriter<File>>,
    width: usize,
    height: usize,
    channels: usize,
}

pub struct Y4mSink {
    path: PathBuf,
    fps: u32,
    stream: Option<OpenStream>,
    frames_written: u64,
}

impl Y4mSink {
    pub fn new(path: &Path, fps: u32) -> Self {
        Self {
            path: path.to_path_buf(),
            fps,
            stream: None,
            frames_written: 0,
        }
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    fn open(&self, frame: &Frame) -> Result<OpenStream> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create output directory {}", parent.display()))?;
        }
        let file = File::create(&self.path)
            .with_context(|| format!("create {}", self.path.display()))?;
        let colorspace = if frame.channels() == 1 {
            y4m::Colorspace::Cmono
        } else {
            y4m::Colorspace::C444
        };
        let encoder = y4m::encode(
            frame.width(),
            frame.height(),
            y4m::Ratio::new(self.fps as usize, 1),
        )
        .with_colorspace(colorspace)
        .write_header(BufWriter::new(file))
        .map_err(|e| anyhow!("write Y4M header: {:?}", e))?;
        log::info!(
            "Y4mSink: writing {} ({}x{}, {:?}, {} fps)",
            self.path.display(),
            frame.width(),
            frame.height(),
            colorspace,
            self.fps
        );
        Ok(OpenStream {
            encoder,
            width: frame.width(),
            height: frame.height(),
            channels: frame.channels(),
        })
    }
}

impl FrameSink for Y4mSink {
    fn name(&self) -> String {
        self.path.display().to_string()
    }

    fn write(&mut self, frame: &Frame) -> Result<()> {
        if self.stream.is_none() {
            self.stream = Some(self.open(frame)?);
        }
        let stream = self.stream.as_mut().context("y4m stream missing")?;
        if (stream.height, stream.width, stream.channels)
            != (frame.height(), frame.width(), frame.channels())
        {
            return Err(anyhow!(
                "frame {} is {}x{}x{}, stream is {}x{}x{}",
                frame.index(),
                frame.width(),
                frame.height(),
                frame.channels(),
                stream.width,
                stream.height,
                stream.channels
            ));
        }

        let bytes = frame.to_interleaved_u8();
        let written = if stream.channels == 1 {
            stream
                .encoder
                .write_frame(&y4m::Frame::new([bytes.as_slice(), &[], &[]], None))
        } else {
            let (y, u, v) = rgb_to_yuv444(&bytes);
            let planes = [y.as_slice(), u.as_slice(), v.as_slice()];
            stream.encoder.write_frame(&y4m::Frame::new(planes, None))
        };
        written.map_err(|e| anyhow!("write Y4M frame {}: {:?}", frame.index(), e))?;
        self.frames_written += 1;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        // The buffered writer flushes when the encoder is dropped.
        if self.stream.take().is_some() {
            log::info!(
                "Y4mSink: {} frames written to {}",
                self.frames_written,
                self.path.display()
            );
        }
        Ok(())
    }
}
