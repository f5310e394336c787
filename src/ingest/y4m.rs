//! YUV4MPEG2 file source.
//!
//! 8-bit 4:2:0, 4:2:2 and 4:4:4 streams are converted to RGB; monochrome
//! streams become single-channel luma frames.

use anyhow::{anyhow, Context, Result};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use super::normalize::planar_yuv_to_rgb;
use super::FrameSource;
use crate::error::SuperResError;
use crate::frame::Frame;

pub struct Y4mSource {
    path: PathBuf,
    decoder: y4m::Decoder<BufReader<File>>,
    width: usize,
    height: usize,
    mono: bool,
    frame_count: u64,
}

impl Y4mSource {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .map_err(|e| SuperResError::source_open(path.display().to_string(), e))?;
        let decoder = y4m::decode(BufReader::new(file)).map_err(|e| {
            SuperResError::source_open(
                path.display().to_string(),
                format!("invalid Y4M header: {}", e),
            )
        })?;
        let colorspace = decoder.get_colorspace();
        let mono = match colorspace {
            y4m::Colorspace::Cmono => true,
            y4m::Colorspace::C420
            | y4m::Colorspace::C420jpeg
            | y4m::Colorspace::C420paldv
            | y4m::Colorspace::C420mpeg2
            | y4m::Colorspace::C422
            | y4m::Colorspace::C444 => false,
            other => {
                return Err(SuperResError::source_open(
                    path.display().to_string(),
                    format!("unsupported Y4M colorspace {:?} (8-bit only)", other),
                )
                .into())
            }
        };
        let framerate = decoder.get_framerate();
        log::info!(
            "Y4mSource: opened {} ({}x{}, {}/{} fps, {:?})",
            path.display(),
            decoder.get_width(),
            decoder.get_height(),
            framerate.num,
            framerate.den,
            colorspace
        );
        Ok(Self {
            path: path.to_path_buf(),
            width: decoder.get_width(),
            height: decoder.get_height(),
            decoder,
            mono,
            frame_count: 0,
        })
    }
}

impl FrameSource for Y4mSource {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        let frame = match self.decoder.read_frame() {
            Ok(frame) => frame,
            Err(y4m::Error::EOF) => return Ok(None),
            Err(e) => {
                return Err(anyhow!("failed to read Y4M frame: {}", e))
                    .with_context(|| format!("reading {}", self.path.display()))
            }
        };
        let index = self.frame_count;
        let out = if self.mono {
            Frame::from_interleaved(index, self.width, self.height, 1, frame.get_y_plane())?
        } else {
            let rgb = planar_yuv_to_rgb(
                frame.get_y_plane(),
                frame.get_u_plane(),
                frame.get_v_plane(),
                self.width,
                self.height,
            )?;
            Frame::from_interleaved(index, self.width, self.height, 3, &rgb)?
        };
        self.frame_count += 1;
        Ok(Some(out))
    }

    fn describe(&self) -> String {
        format!("{} (y4m)", self.path.display())
    }

    fn frames_read(&self) -> u64 {
        self.frame_count
    }
}
