//! Video file source using FFmpeg.
//!
//! When the backend selection allows acceleration, the `<codec>_cuvid`
//! decoder is tried first and validated by decoding the first frame. Any
//! failure on that path falls back to the software decoder.

use anyhow::{anyhow, Context, Result};
use ffmpeg_next as ffmpeg;
use std::path::{Path, PathBuf};

use super::FrameSource;
use crate::error::SuperResError;
use crate::flow::BackendSelection;
use crate::frame::Frame;

pub struct FfmpegFileSource {
    path: PathBuf,
    input: ffmpeg::format::context::Input,
    stream_index: usize,
    decoder: ffmpeg::codec::decoder::Video,
    scaler: Option<ffmpeg::software::scaling::Context>,
    decoder_name: String,
    /// First frame, decoded while validating the decoder.
    primed: Option<Frame>,
    flushed: bool,
    frame_count: u64,
}

impl FfmpegFileSource {
    pub fn open(path: &Path, backend: BackendSelection) -> Result<Self> {
        ffmpeg::init().context("initialize ffmpeg")?;
        if backend != BackendSelection::Cpu {
            match Self::open_with(path, true).and_then(Self::primed) {
                Ok(source) => return Ok(source),
                Err(err) => log::debug!(
                    "FfmpegFileSource: hardware decode unavailable for {}: {:#}",
                    path.display(),
                    err
                ),
            }
        }
        Self::open_with(path, false)
            .and_then(Self::primed)
            .map_err(|err| {
                anyhow::Error::from(SuperResError::source_open(
                    path.display().to_string(),
                    format!("{:#}", err),
                ))
            })
    }

    fn open_with(path: &Path, hardware: bool) -> Result<Self> {
        let input = ffmpeg::format::input(&path).with_context(|| {
            format!("failed to open file input '{}' with ffmpeg", path.display())
        })?;
        let input_stream = input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| anyhow!("file has no video track"))?;
        let stream_index = input_stream.index();
        let parameters = input_stream.parameters();
        let codec_name = parameters.id().name().to_string();
        let context = ffmpeg::codec::context::Context::from_parameters(parameters)
            .context("load video decoder parameters")?;

        let (decoder, decoder_name) = if hardware {
            let name = format!("{}_cuvid", codec_name);
            let codec = ffmpeg::decoder::find_by_name(&name)
                .ok_or_else(|| anyhow!("decoder {} not available", name))?;
            let decoder = context
                .decoder()
                .open_as(codec)
                .and_then(|opened| opened.video())
                .with_context(|| format!("open {}", name))?;
            (decoder, name)
        } else {
            let decoder = context
                .decoder()
                .video()
                .context("open ffmpeg video decoder")?;
            (decoder, codec_name)
        };

        Ok(Self {
            path: path.to_path_buf(),
            input,
            stream_index,
            decoder,
            scaler: None,
            decoder_name,
            primed: None,
            flushed: false,
            frame_count: 0,
        })
    }

    /// Decode the first frame now so a broken decoder is caught at open.
    fn primed(mut self) -> Result<Self> {
        let first = self
            .decode_next()?
            .ok_or_else(|| anyhow!("file ended without frames"))?;
        log::info!(
            "FfmpegFileSource: opened {} with {} ({}x{})",
            self.path.display(),
            self.decoder_name,
            first.width(),
            first.height()
        );
        self.primed = Some(first);
        Ok(self)
    }

    fn decode_next(&mut self) -> Result<Option<Frame>> {
        let mut decoded = ffmpeg::frame::Video::empty();
        loop {
            if self.decoder.receive_frame(&mut decoded).is_ok() {
                return self.convert(&decoded).map(Some);
            }
            if self.flushed {
                return Ok(None);
            }
            let next = self
                .input
                .packets()
                .next()
                .map(|(stream, packet)| (stream.index(), packet));
            match next {
                Some((index, packet)) if index == self.stream_index => {
                    self.decoder
                        .send_packet(&packet)
                        .context("send packet to ffmpeg decoder")?;
                }
                Some(_) => {}
                None => {
                    self.decoder.send_eof().context("flush ffmpeg decoder")?;
                    self.flushed = true;
                }
            }
        }
    }

    fn convert(&mut self, decoded: &ffmpeg::frame::Video) -> Result<Frame> {
        if self.scaler.is_none() {
            let scaler = ffmpeg::software::scaling::context::Context::get(
                decoded.format(),
                decoded.width(),
                decoded.height(),
                ffmpeg::util::format::pixel::Pixel::RGB24,
                decoded.width(),
                decoded.height(),
                ffmpeg::software::scaling::flag::Flags::BILINEAR,
            )
            .context("create ffmpeg scaler")?;
            self.scaler = Some(scaler);
        }
        let scaler = self.scaler.as_mut().context("ffmpeg scaler missing")?;
        let mut rgb_frame = ffmpeg::frame::Video::empty();
        scaler
            .run(decoded, &mut rgb_frame)
            .context("scale frame to RGB")?;
        let (pixels, width, height) = frame_to_pixels(&rgb_frame)?;

        let index = self.frame_count;
        self.frame_count += 1;
        Ok(Frame::from_interleaved(index, width, height, 3, &pixels)?)
    }
}

impl FrameSource for FfmpegFileSource {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if let Some(frame) = self.primed.take() {
            return Ok(Some(frame));
        }
        self.decode_next()
            .with_context(|| format!("decoding {}", self.path.display()))
    }

    fn describe(&self) -> String {
        format!("{} ({})", self.path.display(), self.decoder_name)
    }

    fn frames_read(&self) -> u64 {
        self.frame_count - u64::from(self.primed.is_some())
    }
}

fn frame_to_pixels(frame: &ffmpeg::frame::Video) -> Result<(Vec<u8>, usize, usize)> {
    let width = frame.width() as usize;
    let height = frame.height() as usize;
    let row_bytes = width * 3;
    let stride = frame.stride(0);
    let data = frame.data(0);

    if stride == row_bytes {
        let pixels = data
            .get(..row_bytes * height)
            .context("ffmpeg frame is shorter than its dimensions")?;
        return Ok((pixels.to_vec(), width, height));
    }

    let mut pixels = Vec::with_capacity(row_bytes * height);
    for row in 0..height {
        let start = row * stride;
        let end = start + row_bytes;
        pixels.extend_from_slice(
            data.get(start..end)
                .context("ffmpeg frame row is out of bounds")?,
        );
    }

    Ok((pixels, width, height))
}
