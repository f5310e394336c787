//! Encoded video output through FFmpeg (MPEG-4 Part 2).

use anyhow::{anyhow, Context, Result};
use ffmpeg_next as ffmpeg;
use std::path::{Path, PathBuf};

use super::FrameSink;
use crate::frame::Frame;

struct Encoding {
    output: ffmpeg::format::context::Output,
    encoder: ffmpeg::encoder::Video,
    scaler: ffmpeg::software::scaling::Context,
    stream_index: usize,
    encoder_time_base: ffmpeg::Rational,
    width: u32,
    height: u32,
}

pub struct FfmpegSink {
    path: PathBuf,
    fps: u32,
    encoding: Option<Encoding>,
    frames_written: i64,
}

impl FfmpegSink {
    pub fn new(path: &Path, fps: u32) -> Self {
        Self {
            path: path.to_path_buf(),
            fps,
            encoding: None,
            frames_written: 0,
        }
    }

    fn open(&self, width: u32, height: u32) -> Result<Encoding> {
        ffmpeg::init().context("initialize ffmpeg")?;
        let mut output = ffmpeg::format::output(&self.path)
            .with_context(|| format!("create output {}", self.path.display()))?;
        let global_header = output
            .format()
            .flags()
            .contains(ffmpeg::format::flag::Flags::GLOBAL_HEADER);

        let codec = ffmpeg::encoder::find(ffmpeg::codec::Id::MPEG4)
            .ok_or_else(|| anyhow!("MPEG-4 encoder not available"))?;
        let time_base = ffmpeg::Rational::new(1, self.fps as i32);

        let mut encoder = ffmpeg::codec::context::Context::new_with_codec(codec)
            .encoder()
            .video()
            .context("create video encoder")?;
        encoder.set_width(width);
        encoder.set_height(height);
        encoder.set_format(ffmpeg::format::Pixel::YUV420P);
        encoder.set_time_base(time_base);
        encoder.set_frame_rate(Some(ffmpeg::Rational::new(self.fps as i32, 1)));
        if global_header {
            encoder.set_flags(ffmpeg::codec::Flags::GLOBAL_HEADER);
        }
        let encoder = encoder.open_as(codec).context("open MPEG-4 encoder")?;

        let stream_index = {
            let mut stream = output.add_stream(codec).context("add video stream")?;
            stream.set_parameters(&encoder);
            stream.set_time_base(time_base);
            stream.index()
        };
        output.write_header().context("write container header")?;

        let scaler = ffmpeg::software::scaling::Context::get(
            ffmpeg::format::Pixel::RGB24,
            width,
            height,
            ffmpeg::format::Pixel::YUV420P,
            width,
            height,
            ffmpeg::software::scaling::flag::Flags::BILINEAR,
        )
        .context("create ffmpeg scaler")?;

        log::info!(
            "FfmpegSink: encoding {} ({}x{}, mpeg4, {} fps)",
            self.path.display(),
            width,
            height,
            self.fps
        );
        Ok(Encoding {
            output,
            encoder,
            scaler,
            stream_index,
            encoder_time_base: time_base,
            width,
            height,
        })
    }
}

impl Encoding {
    fn drain_packets(&mut self) -> Result<()> {
        let stream_time_base = self
            .output
            .stream(self.stream_index)
            .map(|stream| stream.time_base())
            .context("output stream missing")?;
        let mut packet = ffmpeg::Packet::empty();
        while self.encoder.receive_packet(&mut packet).is_ok() {
            packet.set_stream(self.stream_index);
            packet.rescale_ts(self.encoder_time_base, stream_time_base);
            packet
                .write_interleaved(&mut self.output)
                .context("write encoded packet")?;
        }
        Ok(())
    }
}

impl FrameSink for FfmpegSink {
    fn name(&self) -> String {
        self.path.display().to_string()
    }

    fn write(&mut self, frame: &Frame) -> Result<()> {
        let (width, height) = (frame.width() as u32, frame.height() as u32);
        if self.encoding.is_none() {
            self.encoding = Some(self.open(width, height)?);
        }
        let pts = self.frames_written;
        let encoding = self.encoding.as_mut().context("encoder missing")?;
        if (encoding.width, encoding.height) != (width, height) {
            return Err(anyhow!(
                "frame {} is {}x{}, stream is {}x{}",
                frame.index(),
                width,
                height,
                encoding.width,
                encoding.height
            ));
        }

        let rgb = to_rgb(frame);
        let mut source = ffmpeg::frame::Video::new(ffmpeg::format::Pixel::RGB24, width, height);
        let stride = source.stride(0);
        let row_bytes = width as usize * 3;
        for (row, chunk) in rgb.chunks_exact(row_bytes).enumerate() {
            let start = row * stride;
            source
                .data_mut(0)
                .get_mut(start..start + row_bytes)
                .context("ffmpeg frame row is out of bounds")?
                .copy_from_slice(chunk);
        }

        let mut yuv = ffmpeg::frame::Video::empty();
        encoding
            .scaler
            .run(&source, &mut yuv)
            .context("convert frame to YUV420P")?;
        yuv.set_pts(Some(pts));
        encoding
            .encoder
            .send_frame(&yuv)
            .context("send frame to encoder")?;
        encoding.drain_packets()?;
        self.frames_written += 1;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        let Some(mut encoding) = self.encoding.take() else {
            return Ok(());
        };
        encoding.encoder.send_eof().context("flush encoder")?;
        encoding.drain_packets()?;
        encoding
            .output
            .write_trailer()
            .context("write container trailer")?;
        log::info!(
            "FfmpegSink: {} frames written to {}",
            self.frames_written,
            self.path.display()
        );
        Ok(())
    }
}

/// Interleaved RGB bytes; luma frames are replicated into all three channels.
fn to_rgb(frame: &Frame) -> Vec<u8> {
    let bytes = frame.to_interleaved_u8();
    if frame.channels() == 3 {
        return bytes;
    }
    bytes.iter().flat_map(|&v| [v, v, v]).collect()
}
