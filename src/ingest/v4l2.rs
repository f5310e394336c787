//! Live camera source over V4L2.
//!
//! Requests RGB24 and accepts NV12 when the driver refuses it. Cameras never
//! exhaust; the stream ends only when the driver stops the run.

use anyhow::{anyhow, Context, Result};
use ouroboros::self_referencing;

use super::normalize::{normalize_to_rgb, PixelFormat};
use super::FrameSource;
use crate::error::SuperResError;
use crate::frame::Frame;

/// Configuration for a V4L2 source.
#[derive(Clone, Debug)]
pub struct V4l2Config {
    /// Device path (e.g., "/dev/video0")
    pub device: String,
    pub target_fps: u32,
    /// Preferred frame width.
    pub width: u32,
    /// Preferred frame height.
    pub height: u32,
}

impl Default for V4l2Config {
    fn default() -> Self {
        Self {
            device: "/dev/video0".to_string(),
            target_fps: 30,
            width: 640,
            height: 480,
        }
    }
}

pub struct V4l2Source {
    config: V4l2Config,
    state: DeviceV4l2State,
    format: PixelFormat,
    active_width: u32,
    active_height: u32,
    frame_count: u64,
}

#[self_referencing]
struct DeviceV4l2State {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

impl V4l2Source {
    pub fn open(config: V4l2Config) -> Result<Self> {
        Self::connect(config.clone()).map_err(|err| {
            anyhow::Error::from(SuperResError::source_open(
                config.device.clone(),
                format!("{:#}", err),
            ))
        })
    }

    fn connect(config: V4l2Config) -> Result<Self> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let mut device = v4l::Device::with_path(&config.device)
            .with_context(|| format!("open v4l2 device {}", config.device))?;
        let mut format = device.format().context("read v4l2 format")?;
        format.width = config.width;
        format.height = config.height;
        format.fourcc = v4l::FourCC::new(b"RGB3");

        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!(
                    "V4l2Source: failed to set format on {}: {}",
                    config.device,
                    err
                );
                device
                    .format()
                    .context("read v4l2 format after set failure")?
            }
        };
        let pixel_format = if format.fourcc == v4l::FourCC::new(b"RGB3") {
            PixelFormat::Rgb24
        } else if format.fourcc == v4l::FourCC::new(b"NV12") {
            PixelFormat::Nv12
        } else {
            return Err(anyhow!(
                "camera offers unsupported pixel format {}",
                format.fourcc
            ));
        };

        if config.target_fps > 0 {
            let params = v4l::video::capture::Parameters::with_fps(config.target_fps);
            if let Err(err) = device.set_params(&params) {
                log::warn!(
                    "V4l2Source: failed to set fps on {}: {}",
                    config.device,
                    err
                );
            }
        }

        let state = DeviceV4l2StateBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, 4)
                    .map_err(|err| anyhow::Error::new(err).context("create v4l2 buffer stream"))
            },
        }
        .try_build()?;

        log::info!(
            "V4l2Source: connected to {} ({}x{}, {:?})",
            config.device,
            format.width,
            format.height,
            pixel_format
        );
        Ok(Self {
            config,
            state,
            format: pixel_format,
            active_width: format.width,
            active_height: format.height,
            frame_count: 0,
        })
    }
}

impl FrameSource for V4l2Source {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        use v4l::io::traits::CaptureStream;

        let (width, height, format) = (self.active_width, self.active_height, self.format);
        let rgb = self.state.with_mut(|fields| -> Result<Vec<u8>> {
            let (buf, meta) = fields
                .stream
                .next()
                .map_err(|err| anyhow::Error::new(err).context("capture v4l2 frame"))?;
            let used = (meta.bytesused as usize).min(buf.len());
            let bytes = if used == 0 { buf } else { &buf[..used] };
            normalize_to_rgb(bytes, width, height, format)
        })?;

        let index = self.frame_count;
        self.frame_count += 1;
        let frame = Frame::from_interleaved(index, width as usize, height as usize, 3, &rgb)?;
        Ok(Some(frame))
    }

    fn describe(&self) -> String {
        format!(
            "{} (camera {}x{})",
            self.config.device, self.active_width, self.active_height
        )
    }

    fn frames_read(&self) -> u64 {
        self.frame_count
    }

    fn is_camera(&self) -> bool {
        true
    }
}
