//! One still image per output frame.
//!
//! The target is either a pattern whose `{}` is replaced by the zero-padded
//! frame index (`out/{}.png`), or a directory that receives
//! `frame_000000.png`, `frame_000001.png`, ...

use anyhow::{anyhow, Context, Result};
use image::{GrayImage, RgbImage};
use std::path::{Path, PathBuf};

use super::FrameSink;
use crate::frame::Frame;

const PLACEHOLDER: &str = "{}";

pub struct ImageSequenceSink {
    pattern: String,
    frames_written: u64,
}

impl ImageSequenceSink {
    pub fn new(target: &Path) -> Result<Self> {
        let text = target
            .to_str()
            .ok_or_else(|| anyhow!("output path {} is not UTF-8", target.display()))?;
        let pattern = if text.contains(PLACEHOLDER) {
            text.to_string()
        } else {
            target
                .join(format!("frame_{}.png", PLACEHOLDER))
                .to_string_lossy()
                .into_owned()
        };
        Ok(Self {
            pattern,
            frames_written: 0,
        })
    }

    pub fn path_for(&self, index: u64) -> PathBuf {
        PathBuf::from(self.pattern.replacen(PLACEHOLDER, &format!("{:06}", index), 1))
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }
}

impl FrameSink for ImageSequenceSink {
    fn name(&self) -> String {
        self.pattern.clone()
    }

    fn write(&mut self, frame: &Frame) -> Result<()> {
        let path = self.path_for(frame.index());
        if self.frames_written == 0 {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("create output directory {}", parent.display()))?;
            }
        }
        let (width, height) = (frame.width() as u32, frame.height() as u32);
        let bytes = frame.to_interleaved_u8();
        let saved = match frame.channels() {
            1 => GrayImage::from_raw(width, height, bytes)
                .ok_or_else(|| anyhow!("luma buffer does not match {}x{}", width, height))?
                .save(&path),
            3 => RgbImage::from_raw(width, height, bytes)
                .ok_or_else(|| anyhow!("rgb buffer does not match {}x{}", width, height))?
                .save(&path),
            other => return Err(anyhow!("cannot save {}-channel frame as image", other)),
        };
        saved.with_context(|| format!("write {}", path.display()))?;
        self.frames_written += 1;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        log::info!(
            "ImageSequenceSink: {} images written to {}",
            self.frames_written,
            self.pattern
        );
        Ok(())
    }
}
