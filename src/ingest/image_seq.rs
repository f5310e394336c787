//! Directory of still images read in file-name order.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use super::FrameSource;
use crate::error::SuperResError;
use crate::frame::Frame;

const EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

pub struct ImageSequenceSource {
    dir: PathBuf,
    files: Vec<PathBuf>,
    next: usize,
}

impl ImageSequenceSource {
    pub fn open(dir: &Path) -> Result<Self> {
        let entries = std::fs::read_dir(dir)
            .map_err(|e| SuperResError::source_open(dir.display().to_string(), e))?;
        let mut files = Vec::new();
        for entry in entries {
            let path = entry
                .with_context(|| format!("listing {}", dir.display()))?
                .path();
            if path.is_file() && has_image_extension(&path) {
                files.push(path);
            }
        }
        files.sort();
        if files.is_empty() {
            return Err(SuperResError::source_open(
                dir.display().to_string(),
                "directory contains no PNG or JPEG images",
            )
            .into());
        }
        log::info!(
            "ImageSequenceSource: {} images in {}",
            files.len(),
            dir.display()
        );
        Ok(Self {
            dir: dir.to_path_buf(),
            files,
            next: 0,
        })
    }
}

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
}

impl FrameSource for ImageSequenceSource {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        let Some(path) = self.files.get(self.next) else {
            return Ok(None);
        };
        let img = image::open(path).with_context(|| format!("decoding {}", path.display()))?;
        let index = self.next as u64;
        let frame = if img.color().has_color() {
            let rgb = img.to_rgb8();
            let (w, h) = rgb.dimensions();
            Frame::from_interleaved(index, w as usize, h as usize, 3, rgb.as_raw())?
        } else {
            let gray = img.to_luma8();
            let (w, h) = gray.dimensions();
            Frame::from_interleaved(index, w as usize, h as usize, 1, gray.as_raw())?
        };
        self.next += 1;
        Ok(Some(frame))
    }

    fn describe(&self) -> String {
        format!("{} ({} images)", self.dir.display(), self.files.len())
    }

    fn frames_read(&self) -> u64 {
        self.next as u64
    }
}
