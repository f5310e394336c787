//! Frame types shared by every stage of the pipeline.
//!
//! - `Frame`: immutable planar sample grid tagged with a sequence index.
//! - `CancelToken`: stop flag shared between the signal handler, the driver and the engine.
//!
//! Samples are `f32` in the nominal 8-bit range `0.0..=255.0`. Sources convert
//! decoded bytes into this range once; sinks quantise back on emission.

use ndarray::{Array2, Array3, ArrayView2, Axis};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{Result, SuperResError};

/// Upper bound of the nominal sample range.
pub const MAX_SAMPLE: f32 = 255.0;

/// BT.601 luma weights.
const LUMA_WEIGHTS: [f32; 3] = [0.299, 0.587, 0.114];

// ----------------------------------------------------------------------------
// Frame
// ----------------------------------------------------------------------------

/// Immutable frame. Cloning shares the sample storage.
///
/// There are no mutating accessors; every transformation returns a new frame.
#[derive(Clone, Debug)]
pub struct Frame {
    index: u64,
    /// Shape `(channels, height, width)`.
    planes: Arc<Array3<f32>>,
}

impl Frame {
    /// Build a frame from planar samples shaped `(channels, height, width)`.
    ///
    /// Only luma (1 channel) and RGB (3 channels) layouts are accepted.
    pub fn from_planes(index: u64, planes: Array3<f32>) -> Result<Self> {
        let (channels, height, width) = planes.dim();
        if channels != 1 && channels != 3 {
            return Err(SuperResError::FrameMismatch(format!(
                "unsupported channel count {}",
                channels
            )));
        }
        if height == 0 || width == 0 {
            return Err(SuperResError::FrameMismatch(format!(
                "empty frame {}x{}",
                width, height
            )));
        }
        Ok(Self {
            index,
            planes: Arc::new(planes),
        })
    }

    /// Single-channel frame from a luma plane.
    pub fn from_luma(index: u64, plane: Array2<f32>) -> Result<Self> {
        Self::from_planes(index, plane.insert_axis(Axis(0)))
    }

    /// Build a frame from interleaved 8-bit samples (`GRAY8` or `RGB24`).
    pub fn from_interleaved(
        index: u64,
        width: usize,
        height: usize,
        channels: usize,
        bytes: &[u8],
    ) -> Result<Self> {
        let expected = width
            .checked_mul(height)
            .and_then(|v| v.checked_mul(channels))
            .ok_or_else(|| SuperResError::FrameMismatch("frame dimensions overflow".into()))?;
        if bytes.len() != expected {
            return Err(SuperResError::FrameMismatch(format!(
                "expected {} bytes for {}x{}x{}, received {}",
                expected,
                width,
                height,
                channels,
                bytes.len()
            )));
        }
        let planes = Array3::from_shape_fn((channels, height, width), |(c, y, x)| {
            bytes[(y * width + x) * channels + c] as f32
        });
        Self::from_planes(index, planes)
    }

    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn width(&self) -> usize {
        self.planes.dim().2
    }

    pub fn height(&self) -> usize {
        self.planes.dim().1
    }

    pub fn channels(&self) -> usize {
        self.planes.dim().0
    }

    /// `(height, width)`, matching ndarray's row-major shape order.
    pub fn dims(&self) -> (usize, usize) {
        (self.height(), self.width())
    }

    /// True when both frames share geometry and channel layout.
    pub fn same_layout(&self, other: &Frame) -> bool {
        self.planes.dim() == other.planes.dim()
    }

    pub fn plane(&self, channel: usize) -> ArrayView2<'_, f32> {
        self.planes.index_axis(Axis(0), channel)
    }

    pub fn planes(&self) -> &Array3<f32> {
        &self.planes
    }

    /// Luma plane used for motion estimation.
    pub fn luma(&self) -> Array2<f32> {
        if self.channels() == 1 {
            return self.plane(0).to_owned();
        }
        let mut luma = Array2::zeros(self.dims());
        for (c, weight) in LUMA_WEIGHTS.iter().enumerate() {
            luma.scaled_add(*weight, &self.plane(c));
        }
        luma
    }

    /// Same samples under a different sequence index.
    pub fn with_index(&self, index: u64) -> Frame {
        Frame {
            index,
            planes: Arc::clone(&self.planes),
        }
    }

    /// Clamp to the nominal range and round to the 8-bit grid.
    ///
    /// Out-of-range values saturate; they never wrap.
    pub fn quantized(&self) -> Frame {
        let planes = self.planes.mapv(quantize_sample);
        Frame {
            index: self.index,
            planes: Arc::new(planes),
        }
    }

    /// Interleaved 8-bit samples (`GRAY8` or `RGB24`).
    pub fn to_interleaved_u8(&self) -> Vec<u8> {
        let (channels, height, width) = self.planes.dim();
        let mut out = Vec::with_capacity(channels * height * width);
        for y in 0..height {
            for x in 0..width {
                for c in 0..channels {
                    out.push(quantize_sample(self.planes[[c, y, x]]) as u8);
                }
            }
        }
        out
    }
}

fn quantize_sample(value: f32) -> f32 {
    if value.is_nan() {
        return 0.0;
    }
    value.clamp(0.0, MAX_SAMPLE).round()
}

// ----------------------------------------------------------------------------
// CancelToken
// ----------------------------------------------------------------------------

/// Cooperative stop flag. Clones observe the same flag.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
