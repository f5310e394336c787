use ndarray::{Array2, ArrayView2};

use crate::error::{Result, SuperResError};
use crate::imgproc::sample_bilinear;

/// Dense displacement field on a source frame's grid.
///
/// Source pixel `(y, x)` corresponds to reference pixel
/// `(y + dy[y, x], x + dx[y, x])`, so `reference(p + d(p)) ≈ source(p)`.
#[derive(Clone, Debug, PartialEq)]
pub struct MotionField {
    dx: Array2<f32>,
    dy: Array2<f32>,
}

impl MotionField {
    /// Field with no motion.
    pub fn zeros(dims: (usize, usize)) -> Self {
        Self {
            dx: Array2::zeros(dims),
            dy: Array2::zeros(dims),
        }
    }

    /// Field with the same displacement everywhere.
    pub fn uniform(dims: (usize, usize), dx: f32, dy: f32) -> Self {
        Self {
            dx: Array2::from_elem(dims, dx),
            dy: Array2::from_elem(dims, dy),
        }
    }

    pub fn from_components(dx: Array2<f32>, dy: Array2<f32>) -> Result<Self> {
        if dx.dim() != dy.dim() {
            return Err(SuperResError::FrameMismatch(format!(
                "motion components differ in shape: {:?} vs {:?}",
                dx.dim(),
                dy.dim()
            )));
        }
        Ok(Self { dx, dy })
    }

    /// `(height, width)`.
    pub fn dims(&self) -> (usize, usize) {
        self.dx.dim()
    }

    pub fn dx(&self) -> ArrayView2<'_, f32> {
        self.dx.view()
    }

    pub fn dy(&self) -> ArrayView2<'_, f32> {
        self.dy.view()
    }

    /// Displacement `(dx, dy)` at an integer position.
    pub fn get(&self, y: usize, x: usize) -> Option<(f32, f32)> {
        Some((*self.dx.get((y, x))?, *self.dy.get((y, x))?))
    }

    /// Bilinearly interpolated displacement at a fractional position.
    pub fn sample(&self, y: f32, x: f32) -> (f32, f32) {
        (
            sample_bilinear(&self.dx.view(), y, x),
            sample_bilinear(&self.dy.view(), y, x),
        )
    }

    /// Multiply every vector by `factor`.
    pub fn scaled(&self, factor: f32) -> Self {
        Self {
            dx: self.dx.mapv(|v| v * factor),
            dy: self.dy.mapv(|v| v * factor),
        }
    }

    pub fn mean_magnitude(&self) -> f32 {
        let n = self.dx.len().max(1) as f32;
        self.dx
            .iter()
            .zip(self.dy.iter())
            .map(|(u, v)| (u * u + v * v).sqrt())
            .sum::<f32>()
            / n
    }

    pub fn is_finite(&self) -> bool {
        self.dx.iter().chain(self.dy.iter()).all(|v| v.is_finite())
    }
}
