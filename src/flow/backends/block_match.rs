use ndarray::Array2;
use rayon::prelude::*;

use crate::error::Result;
use crate::flow::estimator::{check_pair, finish_field, normalized_pair, MotionEstimator};
use crate::flow::field::MotionField;
use crate::flow::select::ComputeBackend;
use crate::frame::Frame;
use crate::imgproc::{sample_bilinear, source_coord};

/// Exhaustive block matching with sub-pixel refinement.
///
/// One vector per `block × block` tile, found by minimising the sum of
/// absolute differences over a `±search` pixel square, then densified to the
/// full grid by bilinear interpolation between tile centres.
pub struct BlockMatchFlow {
    block: usize,
    search: isize,
    backend: ComputeBackend,
}

impl BlockMatchFlow {
    pub fn new(backend: ComputeBackend) -> Self {
        Self {
            block: 8,
            search: 7,
            backend,
        }
    }

    fn match_block(
        &self,
        source: &Array2<f32>,
        reference: &Array2<f32>,
        by: usize,
        bx: usize,
    ) -> (f32, f32) {
        let (h, w) = source.dim();
        let y0 = by * self.block;
        let x0 = bx * self.block;
        let y1 = (y0 + self.block).min(h);
        let x1 = (x0 + self.block).min(w);

        let cost = |dy: isize, dx: isize| -> f32 {
            let mut sad = 0.0;
            for y in y0..y1 {
                let ry = (y as isize + dy).clamp(0, h as isize - 1) as usize;
                for x in x0..x1 {
                    let rx = (x as isize + dx).clamp(0, w as isize - 1) as usize;
                    sad += (reference[[ry, rx]] - source[[y, x]]).abs();
                }
            }
            sad
        };

        let side = (2 * self.search + 1) as usize;
        let mut costs = vec![f32::INFINITY; side * side];
        let mut best = (0isize, 0isize);
        let mut best_cost = f32::INFINITY;
        for dy in -self.search..=self.search {
            for dx in -self.search..=self.search {
                let c = cost(dy, dx);
                costs[(dy + self.search) as usize * side + (dx + self.search) as usize] = c;
                // Ties prefer the smaller displacement.
                let closer = dx.abs() + dy.abs() < best.0.abs() + best.1.abs();
                if c < best_cost || (c == best_cost && closer) {
                    best_cost = c;
                    best = (dy, dx);
                }
            }
        }

        let at = |dy: isize, dx: isize| -> Option<f32> {
            if dy.abs() > self.search || dx.abs() > self.search {
                return None;
            }
            Some(costs[(dy + self.search) as usize * side + (dx + self.search) as usize])
        };
        let (dy, dx) = best;
        let fx = subpixel(at(dy, dx - 1), best_cost, at(dy, dx + 1));
        let fy = subpixel(at(dy - 1, dx), best_cost, at(dy + 1, dx));
        (dx as f32 + fx, dy as f32 + fy)
    }
}

/// Parabolic vertex offset through three equally spaced costs.
fn subpixel(before: Option<f32>, centre: f32, after: Option<f32>) -> f32 {
    if centre <= f32::EPSILON {
        return 0.0;
    }
    match (before, after) {
        (Some(a), Some(b)) => {
            let curvature = a - 2.0 * centre + b;
            if curvature <= f32::EPSILON {
                0.0
            } else {
                (0.5 * (a - b) / curvature).clamp(-0.5, 0.5)
            }
        }
        _ => 0.0,
    }
}

impl MotionEstimator for BlockMatchFlow {
    fn name(&self) -> &'static str {
        "block-match"
    }

    fn backend(&self) -> ComputeBackend {
        self.backend
    }

    fn estimate(&self, reference: &Frame, source: &Frame) -> Result<MotionField> {
        check_pair(reference, source)?;
        let (i0, i1) = normalized_pair(reference, source);
        let (h, w) = i0.dim();
        let rows = h.div_ceil(self.block);
        let cols = w.div_ceil(self.block);

        let solve = |n: usize| self.match_block(&i0, &i1, n / cols, n % cols);
        let vectors: Vec<(f32, f32)> = if self.backend.is_parallel() {
            (0..rows * cols).into_par_iter().map(solve).collect()
        } else {
            (0..rows * cols).map(solve).collect()
        };

        let coarse_dx = Array2::from_shape_fn((rows, cols), |(r, c)| vectors[r * cols + c].0);
        let coarse_dy = Array2::from_shape_fn((rows, cols), |(r, c)| vectors[r * cols + c].1);
        let s = self.block as f32;
        let densify = |coarse: &Array2<f32>| {
            Array2::from_shape_fn((h, w), |(y, x)| {
                sample_bilinear(&coarse.view(), source_coord(y, s), source_coord(x, s))
            })
        };
        finish_field(reference, source, densify(&coarse_dx), densify(&coarse_dy))
    }
}
