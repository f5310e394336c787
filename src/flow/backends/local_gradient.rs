use ndarray::Array2;

use crate::error::Result;
use crate::flow::estimator::{check_pair, finish_field, normalized_pair, MotionEstimator};
use crate::flow::field::MotionField;
use crate::flow::select::ComputeBackend;
use crate::frame::Frame;
use crate::imgproc::{box_filter, build_pyramid, for_each_row, gradient, resize_bilinear, warp};

/// Coarsest pyramid side, in pixels.
const MIN_LEVEL_SIDE: usize = 8;

/// Tikhonov term on the structure tensor; keeps flat regions at zero update.
const TENSOR_EPSILON: f32 = 1e-5;

/// Per-iteration update cap, in pixels of the current level.
const MAX_STEP: f32 = 1.0;

/// Pyramidal dense local-gradient flow (windowed Lucas-Kanade at every pixel).
pub struct LocalGradientFlow {
    levels: usize,
    window_radius: usize,
    iterations: usize,
    backend: ComputeBackend,
}

impl LocalGradientFlow {
    /// Fast preset: 3 levels, 5×5 window.
    pub fn new(backend: ComputeBackend) -> Self {
        Self {
            levels: 3,
            window_radius: 2,
            iterations: 3,
            backend,
        }
    }

    /// Deep preset: 5 levels, 9×9 window, for larger displacements.
    pub fn deep(backend: ComputeBackend) -> Self {
        Self {
            levels: 5,
            window_radius: 4,
            iterations: 4,
            backend,
        }
    }

    fn refine_level(
        &self,
        source: &Array2<f32>,
        reference: &Array2<f32>,
        u: &mut Array2<f32>,
        v: &mut Array2<f32>,
    ) {
        let (ref_gx, ref_gy) = gradient(&reference.view());
        for _ in 0..self.iterations {
            let warped = warp(&reference.view(), u, v);
            let gx = warp(&ref_gx.view(), u, v);
            let gy = warp(&ref_gy.view(), u, v);
            let it = &warped - source;

            let r = self.window_radius;
            let ixx = box_filter(&(&gx * &gx).view(), r);
            let ixy = box_filter(&(&gx * &gy).view(), r);
            let iyy = box_filter(&(&gy * &gy).view(), r);
            let ixt = box_filter(&(&gx * &it).view(), r);
            let iyt = box_filter(&(&gy * &it).view(), r);

            let solve_at = |y: usize, x: usize| {
                solve_tensor(
                    ixx[[y, x]],
                    ixy[[y, x]],
                    iyy[[y, x]],
                    ixt[[y, x]],
                    iyt[[y, x]],
                )
            };
            let parallel = self.backend.is_parallel();
            let mut du = Array2::zeros(u.dim());
            let mut dv = Array2::zeros(v.dim());
            for_each_row(&mut du, parallel, |y, mut row| {
                for (x, out) in row.iter_mut().enumerate() {
                    *out = solve_at(y, x).0;
                }
            });
            for_each_row(&mut dv, parallel, |y, mut row| {
                for (x, out) in row.iter_mut().enumerate() {
                    *out = solve_at(y, x).1;
                }
            });
            *u += &du;
            *v += &dv;
        }
    }
}

/// Solve `A·δ = -b` for the 2×2 structure tensor `A`, with a capped step.
fn solve_tensor(a11: f32, a12: f32, a22: f32, bx: f32, by: f32) -> (f32, f32) {
    let a11 = a11 + TENSOR_EPSILON;
    let a22 = a22 + TENSOR_EPSILON;
    let det = a11 * a22 - a12 * a12;
    if det.abs() < f32::EPSILON {
        return (0.0, 0.0);
    }
    let du = -(a22 * bx - a12 * by) / det;
    let dv = -(a11 * by - a12 * bx) / det;
    (du.clamp(-MAX_STEP, MAX_STEP), dv.clamp(-MAX_STEP, MAX_STEP))
}

impl MotionEstimator for LocalGradientFlow {
    fn name(&self) -> &'static str {
        "local-gradient"
    }

    fn backend(&self) -> ComputeBackend {
        self.backend
    }

    fn estimate(&self, reference: &Frame, source: &Frame) -> Result<MotionField> {
        check_pair(reference, source)?;
        let (i0, i1) = normalized_pair(reference, source);
        let src_pyr = build_pyramid(&i0.view(), self.levels, MIN_LEVEL_SIDE);
        let ref_pyr = build_pyramid(&i1.view(), self.levels, MIN_LEVEL_SIDE);

        let coarsest = src_pyr[src_pyr.len() - 1].dim();
        let mut u = Array2::zeros(coarsest);
        let mut v = Array2::zeros(coarsest);
        for level in (0..src_pyr.len()).rev() {
            let dims = src_pyr[level].dim();
            if u.dim() != dims {
                let sy = dims.0 as f32 / u.nrows() as f32;
                let sx = dims.1 as f32 / u.ncols() as f32;
                u = resize_bilinear(&u.view(), dims).mapv(|d| d * sx);
                v = resize_bilinear(&v.view(), dims).mapv(|d| d * sy);
            }
            self.refine_level(&src_pyr[level], &ref_pyr[level], &mut u, &mut v);
        }
        finish_field(reference, source, u, v)
    }
}
