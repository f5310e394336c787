use ndarray::Array2;

use crate::error::Result;
use crate::flow::estimator::{check_pair, finish_field, MotionEstimator};
use crate::flow::field::MotionField;
use crate::flow::select::ComputeBackend;
use crate::frame::Frame;
use crate::imgproc::{build_pyramid, for_each_row, gaussian_blur, gradient, resize_bilinear, warp};

const MIN_LEVEL_SIDE: usize = 8;
const PRESMOOTH_SIGMA: f32 = 0.8;

/// Variational TV-L1 flow (Zach, Pock, Bischof duality scheme).
///
/// Works on luma in the 8-bit sample range; `lambda` is tuned for that range.
pub struct TvL1Flow {
    tau: f32,
    lambda: f32,
    theta: f32,
    scales: usize,
    warps: usize,
    epsilon: f32,
    iterations: usize,
    backend: ComputeBackend,
}

impl TvL1Flow {
    pub fn new(backend: ComputeBackend) -> Self {
        Self {
            tau: 0.25,
            lambda: 0.15,
            theta: 0.3,
            scales: 5,
            warps: 5,
            epsilon: 0.01,
            iterations: 100,
            backend,
        }
    }

    /// More warps and a tighter stopping threshold.
    pub fn fine(backend: ComputeBackend) -> Self {
        Self {
            warps: 10,
            epsilon: 0.005,
            iterations: 150,
            ..Self::new(backend)
        }
    }

    fn solve_level(
        &self,
        i0: &Array2<f32>,
        i1: &Array2<f32>,
        u1: &mut Array2<f32>,
        u2: &mut Array2<f32>,
    ) {
        let dims = i0.dim();
        let n = (dims.0 * dims.1) as f32;
        let stop = self.epsilon * self.epsilon * n;
        let ratio = self.tau / self.theta;
        let (gx, gy) = gradient(&i1.view());

        let mut p11 = Array2::zeros(dims);
        let mut p12 = Array2::zeros(dims);
        let mut p21 = Array2::zeros(dims);
        let mut p22 = Array2::zeros(dims);

        for _ in 0..self.warps {
            let i1w = warp(&i1.view(), u1, u2);
            let i1x = warp(&gx.view(), u1, u2);
            let i1y = warp(&gy.view(), u1, u2);
            let data = DataTerm {
                grad2: &i1x * &i1x + &i1y * &i1y,
                rho_c: &i1w - &(&i1x * &*u1) - &(&i1y * &*u2) - i0,
                i1x,
                i1y,
            };

            for _ in 0..self.iterations {
                let (v1, v2) = self.threshold(&data, u1, u2);
                let next_u1 = &v1 + &(divergence(&p11, &p12) * self.theta);
                let next_u2 = &v2 + &(divergence(&p21, &p22) * self.theta);

                let change: f32 = (&next_u1 - &*u1).mapv(|d| d * d).sum()
                    + (&next_u2 - &*u2).mapv(|d| d * d).sum();
                *u1 = next_u1;
                *u2 = next_u2;

                dual_step(&mut p11, &mut p12, u1, ratio);
                dual_step(&mut p21, &mut p22, u2, ratio);

                if change < stop {
                    break;
                }
            }
        }
    }

    /// Pointwise minimiser of the linearised data term.
    fn threshold(
        &self,
        data: &DataTerm,
        u1: &Array2<f32>,
        u2: &Array2<f32>,
    ) -> (Array2<f32>, Array2<f32>) {
        let lt = self.lambda * self.theta;
        let step_at = |y: usize, x: usize| -> (f32, f32) {
            let ix = data.i1x[[y, x]];
            let iy = data.i1y[[y, x]];
            let g2 = data.grad2[[y, x]];
            let rho = data.rho_c[[y, x]] + ix * u1[[y, x]] + iy * u2[[y, x]];
            if rho < -lt * g2 {
                (lt * ix, lt * iy)
            } else if rho > lt * g2 {
                (-lt * ix, -lt * iy)
            } else if g2 > 1e-10 {
                (-rho * ix / g2, -rho * iy / g2)
            } else {
                (0.0, 0.0)
            }
        };
        let parallel = self.backend.is_parallel();
        let mut v1 = Array2::zeros(u1.dim());
        let mut v2 = Array2::zeros(u2.dim());
        for_each_row(&mut v1, parallel, |y, mut row| {
            for (x, out) in row.iter_mut().enumerate() {
                *out = u1[[y, x]] + step_at(y, x).0;
            }
        });
        for_each_row(&mut v2, parallel, |y, mut row| {
            for (x, out) in row.iter_mut().enumerate() {
                *out = u2[[y, x]] + step_at(y, x).1;
            }
        });
        (v1, v2)
    }
}

/// Linearisation of the warped reference around the current flow.
struct DataTerm {
    i1x: Array2<f32>,
    i1y: Array2<f32>,
    grad2: Array2<f32>,
    rho_c: Array2<f32>,
}

/// Forward differences, zero on the far edge.
fn forward_gradient(u: &Array2<f32>) -> (Array2<f32>, Array2<f32>) {
    let (h, w) = u.dim();
    let ux = Array2::from_shape_fn((h, w), |(y, x)| {
        if x + 1 < w {
            u[[y, x + 1]] - u[[y, x]]
        } else {
            0.0
        }
    });
    let uy = Array2::from_shape_fn((h, w), |(y, x)| {
        if y + 1 < h {
            u[[y + 1, x]] - u[[y, x]]
        } else {
            0.0
        }
    });
    (ux, uy)
}

/// Backward-difference divergence, the negative adjoint of `forward_gradient`.
fn divergence(px: &Array2<f32>, py: &Array2<f32>) -> Array2<f32> {
    let (h, w) = px.dim();
    Array2::from_shape_fn((h, w), |(y, x)| {
        let mut div = 0.0;
        if x + 1 < w {
            div += px[[y, x]];
        }
        if x > 0 {
            div -= px[[y, x - 1]];
        }
        if y + 1 < h {
            div += py[[y, x]];
        }
        if y > 0 {
            div -= py[[y - 1, x]];
        }
        div
    })
}

fn dual_step(px: &mut Array2<f32>, py: &mut Array2<f32>, u: &Array2<f32>, ratio: f32) {
    let (ux, uy) = forward_gradient(u);
    let denom = ux
        .iter()
        .zip(uy.iter())
        .map(|(a, b)| 1.0 + ratio * (a * a + b * b).sqrt());
    for (((p, q), d), (gx, gy)) in px
        .iter_mut()
        .zip(py.iter_mut())
        .zip(denom)
        .zip(ux.iter().zip(uy.iter()))
    {
        *p = (*p + ratio * gx) / d;
        *q = (*q + ratio * gy) / d;
    }
}

impl MotionEstimator for TvL1Flow {
    fn name(&self) -> &'static str {
        "tv-l1"
    }

    fn backend(&self) -> ComputeBackend {
        self.backend
    }

    fn estimate(&self, reference: &Frame, source: &Frame) -> Result<MotionField> {
        check_pair(reference, source)?;
        let i0 = gaussian_blur(&source.luma().view(), PRESMOOTH_SIGMA);
        let i1 = gaussian_blur(&reference.luma().view(), PRESMOOTH_SIGMA);
        let src_pyr = build_pyramid(&i0.view(), self.scales, MIN_LEVEL_SIDE);
        let ref_pyr = build_pyramid(&i1.view(), self.scales, MIN_LEVEL_SIDE);

        let coarsest = src_pyr[src_pyr.len() - 1].dim();
        let mut u1 = Array2::zeros(coarsest);
        let mut u2 = Array2::zeros(coarsest);
        for level in (0..src_pyr.len()).rev() {
            let dims = src_pyr[level].dim();
            if u1.dim() != dims {
                let sy = dims.0 as f32 / u1.nrows() as f32;
                let sx = dims.1 as f32 / u1.ncols() as f32;
                u1 = resize_bilinear(&u1.view(), dims).mapv(|d| d * sx);
                u2 = resize_bilinear(&u2.view(), dims).mapv(|d| d * sy);
            }
            self.solve_level(&src_pyr[level], &ref_pyr[level], &mut u1, &mut u2);
        }
        finish_field(reference, source, u1, u2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::backends::test_support::{interior_mean, shifted_pair};

    #[test]
    fn recovers_one_pixel_shift() {
        let (reference, source) = shifted_pair(48, 48, 1.0, 0.0);
        let field = TvL1Flow::new(ComputeBackend::Cpu)
            .estimate(&reference, &source)
            .unwrap();
        let (dx, dy) = interior_mean(&field, 8);
        assert!((dx + 1.0).abs() < 0.3, "dx = {dx}");
        assert!(dy.abs() < 0.3, "dy = {dy}");
    }

    #[test]
    fn identical_frames_give_zero_motion() {
        let (reference, _) = shifted_pair(32, 32, 0.0, 0.0);
        let field = TvL1Flow::fine(ComputeBackend::Cpu)
            .estimate(&reference, &reference)
            .unwrap();
        assert!(field.mean_magnitude() < 1e-6);
    }

    #[test]
    fn accelerated_backend_matches_cpu() {
        let (reference, source) = shifted_pair(32, 32, 0.5, 0.5);
        let cpu = TvL1Flow::new(ComputeBackend::Cpu)
            .estimate(&reference, &source)
            .unwrap();
        let accel = TvL1Flow::new(ComputeBackend::Accelerated)
            .estimate(&reference, &source)
            .unwrap();
        assert_eq!(cpu, accel);
    }

    #[test]
    fn repeated_calls_are_identical() {
        let (reference, source) = shifted_pair(40, 40, 1.5, -0.5);
        let flow = TvL1Flow::fine(ComputeBackend::Accelerated);
        let a = flow.estimate(&reference, &source).unwrap();
        let b = flow.estimate(&reference, &source).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn divergence_is_negative_adjoint_of_gradient() {
        let u = Array2::from_shape_fn((5, 6), |(y, x)| ((y * 7 + x * 3) % 5) as f32);
        let px = Array2::from_shape_fn((5, 6), |(y, x)| ((y + 2 * x) % 3) as f32 - 1.0);
        let py = Array2::from_shape_fn((5, 6), |(y, x)| ((3 * y + x) % 4) as f32 - 1.5);
        let (ux, uy) = forward_gradient(&u);
        let lhs: f32 = (&ux * &px).sum() + (&uy * &py).sum();
        let rhs: f32 = -(&u * &divergence(&px, &py)).sum();
        assert!((lhs - rhs).abs() < 1e-4);
    }
}
