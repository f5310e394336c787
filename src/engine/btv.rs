use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};

/// Iteration and regulariser constants.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BtvParams {
    /// Gradient step applied to every correction.
    pub step: f32,
    /// Regulariser weight.
    pub lambda: f32,
    /// Spatial decay of the shift weights, `0 < alpha <= 1`.
    pub alpha: f32,
    /// Largest shift, in HR pixels, along each axis.
    pub radius: usize,
}

impl Default for BtvParams {
    fn default() -> Self {
        Self {
            step: 0.5,
            lambda: 0.03,
            alpha: 0.7,
            radius: 3,
        }
    }
}

fn sign(v: f32) -> f32 {
    if v > 0.0 {
        1.0
    } else if v < 0.0 {
        -1.0
    } else {
        0.0
    }
}

/// Subgradient of the bilateral total variation
/// `sum_{l,m} alpha^(|l|+|m|) * || x - shift(x, l, m) ||_1`.
///
/// Shifts clamp at the border; the scatter term is the exact transpose of
/// the clamped shift.
pub fn btv_gradient(x: &ArrayView2<f32>, radius: usize, alpha: f32) -> Array2<f32> {
    let (h, w) = x.dim();
    let mut grad = Array2::zeros((h, w));
    if radius == 0 {
        return grad;
    }
    let r = radius as isize;
    for m in -r..=r {
        for l in -r..=r {
            if l == 0 && m == 0 {
                continue;
            }
            let weight = alpha.powi((l.abs() + m.abs()) as i32);
            for y in 0..h {
                let sy = (y as isize + m).clamp(0, h as isize - 1) as usize;
                for xx in 0..w {
                    let sx = (xx as isize + l).clamp(0, w as isize - 1) as usize;
                    let d = weight * sign(x[[y, xx]] - x[[sy, sx]]);
                    grad[[y, xx]] += d;
                    grad[[sy, sx]] -= d;
                }
            }
        }
    }
    grad
}

/// Value of the regulariser, for tests and diagnostics.
pub fn btv_value(x: &ArrayView2<f32>, radius: usize, alpha: f32) -> f32 {
    let (h, w) = x.dim();
    let r = radius as isize;
    let mut total = 0.0;
    for m in -r..=r {
        for l in -r..=r {
            if l == 0 && m == 0 {
                continue;
            }
            let weight = alpha.powi((l.abs() + m.abs()) as i32);
            for y in 0..h {
                let sy = (y as isize + m).clamp(0, h as isize - 1) as usize;
                for xx in 0..w {
                    let sx = (xx as isize + l).clamp(0, w as isize - 1) as usize;
                    total += weight * (x[[y, xx]] - x[[sy, sx]]).abs();
                }
            }
        }
    }
    total
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_image_has_zero_gradient() {
        let img = Array2::from_elem((6, 7), 12.0f32);
        let grad = btv_gradient(&img.view(), 3, 0.7);
        assert!(grad.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn gradient_preserves_mean_intensity() {
        let img = Array2::from_shape_fn((10, 10), |(y, x)| ((x * 37 + y * 11) % 23) as f32);
        let grad = btv_gradient(&img.view(), 2, 0.7);
        assert!(grad.sum().abs() < 1e-3);
    }

    #[test]
    fn smoothing_a_lone_spike_lowers_the_penalty() {
        let mut img = Array2::zeros((9, 9));
        img[[4, 4]] = 90.0;
        let before = btv_value(&img.view(), 2, 0.7);
        let mut smoothed = img.clone();
        smoothed[[4, 4]] = 60.0;
        assert!(btv_value(&smoothed.view(), 2, 0.7) < before);
    }

    #[test]
    fn isolated_peak_is_pulled_down() {
        let mut img = Array2::zeros((7, 7));
        img[[3, 3]] = 100.0;
        let grad = btv_gradient(&img.view(), 1, 0.7);
        assert!(grad[[3, 3]] > 0.0);
        assert!(grad[[3, 4]] < 0.0);
    }

    #[test]
    fn defaults_match_documented_constants() {
        let params = BtvParams::default();
        assert_eq!(params.step, 0.5);
        assert_eq!(params.lambda, 0.03);
        assert_eq!(params.alpha, 0.7);
        assert_eq!(params.radius, 3);
    }
}
