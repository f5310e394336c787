//! Image-plane primitives used by the estimators and the engine.
//!
//! All functions operate on single-channel `f32` planes. Out-of-bounds reads
//! clamp to the nearest edge sample.

use ndarray::parallel::prelude::*;
use ndarray::{Array2, ArrayView2, ArrayViewMut1, Axis};

/// Bilinear tap: four flat indices and their weights.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Tap {
    pub index: [usize; 4],
    pub weight: [f32; 4],
}

impl Tap {
    /// Edge-clamped bilinear tap at `(y, x)` on a `(height, width)` grid.
    pub fn at(y: f32, x: f32, height: usize, width: usize) -> Self {
        let (y0, y1, fy) = axis_tap(y, height);
        let (x0, x1, fx) = axis_tap(x, width);
        Tap {
            index: [
                y0 * width + x0,
                y0 * width + x1,
                y1 * width + x0,
                y1 * width + x1,
            ],
            weight: [
                (1.0 - fy) * (1.0 - fx),
                (1.0 - fy) * fx,
                fy * (1.0 - fx),
                fy * fx,
            ],
        }
    }

    /// Tap that reads exactly one sample.
    pub fn identity(flat: usize) -> Self {
        Tap {
            index: [flat, flat, flat, flat],
            weight: [1.0, 0.0, 0.0, 0.0],
        }
    }

    pub fn gather(&self, data: &[f32]) -> f32 {
        self.index
            .iter()
            .zip(self.weight.iter())
            .map(|(&i, &w)| data[i] * w)
            .sum()
    }

    pub fn scatter(&self, data: &mut [f32], value: f32) {
        for (&i, &w) in self.index.iter().zip(self.weight.iter()) {
            data[i] += value * w;
        }
    }
}

fn axis_tap(pos: f32, len: usize) -> (usize, usize, f32) {
    let max = (len - 1) as f32;
    let pos = if pos.is_finite() { pos.clamp(0.0, max) } else { 0.0 };
    let i0 = pos.floor() as usize;
    let i1 = (i0 + 1).min(len - 1);
    (i0, i1, pos - i0 as f32)
}

/// Edge-clamped bilinear sample.
pub fn sample_bilinear(img: &ArrayView2<f32>, y: f32, x: f32) -> f32 {
    let (h, w) = img.dim();
    let (y0, y1, fy) = axis_tap(y, h);
    let (x0, x1, fx) = axis_tap(x, w);
    let top = img[[y0, x0]] * (1.0 - fx) + img[[y0, x1]] * fx;
    let bottom = img[[y1, x0]] * (1.0 - fx) + img[[y1, x1]] * fx;
    top * (1.0 - fy) + bottom * fy
}

/// Map an output pixel centre to input coordinates for a `scale` resize.
pub fn source_coord(out: usize, scale: f32) -> f32 {
    (out as f32 + 0.5) / scale - 0.5
}

/// Fill `out` row by row, optionally across the worker pool.
///
/// Both paths run the same closure per row, so results are identical.
pub fn for_each_row<F>(out: &mut Array2<f32>, parallel: bool, f: F)
where
    F: Fn(usize, ArrayViewMut1<'_, f32>) + Sync + Send,
{
    if parallel {
        out.axis_iter_mut(Axis(0))
            .into_par_iter()
            .enumerate()
            .for_each(|(y, row)| f(y, row));
    } else {
        for (y, row) in out.axis_iter_mut(Axis(0)).enumerate() {
            f(y, row);
        }
    }
}

// ----------------------------------------------------------------------------
// Resampling
// ----------------------------------------------------------------------------

/// Bilinear upsampling by an integer factor.
pub fn upsample_bilinear(img: &ArrayView2<f32>, scale: usize) -> Array2<f32> {
    let (h, w) = img.dim();
    let s = scale as f32;
    Array2::from_shape_fn((h * scale, w * scale), |(y, x)| {
        sample_bilinear(img, source_coord(y, s), source_coord(x, s))
    })
}

/// Bilinear resize to arbitrary dimensions.
pub fn resize_bilinear(img: &ArrayView2<f32>, dims: (usize, usize)) -> Array2<f32> {
    let (h, w) = img.dim();
    let sy = dims.0 as f32 / h as f32;
    let sx = dims.1 as f32 / w as f32;
    Array2::from_shape_fn(dims, |(y, x)| {
        sample_bilinear(img, source_coord(y, sy), source_coord(x, sx))
    })
}

/// `scale × scale` box average. Input dimensions must be multiples of `scale`.
pub fn box_downsample(img: &ArrayView2<f32>, scale: usize) -> Array2<f32> {
    let (h, w) = img.dim();
    let norm = 1.0 / (scale * scale) as f32;
    let mut out = Array2::zeros((h / scale, w / scale));
    for ((y, x), v) in img.indexed_iter() {
        if y / scale < out.nrows() && x / scale < out.ncols() {
            out[[y / scale, x / scale]] += *v;
        }
    }
    out.mapv_inplace(|v| v * norm);
    out
}

/// Nearest-neighbour replication of each sample over a `scale × scale` block.
pub fn replicate(img: &ArrayView2<f32>, scale: usize) -> Array2<f32> {
    let (h, w) = img.dim();
    Array2::from_shape_fn((h * scale, w * scale), |(y, x)| img[[y / scale, x / scale]])
}

// ----------------------------------------------------------------------------
// Filtering
// ----------------------------------------------------------------------------

/// Central-difference gradients `(d/dx, d/dy)`.
pub fn gradient(img: &ArrayView2<f32>) -> (Array2<f32>, Array2<f32>) {
    let (h, w) = img.dim();
    let gx = Array2::from_shape_fn((h, w), |(y, x)| {
        let l = img[[y, x.saturating_sub(1)]];
        let r = img[[y, (x + 1).min(w - 1)]];
        (r - l) * 0.5
    });
    let gy = Array2::from_shape_fn((h, w), |(y, x)| {
        let u = img[[y.saturating_sub(1), x]];
        let d = img[[(y + 1).min(h - 1), x]];
        (d - u) * 0.5
    });
    (gx, gy)
}

fn separable(img: &ArrayView2<f32>, kernel: &[f32]) -> Array2<f32> {
    let (h, w) = img.dim();
    let r = (kernel.len() / 2) as isize;
    let clamp = |v: isize, len: usize| v.clamp(0, len as isize - 1) as usize;
    let horizontal = Array2::from_shape_fn((h, w), |(y, x)| {
        kernel
            .iter()
            .enumerate()
            .map(|(k, kw)| kw * img[[y, clamp(x as isize + k as isize - r, w)]])
            .sum::<f32>()
    });
    Array2::from_shape_fn((h, w), |(y, x)| {
        kernel
            .iter()
            .enumerate()
            .map(|(k, kw)| kw * horizontal[[clamp(y as isize + k as isize - r, h), x]])
            .sum::<f32>()
    })
}

/// Separable Gaussian blur. `sigma <= 0` returns a copy.
pub fn gaussian_blur(img: &ArrayView2<f32>, sigma: f32) -> Array2<f32> {
    if sigma <= 0.0 {
        return img.to_owned();
    }
    let radius = (sigma * 3.0).ceil() as isize;
    let mut kernel: Vec<f32> = (-radius..=radius)
        .map(|i| (-((i * i) as f32) / (2.0 * sigma * sigma)).exp())
        .collect();
    let total: f32 = kernel.iter().sum();
    kernel.iter_mut().for_each(|k| *k /= total);
    separable(img, &kernel)
}

/// Separable mean over a `(2r+1)²` window.
pub fn box_filter(img: &ArrayView2<f32>, radius: usize) -> Array2<f32> {
    let len = 2 * radius + 1;
    let kernel = vec![1.0 / len as f32; len];
    separable(img, &kernel)
}

/// Backward warp: `out(y, x) = img(y + v(y, x), x + u(y, x))`.
pub fn warp(img: &ArrayView2<f32>, u: &Array2<f32>, v: &Array2<f32>) -> Array2<f32> {
    Array2::from_shape_fn(u.dim(), |(y, x)| {
        sample_bilinear(img, y as f32 + v[[y, x]], x as f32 + u[[y, x]])
    })
}

// ----------------------------------------------------------------------------
// Pyramids
// ----------------------------------------------------------------------------

/// Blur and halve.
pub fn pyr_down(img: &ArrayView2<f32>) -> Array2<f32> {
    let blurred = gaussian_blur(img, 1.0);
    let (h, w) = img.dim();
    let dims = (h.div_ceil(2), w.div_ceil(2));
    Array2::from_shape_fn(dims, |(y, x)| {
        blurred[[(2 * y).min(h - 1), (2 * x).min(w - 1)]]
    })
}

/// Gaussian pyramid, finest level first. Stops before a side drops under `min_side`.
pub fn build_pyramid(img: &ArrayView2<f32>, levels: usize, min_side: usize) -> Vec<Array2<f32>> {
    let mut pyramid = vec![img.to_owned()];
    while pyramid.len() < levels.max(1) {
        let last = pyramid.last().map(|l| l.dim()).unwrap_or((0, 0));
        if last.0.div_ceil(2) < min_side || last.1.div_ceil(2) < min_side {
            break;
        }
        let next = pyr_down(&pyramid[pyramid.len() - 1].view());
        pyramid.push(next);
    }
    pyramid
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(h: usize, w: usize) -> Array2<f32> {
        Array2::from_shape_fn((h, w), |(y, x)| (y * w + x) as f32)
    }

    #[test]
    fn box_downsample_inverts_replicate() {
        let img = ramp(3, 4);
        let up = replicate(&img.view(), 3);
        assert_eq!(up.dim(), (9, 12));
        let down = box_downsample(&up.view(), 3);
        assert_eq!(down, img);
    }

    #[test]
    fn upsample_of_constant_is_constant() {
        let img = Array2::from_elem((4, 5), 42.0f32);
        let up = upsample_bilinear(&img.view(), 4);
        assert_eq!(up.dim(), (16, 20));
        assert!(up.iter().all(|v| (*v - 42.0).abs() < 1e-4));
    }

    #[test]
    fn tap_scatter_is_adjoint_of_gather() {
        let src = ramp(5, 6);
        let tap = Tap::at(1.3, 2.75, 5, 6);
        let gathered = tap.gather(src.as_slice().unwrap());
        let mut acc = vec![0.0f32; 30];
        tap.scatter(&mut acc, 1.0);
        let dot: f32 = acc.iter().zip(src.iter()).map(|(a, b)| a * b).sum();
        assert!((gathered - dot).abs() < 1e-3);
    }

    #[test]
    fn sampling_clamps_outside_grid() {
        let img = ramp(3, 3);
        assert_eq!(sample_bilinear(&img.view(), -4.0, -1.0), 0.0);
        assert_eq!(sample_bilinear(&img.view(), 10.0, 10.0), 8.0);
    }

    #[test]
    fn gradient_of_horizontal_ramp() {
        let img = Array2::from_shape_fn((4, 6), |(_, x)| 2.0 * x as f32);
        let (gx, gy) = gradient(&img.view());
        assert!((gx[[2, 3]] - 2.0).abs() < 1e-5);
        assert!(gy.iter().all(|v| v.abs() < 1e-5));
    }

    #[test]
    fn gaussian_blur_keeps_constants_and_smooths_steps() {
        let flat = Array2::from_elem((6, 7), 3.0f32);
        let blurred = gaussian_blur(&flat.view(), 1.2);
        assert!(blurred.iter().all(|v| (*v - 3.0).abs() < 1e-4));

        let step = Array2::from_shape_fn((5, 8), |(_, x)| if x < 4 { 0.0f32 } else { 10.0 });
        let smoothed = gaussian_blur(&step.view(), 1.0);
        assert!(smoothed[[2, 3]] > 0.0 && smoothed[[2, 4]] < 10.0);
        assert!(smoothed[[2, 3]] < smoothed[[2, 4]]);
        let mean = box_filter(&step.view(), 1);
        assert!((mean[[2, 3]] - 10.0 / 3.0).abs() < 1e-4);
    }

    #[test]
    fn pyramid_respects_min_side() {
        let img = ramp(32, 40);
        let pyramid = build_pyramid(&img.view(), 6, 8);
        let dims: Vec<_> = pyramid.iter().map(|l| l.dim()).collect();
        assert_eq!(dims, vec![(32, 40), (16, 20), (8, 10)]);
    }

    #[test]
    fn parallel_rows_match_sequential() {
        let mut a = Array2::zeros((7, 9));
        let mut b = Array2::zeros((7, 9));
        fn fill(y: usize, mut row: ArrayViewMut1<'_, f32>) {
            for (x, v) in row.iter_mut().enumerate() {
                *v = (y * 31 + x) as f32 * 0.5;
            }
        }
        for_each_row(&mut a, false, fill);
        for_each_row(&mut b, true, fill);
        assert_eq!(a, b);
    }
}
