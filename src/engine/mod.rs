//! Iterative multi-frame reconstruction.
//!
//! For the current reference, the engine gathers every buffered frame with
//! its motion field, starts from a bilinear upsample of the reference, and
//! runs a fixed number of gradient steps on
//!
//! ```text
//! (1 / 2K) * sum_k || y_k - D W_k x ||^2  +  lambda * BTV(x)
//! ```
//!
//! where `W_k` warps the estimate into frame `k`, `D` integrates each
//! `scale × scale` block, and `K` is the number of usable frames.

mod btv;
mod observation;

pub use btv::{btv_gradient, btv_value, BtvParams};
pub use observation::SampleMap;

use ndarray::{Array3, ArrayView2};
use rayon::prelude::*;

use crate::config::SuperResConfig;
use crate::error::{Result, SuperResError};
use crate::flow::{
    create_estimator, select_backend, ComputeBackend, DeviceCapabilities, MotionEstimator,
};
use crate::frame::{CancelToken, Frame};
use crate::imgproc::upsample_bilinear;
use crate::window::TemporalWindow;

/// One emitted high-resolution frame.
#[derive(Clone, Debug)]
pub struct Reconstruction {
    /// Quantised output carrying the reference's sequence index.
    pub frame: Frame,
    /// One message per window entry excluded from this cycle.
    pub warnings: Vec<String>,
    /// Data residual RMS before each update.
    pub residual_trace: Vec<f32>,
}

pub struct SuperResolution {
    config: SuperResConfig,
    backend: ComputeBackend,
    estimator: Box<dyn MotionEstimator>,
    window: TemporalWindow,
}

impl SuperResolution {
    /// Resolve the backend against `capabilities` and build the configured estimator.
    pub fn new(config: SuperResConfig, capabilities: &DeviceCapabilities) -> Result<Self> {
        config.validate()?;
        let backend = select_backend(config.backend, capabilities);
        let estimator = create_estimator(config.flow, backend);
        Self::with_estimator(config, estimator)
    }

    /// Use a caller-supplied estimator. Its backend drives the engine's kernels too.
    pub fn with_estimator(
        config: SuperResConfig,
        estimator: Box<dyn MotionEstimator>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            backend: estimator.backend(),
            window: TemporalWindow::new(config.temporal_radius),
            config,
            estimator,
        })
    }

    pub fn config(&self) -> &SuperResConfig {
        &self.config
    }

    pub fn backend(&self) -> ComputeBackend {
        self.backend
    }

    pub fn estimator_name(&self) -> &'static str {
        self.estimator.name()
    }

    pub fn window(&self) -> &TemporalWindow {
        &self.window
    }

    /// Buffer the next input frame.
    pub fn push(&mut self, frame: Frame) -> Result<()> {
        self.window.advance(frame)
    }

    /// The reference has its full look-ahead.
    pub fn is_ready(&self) -> bool {
        self.window.is_ready()
    }

    /// Some buffered frame has not been emitted.
    pub fn has_pending(&self) -> bool {
        self.window.has_pending()
    }

    /// Reconstruct the current reference and move to the next one.
    ///
    /// Returns `Ok(None)` when nothing is pending or when `cancel` fires
    /// between iterations; a cancelled cycle leaves the reference in place.
    pub fn reconstruct(&mut self, cancel: &CancelToken) -> Result<Option<Reconstruction>> {
        let Some(reference) = self.window.reference_frame().cloned() else {
            return Ok(None);
        };
        if !self.window.has_pending() {
            return Ok(None);
        }
        let scale = self.config.scale;
        let params = self.config.btv;
        let parallel = self.backend.is_parallel();

        let aligned = self.window.motion_fields(self.estimator.as_ref());
        let mut warnings = Vec::new();
        let mut usable = Vec::with_capacity(aligned.len());
        for entry in aligned {
            match entry.field {
                Ok(_) if entry.offset == 0 => {
                    usable.push((SampleMap::identity(reference.dims(), scale), entry.frame));
                }
                Ok(field) => usable.push((SampleMap::new(field, scale), entry.frame)),
                Err(reason) => {
                    let msg = format!(
                        "frame {} excluded from reconstruction of frame {}: {}",
                        entry.frame.index(),
                        reference.index(),
                        reason
                    );
                    log::warn!("{}", msg);
                    warnings.push(msg);
                }
            }
        }

        let (h, w) = reference.dims();
        let hr_dims = (h * scale, w * scale);
        let hr_len = hr_dims.0 * hr_dims.1;
        let channels = reference.channels();
        let mut estimates: Vec<Vec<f32>> = (0..channels)
            .map(|c| {
                upsample_bilinear(&reference.plane(c), scale)
                    .iter()
                    .copied()
                    .collect()
            })
            .collect();

        let weight = 1.0 / usable.len() as f32;
        let lr_samples = (usable.len() * channels * h * w) as f64;
        let mut residual_trace = Vec::with_capacity(self.config.iterations);

        for _ in 0..self.config.iterations {
            if cancel.is_cancelled() {
                log::info!("reconstruction of frame {} cancelled", reference.index());
                return Ok(None);
            }
            let mut squared = 0.0f64;
            for (c, estimate) in estimates.iter_mut().enumerate() {
                let current: &[f32] = estimate;
                let partials: Vec<(Vec<f32>, f64)> = usable
                    .par_iter()
                    .map(|(map, observed)| {
                        let residual = &observed.plane(c) - &map.predict(current, parallel);
                        let sq = residual
                            .iter()
                            .map(|r| (*r as f64) * (*r as f64))
                            .sum::<f64>();
                        let mut acc = vec![0.0f32; hr_len];
                        map.back_project(&residual.view(), &mut acc);
                        (acc, sq)
                    })
                    .collect();

                let mut correction = vec![0.0f32; hr_len];
                for (acc, sq) in &partials {
                    squared += sq;
                    for (dst, v) in correction.iter_mut().zip(acc) {
                        *dst += v;
                    }
                }

                let regulariser: Vec<f32> = if params.lambda > 0.0 {
                    let view = ArrayView2::from_shape(hr_dims, current)
                        .map_err(|err| SuperResError::FrameMismatch(err.to_string()))?;
                    btv_gradient(&view, params.radius, params.alpha)
                        .iter()
                        .map(|g| params.lambda * g)
                        .collect()
                } else {
                    vec![0.0f32; hr_len]
                };

                for ((value, corr), reg) in
                    estimate.iter_mut().zip(&correction).zip(&regulariser)
                {
                    *value += params.step * (weight * corr - reg);
                }
            }
            residual_trace.push((squared / lr_samples).sqrt() as f32);
        }

        let shape = (channels, hr_dims.0, hr_dims.1);
        let planes = Array3::from_shape_vec(shape, estimates.concat())
            .map_err(|err| SuperResError::FrameMismatch(err.to_string()))?;
        let frame = Frame::from_planes(reference.index(), planes)?.quantized();
        self.window.step_reference();
        Ok(Some(Reconstruction {
            frame,
            warnings,
            residual_trace,
        }))
    }
}
