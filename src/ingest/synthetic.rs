//! Deterministic synthetic source (`stub://`) for tests and demos.
//!
//! Renders a checkerboard translating at a constant sub-pixel velocity. Each
//! pixel integrates a 4×4 grid of sub-samples, so edges carry the aliasing a
//! real low-resolution sensor would record. Optional uniform noise is drawn
//! from a seeded `StdRng`, so a given URL always yields the same frames.

use anyhow::{anyhow, Context, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::FrameSource;
use crate::frame::Frame;

const SUBSAMPLES: usize = 4;
const LIGHT: f32 = 200.0;
const DARK: f32 = 50.0;

#[derive(Clone, Debug, PartialEq)]
pub struct SyntheticConfig {
    pub name: String,
    /// Frames before exhaustion.
    pub frames: u64,
    pub width: usize,
    pub height: usize,
    /// Motion per frame, in pixels.
    pub dx: f32,
    pub dy: f32,
    /// Checker cell side, in pixels.
    pub cell: f32,
    /// Uniform noise amplitude, in sample units.
    pub noise: f32,
    pub seed: u64,
    /// 1 (luma) or 3 (RGB).
    pub channels: usize,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            name: "synthetic".to_string(),
            frames: 30,
            width: 64,
            height: 48,
            dx: 0.5,
            dy: 0.25,
            cell: 4.0,
            noise: 0.0,
            seed: 0,
            channels: 3,
        }
    }
}

impl SyntheticConfig {
    /// Parse `stub://name?frames=N&width=W&...`.
    pub fn from_url(url: &str) -> Result<Self> {
        let rest = url
            .strip_prefix("stub://")
            .ok_or_else(|| anyhow!("synthetic source URL must start with stub://"))?;
        let (name, query) = rest.split_once('?').unwrap_or((rest, ""));
        let mut cfg = Self {
            name: if name.is_empty() {
                "synthetic".to_string()
            } else {
                name.to_string()
            },
            ..Self::default()
        };
        for pair in query.split('&').filter(|p| !p.is_empty()) {
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| anyhow!("malformed query parameter '{}'", pair))?;
            let bad = || format!("invalid value '{}' for '{}'", value, key);
            match key {
                "frames" => cfg.frames = value.parse().with_context(bad)?,
                "width" => cfg.width = value.parse().with_context(bad)?,
                "height" => cfg.height = value.parse().with_context(bad)?,
                "dx" => cfg.dx = value.parse().with_context(bad)?,
                "dy" => cfg.dy = value.parse().with_context(bad)?,
                "cell" => cfg.cell = value.parse().with_context(bad)?,
                "noise" => cfg.noise = value.parse().with_context(bad)?,
                "seed" => cfg.seed = value.parse().with_context(bad)?,
                "channels" => cfg.channels = value.parse().with_context(bad)?,
                other => return Err(anyhow!("unknown synthetic parameter '{}'", other)),
            }
        }
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(anyhow!("synthetic frame size must be non-zero"));
        }
        if self.channels != 1 && self.channels != 3 {
            return Err(anyhow!("synthetic channels must be 1 or 3"));
        }
        if !(self.cell.is_finite() && self.cell > 0.0) {
            return Err(anyhow!("synthetic cell size must be positive"));
        }
        if !(self.noise.is_finite() && self.noise >= 0.0) {
            return Err(anyhow!("synthetic noise must not be negative"));
        }
        Ok(())
    }
}

pub struct SyntheticSource {
    config: SyntheticConfig,
    frame_count: u64,
    rng: StdRng,
}

impl SyntheticSource {
    pub fn new(config: SyntheticConfig) -> Result<Self> {
        config.validate()?;
        log::info!(
            "SyntheticSource: {} ({}x{}, {} frames, motion {:.2},{:.2} px/frame)",
            config.name,
            config.width,
            config.height,
            config.frames,
            config.dx,
            config.dy
        );
        Ok(Self {
            rng: StdRng::seed_from_u64(config.seed),
            config,
            frame_count: 0,
        })
    }

    fn checker(&self, y: f32, x: f32) -> f32 {
        let cx = (x / self.config.cell).floor() as i64;
        let cy = (y / self.config.cell).floor() as i64;
        if (cx + cy).rem_euclid(2) == 0 {
            LIGHT
        } else {
            DARK
        }
    }

    fn render(&mut self, index: u64) -> Vec<u8> {
        let cfg = &self.config;
        let (w, h, channels) = (cfg.width, cfg.height, cfg.channels);
        let ox = index as f32 * cfg.dx;
        let oy = index as f32 * cfg.dy;
        let step = 1.0 / SUBSAMPLES as f32;
        let mut luma = vec![0.0f32; w * h];
        for (i, value) in luma.iter_mut().enumerate() {
            let (y, x) = ((i / w) as f32, (i % w) as f32);
            let mut acc = 0.0;
            for sy in 0..SUBSAMPLES {
                for sx in 0..SUBSAMPLES {
                    let py = y + (sy as f32 + 0.5) * step - oy;
                    let px = x + (sx as f32 + 0.5) * step - ox;
                    acc += self.checker(py, px);
                }
            }
            *value = acc / (SUBSAMPLES * SUBSAMPLES) as f32;
        }

        let noise = self.config.noise;
        let mut bytes = Vec::with_capacity(w * h * channels);
        for value in luma {
            let sample = |rng: &mut StdRng| {
                let jitter = if noise > 0.0 {
                    rng.gen_range(-noise..=noise)
                } else {
                    0.0
                };
                (value + jitter).round().clamp(0.0, 255.0) as u8
            };
            if channels == 1 {
                bytes.push(sample(&mut self.rng));
            } else {
                // Tinted so chroma carries the same structure as luma.
                let base = sample(&mut self.rng);
                bytes.push(base);
                bytes.push((base as f32 * 0.8 + 20.0) as u8);
                bytes.push(255 - base);
            }
        }
        bytes
    }
}

impl FrameSource for SyntheticSource {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self.frame_count >= self.config.frames {
            return Ok(None);
        }
        let index = self.frame_count;
        let bytes = self.render(index);
        self.frame_count += 1;
        let frame = Frame::from_interleaved(
            index,
            self.config.width,
            self.config.height,
            self.config.channels,
            &bytes,
        )?;
        Ok(Some(frame))
    }

    fn describe(&self) -> String {
        format!("stub://{} (synthetic)", self.config.name)
    }

    fn frames_read(&self) -> u64 {
        self.frame_count
    }
}
