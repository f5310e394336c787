use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::engine::BtvParams;
use crate::error::SuperResError;
use crate::flow::{BackendSelection, MotionEstimatorKind};
use crate::ui::UiMode;

const DEFAULT_SCALE: usize = 4;
const DEFAULT_ITERATIONS: usize = 20;
const DEFAULT_TEMPORAL_RADIUS: usize = 8;
const DEFAULT_FPS: u32 = 25;
const MAX_BTV_RADIUS: usize = 10;

#[derive(Debug, Deserialize, Default)]
struct PipelineConfigFile {
    input: Option<String>,
    output: Option<PathBuf>,
    fps: Option<u32>,
    discard_first_frame: Option<bool>,
    ui: Option<String>,
    superres: Option<SuperResConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct SuperResConfigFile {
    scale: Option<usize>,
    iterations: Option<usize>,
    temporal_radius: Option<usize>,
    flow: Option<String>,
    backend: Option<String>,
    btv: Option<BtvParams>,
}

/// Reconstruction parameters, validated once at startup.
#[derive(Debug, Clone, PartialEq)]
pub struct SuperResConfig {
    pub scale: usize,
    pub iterations: usize,
    pub temporal_radius: usize,
    pub flow: MotionEstimatorKind,
    pub backend: BackendSelection,
    pub btv: BtvParams,
}

impl Default for SuperResConfig {
    fn default() -> Self {
        Self {
            scale: DEFAULT_SCALE,
            iterations: DEFAULT_ITERATIONS,
            temporal_radius: DEFAULT_TEMPORAL_RADIUS,
            flow: MotionEstimatorKind::default(),
            backend: BackendSelection::default(),
            btv: BtvParams::default(),
        }
    }
}

impl SuperResConfig {
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.scale < 1 {
            return Err(SuperResError::config("scale must be at least 1"));
        }
        if self.iterations < 1 {
            return Err(SuperResError::config("iterations must be at least 1"));
        }
        let btv = &self.btv;
        if !(btv.step.is_finite() && btv.step > 0.0) {
            return Err(SuperResError::config("btv step must be a positive number"));
        }
        if !(btv.lambda.is_finite() && btv.lambda >= 0.0) {
            return Err(SuperResError::config("btv lambda must not be negative"));
        }
        if !(btv.alpha > 0.0 && btv.alpha <= 1.0) {
            return Err(SuperResError::config("btv alpha must be in (0, 1]"));
        }
        if btv.radius > MAX_BTV_RADIUS {
            return Err(SuperResError::config(format!(
                "btv radius must be at most {}",
                MAX_BTV_RADIUS
            )));
        }
        Ok(())
    }
}

/// Command-line values layered on top of file and environment.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub config_path: Option<PathBuf>,
    pub input: Option<String>,
    pub output: Option<PathBuf>,
    pub scale: Option<usize>,
    pub iterations: Option<usize>,
    pub temporal_radius: Option<usize>,
    pub flow: Option<String>,
    pub backend: Option<String>,
    pub fps: Option<u32>,
    pub keep_first_frame: bool,
    pub ui: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub input: String,
    pub output: Option<PathBuf>,
    pub fps: u32,
    /// `None` picks the per-source default.
    pub discard_first_frame: Option<bool>,
    pub ui: UiMode,
    pub superres: SuperResConfig,
}

impl PipelineConfig {
    /// File (from `--config` or `SUPERRES_CONFIG`), then `SUPERRES_*`
    /// environment, then command-line overrides, then validation.
    pub fn load(overrides: ConfigOverrides) -> Result<Self> {
        let config_path = overrides
            .config_path
            .clone()
            .or_else(|| std::env::var("SUPERRES_CONFIG").ok().map(PathBuf::from));
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.apply_overrides(overrides)?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: PipelineConfigFile) -> Result<Self> {
        let ui = match file.ui.as_deref() {
            Some(mode) => mode.parse()?,
            None => UiMode::Auto,
        };
        let sr = file.superres.unwrap_or_default();
        let flow = match sr.flow.as_deref() {
            Some(name) => name.parse()?,
            None => MotionEstimatorKind::default(),
        };
        let backend = match sr.backend.as_deref() {
            Some(name) => name.parse()?,
            None => BackendSelection::default(),
        };
        let superres = SuperResConfig {
            scale: sr.scale.unwrap_or(DEFAULT_SCALE),
            iterations: sr.iterations.unwrap_or(DEFAULT_ITERATIONS),
            temporal_radius: sr.temporal_radius.unwrap_or(DEFAULT_TEMPORAL_RADIUS),
            flow,
            backend,
            btv: sr.btv.unwrap_or_default(),
        };
        Ok(Self {
            input: file.input.unwrap_or_default(),
            output: file.output,
            fps: file.fps.unwrap_or(DEFAULT_FPS),
            discard_first_frame: file.discard_first_frame,
            ui,
            superres,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(input) = std::env::var("SUPERRES_INPUT") {
            if !input.trim().is_empty() {
                self.input = input;
            }
        }
        if let Ok(output) = std::env::var("SUPERRES_OUTPUT") {
            if !output.trim().is_empty() {
                self.output = Some(PathBuf::from(output));
            }
        }
        if let Some(scale) = env_number("SUPERRES_SCALE")? {
            self.superres.scale = scale;
        }
        if let Some(iterations) = env_number("SUPERRES_ITERATIONS")? {
            self.superres.iterations = iterations;
        }
        if let Some(radius) = env_number("SUPERRES_TEMPORAL")? {
            self.superres.temporal_radius = radius;
        }
        if let Some(fps) = env_number("SUPERRES_FPS")? {
            self.fps = fps;
        }
        if let Ok(flow) = std::env::var("SUPERRES_FLOW") {
            if !flow.trim().is_empty() {
                self.superres.flow = flow.parse()?;
            }
        }
        if let Ok(backend) = std::env::var("SUPERRES_BACKEND") {
            if !backend.trim().is_empty() {
                self.superres.backend = backend.parse()?;
            }
        }
        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) -> Result<()> {
        if let Some(input) = overrides.input {
            self.input = input;
        }
        if let Some(output) = overrides.output {
            self.output = Some(output);
        }
        if let Some(scale) = overrides.scale {
            self.superres.scale = scale;
        }
        if let Some(iterations) = overrides.iterations {
            self.superres.iterations = iterations;
        }
        if let Some(radius) = overrides.temporal_radius {
            self.superres.temporal_radius = radius;
        }
        if let Some(flow) = overrides.flow {
            self.superres.flow = flow.parse()?;
        }
        if let Some(backend) = overrides.backend {
            self.superres.backend = backend.parse()?;
        }
        if let Some(fps) = overrides.fps {
            self.fps = fps;
        }
        if overrides.keep_first_frame {
            self.discard_first_frame = Some(false);
        }
        if let Some(ui) = overrides.ui {
            self.ui = ui.parse()?;
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.input.trim().is_empty() {
            return Err(anyhow!(SuperResError::config(
                "no input given (use --video or SUPERRES_INPUT)"
            )));
        }
        if self.fps == 0 {
            return Err(anyhow!(SuperResError::config(
                "output frame rate must be greater than zero"
            )));
        }
        self.superres.validate()?;
        Ok(())
    }

    /// Whether the first decoded frame is dropped.
    ///
    /// Files and cameras discard it by default; synthetic sources keep it.
    pub fn discards_first_frame(&self) -> bool {
        self.discard_first_frame
            .unwrap_or_else(|| !self.input.starts_with("stub://"))
    }
}

fn env_number<T: std::str::FromStr>(key: &str) -> Result<Option<T>> {
    match std::env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| anyhow!(SuperResError::config(format!("{key} must be a number")))),
        _ => Ok(None),
    }
}

fn read_config_file(path: &Path) -> Result<PipelineConfigFile> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| {
            anyhow!(SuperResError::config(format!(
                "invalid config file {}: {}",
                path.display(),
                e
            )))
        })?
    } else {
        serde_json::from_str(&raw).map_err(|e| {
            anyhow!(SuperResError::config(format!(
                "invalid config file {}: {}",
                path.display(),
                e
            )))
        })?
    };
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let cfg = SuperResConfig::default();
        assert_eq!(cfg.scale, 4);
        assert_eq!(cfg.iterations, 20);
        assert_eq!(cfg.temporal_radius, 8);
        assert_eq!(cfg.flow, MotionEstimatorKind::Farneback);
        cfg.validate().unwrap();
    }

    #[test]
    fn zero_iterations_is_config_error() {
        let cfg = SuperResConfig {
            iterations: 0,
            ..SuperResConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(SuperResError::Config(_))));
    }

    #[test]
    fn synthetic_input_keeps_first_frame_by_default() {
        let mut cfg = PipelineConfig::from_file(PipelineConfigFile::default()).unwrap();
        cfg.input = "stub://grid".to_string();
        assert!(!cfg.discards_first_frame());
        cfg.input = "clip.mp4".to_string();
        assert!(cfg.discards_first_frame());
        cfg.discard_first_frame = Some(false);
        assert!(!cfg.discards_first_frame());
    }

    #[test]
    fn unknown_flow_in_file_is_rejected() {
        let file = PipelineConfigFile {
            superres: Some(SuperResConfigFile {
                flow: Some("horn-schunck".to_string()),
                ..SuperResConfigFile::default()
            }),
            ..PipelineConfigFile::default()
        };
        let err = PipelineConfig::from_file(file).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SuperResError>(),
            Some(SuperResError::Config(_))
        ));
    }
}
