//! Estimator kinds and compute-backend resolution.
//!
//! Selection happens once at startup: the configured name parses into a
//! closed `MotionEstimatorKind`, the requested backend is resolved against the
//! probed device capabilities, and `create_estimator` builds the trait object
//! the engine uses for the rest of the run.

use std::fmt;
use std::str::FromStr;

use crate::error::SuperResError;
use crate::flow::backends::{BlockMatchFlow, LocalGradientFlow, TvL1Flow};
use crate::flow::estimator::MotionEstimator;

/// Closed set of motion estimators.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum MotionEstimatorKind {
    /// Fast pyramidal local-gradient method.
    #[default]
    Farneback,
    /// Exhaustive block matching.
    Simple,
    /// Variational TV-L1.
    Tvl1,
    /// Variational, fine-grained preset of TV-L1.
    Brox,
    /// Deep-pyramid local-gradient preset.
    PyrLk,
}

impl MotionEstimatorKind {
    pub const ALL: [MotionEstimatorKind; 5] = [
        MotionEstimatorKind::Farneback,
        MotionEstimatorKind::Simple,
        MotionEstimatorKind::Tvl1,
        MotionEstimatorKind::Brox,
        MotionEstimatorKind::PyrLk,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MotionEstimatorKind::Farneback => "farneback",
            MotionEstimatorKind::Simple => "simple",
            MotionEstimatorKind::Tvl1 => "tvl1",
            MotionEstimatorKind::Brox => "brox",
            MotionEstimatorKind::PyrLk => "pyrlk",
        }
    }
}

impl fmt::Display for MotionEstimatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MotionEstimatorKind {
    type Err = SuperResError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Self::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == wanted)
            .ok_or_else(|| {
                let known: Vec<&str> = Self::ALL.iter().map(|k| k.as_str()).collect();
                SuperResError::config(format!(
                    "unknown optical flow algorithm '{}' (expected one of {})",
                    s,
                    known.join(", ")
                ))
            })
    }
}

/// Backend the estimator kernels execute on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ComputeBackend {
    Cpu,
    /// Row-parallel kernels on the worker pool.
    Accelerated,
}

impl ComputeBackend {
    pub fn is_parallel(&self) -> bool {
        matches!(self, ComputeBackend::Accelerated)
    }
}

impl fmt::Display for ComputeBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComputeBackend::Cpu => f.write_str("cpu"),
            ComputeBackend::Accelerated => f.write_str("accelerated"),
        }
    }
}

/// Requested backend. Resolution never fails: unavailable acceleration falls back to CPU.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BackendSelection {
    #[default]
    Auto,
    Cpu,
    Accelerated,
}

impl FromStr for BackendSelection {
    type Err = SuperResError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(BackendSelection::Auto),
            "cpu" => Ok(BackendSelection::Cpu),
            "accelerated" | "accel" | "gpu" => Ok(BackendSelection::Accelerated),
            other => Err(SuperResError::config(format!(
                "unknown backend '{}' (expected auto, cpu or accelerated)",
                other
            ))),
        }
    }
}

/// What the host can run, probed once at startup.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeviceCapabilities {
    pub hardware_threads: usize,
}

impl DeviceCapabilities {
    pub fn probe() -> Self {
        let hardware_threads = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self { hardware_threads }
    }

    pub fn cpu_only() -> Self {
        Self {
            hardware_threads: 1,
        }
    }

    pub fn accelerator_available(&self) -> bool {
        self.hardware_threads > 1
    }
}

/// Resolve the requested backend against the device.
pub fn select_backend(
    selection: BackendSelection,
    capabilities: &DeviceCapabilities,
) -> ComputeBackend {
    match selection {
        BackendSelection::Cpu => ComputeBackend::Cpu,
        BackendSelection::Auto | BackendSelection::Accelerated => {
            if capabilities.accelerator_available() {
                ComputeBackend::Accelerated
            } else {
                log::debug!(
                    "accelerated backend unavailable ({} hardware thread), using cpu",
                    capabilities.hardware_threads
                );
                ComputeBackend::Cpu
            }
        }
    }
}

/// Build the estimator for a kind on a resolved backend.
pub fn create_estimator(
    kind: MotionEstimatorKind,
    backend: ComputeBackend,
) -> Box<dyn MotionEstimator> {
    match kind {
        MotionEstimatorKind::Farneback => Box::new(LocalGradientFlow::new(backend)),
        MotionEstimatorKind::PyrLk => Box::new(LocalGradientFlow::deep(backend)),
        MotionEstimatorKind::Simple => Box::new(BlockMatchFlow::new(backend)),
        MotionEstimatorKind::Tvl1 => Box::new(TvL1Flow::new(backend)),
        MotionEstimatorKind::Brox => Box::new(TvL1Flow::fine(backend)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_known_name() {
        for kind in MotionEstimatorKind::ALL {
            assert_eq!(kind.as_str().parse::<MotionEstimatorKind>().unwrap(), kind);
        }
        assert_eq!(
            " TVL1 ".parse::<MotionEstimatorKind>().unwrap(),
            MotionEstimatorKind::Tvl1
        );
    }

    #[test]
    fn unknown_flow_name_is_config_error() {
        let err = "lucas".parse::<MotionEstimatorKind>().unwrap_err();
        assert!(matches!(err, SuperResError::Config(_)));
        assert!(err.to_string().contains("farneback"));
    }

    #[test]
    fn accelerated_falls_back_on_single_thread_host() {
        let caps = DeviceCapabilities::cpu_only();
        assert_eq!(
            select_backend(BackendSelection::Accelerated, &caps),
            ComputeBackend::Cpu
        );
        assert_eq!(select_backend(BackendSelection::Auto, &caps), ComputeBackend::Cpu);
    }

    #[test]
    fn cpu_selection_is_honoured_on_parallel_host() {
        let caps = DeviceCapabilities {
            hardware_threads: 8,
        };
        assert_eq!(select_backend(BackendSelection::Cpu, &caps), ComputeBackend::Cpu);
        assert_eq!(
            select_backend(BackendSelection::Auto, &caps),
            ComputeBackend::Accelerated
        );
    }

    #[test]
    fn created_estimators_report_backend() {
        for kind in MotionEstimatorKind::ALL {
            let estimator = create_estimator(kind, ComputeBackend::Cpu);
            assert_eq!(estimator.backend(), ComputeBackend::Cpu);
        }
    }
}
