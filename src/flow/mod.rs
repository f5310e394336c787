//! Motion estimation.
//!
//! Structure:
//! - `field`: dense displacement field on a source frame's grid
//! - `estimator`: the `MotionEstimator` trait every algorithm implements
//! - `select`: estimator kinds, backend probing and construction
//! - `backends`: local-gradient, block-match and TV-L1 implementations

pub mod backends;
pub mod estimator;
pub mod field;
pub mod select;

pub use estimator::MotionEstimator;
pub use field::MotionField;
pub use select::{
    create_estimator, select_backend, BackendSelection, ComputeBackend, DeviceCapabilities,
    MotionEstimatorKind,
};
