//! Dense estimator implementations.

mod block_match;
mod local_gradient;
mod tvl1;

pub use block_match::BlockMatchFlow;
pub use local_gradient::LocalGradientFlow;
pub use tvl1::TvL1Flow;
