/// Masked convolution layer.
pub mod conv;
/// Per-pixel cross-entropy.
pub mod loss;

pub use conv::*;
pub use loss::*;
