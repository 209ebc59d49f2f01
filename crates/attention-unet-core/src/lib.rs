//! Core Primitives for 3D Attention U-Nets
//!
//! Tensor-level building blocks shared by the block and hook crates. All
//! tensors are volumetric, laid out as `[batch, channels, depth, height, width]`.
//!
//! # Modules
//!
//! - [`activation`] - Configurable activation functions
//! - [`norm`] - Batch, group and instance normalization for 5D tensors
//! - [`padding`] - Automatic (possibly asymmetric) convolution padding
//! - [`interpolate`] - Nearest and trilinear 3D resizing
//! - [`utils`] - Iterator helpers
//!
//! # Example
//!
//! ```ignore
//! use attention_unet_core::padding::{auto_padding, AutoPadding};
//!
//! // Even kernels need an explicit pad stage
//! assert!(matches!(auto_padding([2, 2, 2]), AutoPadding::Asymmetric(_)));
//! ```

pub mod activation;
pub mod interpolate;
pub mod norm;
pub mod padding;
pub mod utils;

pub use activation::{silu, Activation};
pub use interpolate::{resize3d, spatial_dims, Interpolation};
pub use norm::{Norm3d, NormError, NormKind};
pub use padding::{auto_padding, calculate_padding, pad3d, AutoPadding};
pub use utils::all_equal;
