//! 3D Attention U-Net Building Blocks
//!
//! Volumetric segmentation blocks assembled from [`ConvLayer`], the
//! pad/convolve/normalize/activate stack every other block is made of.
//!
//! # Blocks
//!
//! - [`ConvLayer`] - Auto-padded 3D (transposed) convolution with norm and activation
//! - [`DropConnect`] - Per-sample stochastic depth
//! - [`SqueezeExpand`] - Channel attention
//! - [`MBConvBlock`] - Inverted bottleneck with optional squeeze/expand
//! - [`SpatialAttention`], [`SpatialAttentionDualInput`] - Spatial gates
//! - [`UnetBlock`] - Decoder fusion of the upsampling path and a skip connection
//! - [`BasicResBlock`], [`ResBlock`], [`DoubleConv`] - Residual blocks
//! - [`DeepSupervision`] - Softmax head for intermediate outputs
//!
//! # Model
//!
//! - [`AttentionUnet`] - Residual encoder, gated decoder, optional deep supervision
//!
//! # Introspection
//!
//! Every block implements [`Layer`], which [`first_layer`], [`hasattrs`]
//! and [`test_forward`] build on.
//!
//! # Example
//!
//! ```ignore
//! use attention_unet_blocks::{test_forward, AttentionUnetConfig};
//!
//! let model = AttentionUnetConfig::small().init::<Backend>(&device)?;
//! let out = test_forward(&model, [16, 16, 16], true, &device)?;
//! ```

pub mod conv;
pub mod deep_supervision;
pub mod drop_connect;
pub mod error;
pub mod layer;
pub mod mbconv;
pub mod res_block;
pub mod spatial_attention;
pub mod squeeze_expand;
pub mod unet;
pub mod unet_block;

pub use conv::{ConstantPad3d, ConvLayer, ConvLayerConfig, Convolution, Padding};
pub use deep_supervision::{DeepSupervision, DeepSupervisionConfig};
pub use drop_connect::{DropConnect, DropConnectConfig};
pub use error::BlockError;
pub use layer::{first_layer, hasattrs, test_forward, Layer};
pub use mbconv::{MBConvBlock, MBConvConfig};
pub use res_block::{
    res_blocks, BasicResBlock, BasicResBlockConfig, DoubleConv, DoubleConvConfig, ResBlock,
    ResBlockConfig, ResBlockKind, ResBlocks, ResidualBlock,
};
pub use spatial_attention::{
    SpatialAttention, SpatialAttentionConfig, SpatialAttentionDualInput,
    SpatialAttentionDualInputConfig,
};
pub use squeeze_expand::{SqueezeExpand, SqueezeExpandConfig};
pub use unet::{AttentionUnet, AttentionUnetConfig, UnetOutput};
pub use unet_block::{UnetBlock, UnetBlockConfig};
