//! U-Net decoder block: upsample, gate, fuse with the skip connection, refine

use attention_unet_core::{resize3d, spatial_dims, Activation, Interpolation, Norm3d, NormKind};
use burn::prelude::*;

use crate::conv::{ConvLayer, ConvLayerConfig};
use crate::layer::Layer;
use crate::spatial_attention::{SpatialAttentionDualInput, SpatialAttentionDualInputConfig};

/// Configuration for [`UnetBlock`]
#[derive(Debug, Clone)]
pub struct UnetBlockConfig {
    /// Channels of the upsampling-path input
    pub up_channels: usize,
    /// Channels of the skip connection
    pub skip_channels: usize,
    /// Kernel size of the transposed convolution
    pub kernel_size: usize,
    /// Stride of the transposed convolution
    pub stride: usize,
    pub norm: NormKind,
    pub activation: Activation,
    /// Gate the upsampling path with [`SpatialAttentionDualInput`]
    pub spatial_attention: bool,
}

impl UnetBlockConfig {
    pub fn new(up_channels: usize, skip_channels: usize) -> Self {
        Self {
            up_channels,
            skip_channels,
            kernel_size: 3,
            stride: 2,
            norm: NormKind::Batch,
            activation: Activation::Relu,
            spatial_attention: false,
        }
    }

    pub fn with_kernel_size(mut self, kernel_size: usize) -> Self {
        self.kernel_size = kernel_size;
        self
    }

    pub fn with_stride(mut self, stride: usize) -> Self {
        self.stride = stride;
        self
    }

    pub fn with_norm(mut self, norm: NormKind) -> Self {
        self.norm = norm;
        self
    }

    pub fn with_activation(mut self, activation: Activation) -> Self {
        self.activation = activation;
        self
    }

    pub fn with_spatial_attention(mut self, spatial_attention: bool) -> Self {
        self.spatial_attention = spatial_attention;
        self
    }

    /// Channels after concatenating the upsampled tensor with the skip tensor
    pub fn concat_channels(&self) -> usize {
        self.up_channels / 2 + self.skip_channels
    }

    /// Channels produced by the block
    pub fn out_channels(&self) -> usize {
        self.concat_channels() / 2
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> UnetBlock<B> {
        let up_c = self.up_channels;
        let cat_c = self.concat_channels();
        let out_c = self.out_channels();

        UnetBlock {
            up: ConvLayerConfig::new(up_c, up_c / 2)
                .with_kernel_size(self.kernel_size)
                .with_stride(self.stride)
                .with_transpose(true)
                .with_norm(None)
                .with_activation(Some(self.activation))
                .init(device),
            skip_norm: Norm3d::new(self.norm, self.skip_channels, device),
            attention: self.spatial_attention.then(|| {
                SpatialAttentionDualInputConfig::new(up_c, self.skip_channels).init(device)
            }),
            conv1: ConvLayerConfig::new(cat_c, out_c)
                .with_norm(Some(self.norm))
                .with_activation(Some(self.activation))
                .init(device),
            conv2: ConvLayerConfig::new(out_c, out_c)
                .with_norm(Some(self.norm))
                .with_activation(Some(self.activation))
                .init(device),
            activation: self.activation,
        }
    }
}

/// Decoder block of the attention U-Net
#[derive(Module, Debug)]
pub struct UnetBlock<B: Backend> {
    /// Transposed convolution halving the channel count
    pub up: ConvLayer<B>,
    /// Normalization of the skip connection
    pub skip_norm: Norm3d<B>,
    /// Optional gate on the upsampling path
    pub attention: Option<SpatialAttentionDualInput<B>>,
    /// First refinement convolution
    pub conv1: ConvLayer<B>,
    /// Second refinement convolution
    pub conv2: ConvLayer<B>,
    /// Applied to the concatenation before refinement
    pub activation: Activation,
}

impl<B: Backend> UnetBlock<B> {
    /// Forward pass
    ///
    /// # Arguments
    ///
    /// * `up_in` - Coarse tensor of shape `[batch, up_channels, d, h, w]`
    /// * `s` - Skip tensor of shape `[batch, skip_channels, D, H, W]`
    ///
    /// # Returns
    ///
    /// Tensor of shape `[batch, out_channels, D, H, W]`
    pub fn forward(&self, up_in: Tensor<B, 5>, s: Tensor<B, 5>) -> Tensor<B, 5> {
        let s = self.skip_norm.forward(s);
        let up_in = match &self.attention {
            Some(attention) => attention.forward(up_in, s.clone()),
            None => up_in,
        };

        let up_out = self.up.forward(up_in);
        let skip_size = spatial_dims(&s);
        let up_size = spatial_dims(&up_out);
        let up_out = if up_size != skip_size {
            tracing::trace!(?up_size, ?skip_size, "resizing upsampled tensor to skip connection");
            resize3d(up_out, skip_size, Interpolation::Nearest)
        } else {
            up_out
        };

        let x = Tensor::cat(vec![up_out, s], 1);
        let x = self.activation.forward(x);
        let x = self.conv1.forward(x);
        self.conv2.forward(x)
    }

    /// Channels produced by the block
    pub fn out_channels(&self) -> usize {
        self.conv2.out_channels()
    }
}

impl<B: Backend> Layer<B> for UnetBlock<B> {
    type Input = (Tensor<B, 5>, Tensor<B, 5>);
    type Output = Tensor<B, 5>;

    fn apply(&self, (up_in, s): (Tensor<B, 5>, Tensor<B, 5>)) -> Tensor<B, 5> {
        self.forward(up_in, s)
    }

    fn first_layer(&self) -> Option<&ConvLayer<B>> {
        match &self.attention {
            Some(attention) => attention.first_layer(),
            None => Some(&self.up),
        }
    }

    fn components(&self) -> Vec<&'static str> {
        let mut names = vec!["up", "skip_norm"];
        if self.attention.is_some() {
            names.push("attention");
        }
        names.extend(["conv1", "conv2"]);
        names
    }
}
