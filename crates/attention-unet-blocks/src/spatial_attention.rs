//! Spatial attention gates
//!
//! Adapted from "Attention U-Net: Learning Where to Look for the Pancreas"
//! (Oktay et al., 2018, arXiv:1804.03999).

use attention_unet_core::{resize3d, spatial_dims, Activation, Interpolation, NormKind};
use burn::prelude::*;
use burn::tensor::activation::relu;

use crate::conv::{ConvLayer, ConvLayerConfig};
use crate::error::BlockError;
use crate::layer::Layer;

/// Configuration for [`SpatialAttention`]
#[derive(Debug, Clone)]
pub struct SpatialAttentionConfig {
    pub in_channels: usize,
    pub kernel_size: usize,
    /// Use the channel-wise maximum as a summary
    pub max_pool: bool,
    /// Use the channel-wise mean as a summary
    pub mean_pool: bool,
    /// Use a learned single-channel projection as a summary
    pub extra_conv: bool,
}

impl SpatialAttentionConfig {
    /// Max and mean summaries with a 7x7x7 gate convolution
    pub fn new(in_channels: usize) -> Self {
        Self {
            in_channels,
            kernel_size: 7,
            max_pool: true,
            mean_pool: true,
            extra_conv: false,
        }
    }

    pub fn with_kernel_size(mut self, kernel_size: usize) -> Self {
        self.kernel_size = kernel_size;
        self
    }

    pub fn with_max_pool(mut self, max_pool: bool) -> Self {
        self.max_pool = max_pool;
        self
    }

    pub fn with_mean_pool(mut self, mean_pool: bool) -> Self {
        self.mean_pool = mean_pool;
        self
    }

    pub fn with_extra_conv(mut self, extra_conv: bool) -> Self {
        self.extra_conv = extra_conv;
        self
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<SpatialAttention<B>, BlockError> {
        let summaries = [self.max_pool, self.mean_pool, self.extra_conv]
            .iter()
            .filter(|&&enabled| enabled)
            .count();
        if summaries == 0 {
            return Err(BlockError::NoAttentionInputs);
        }

        let extra_conv = self.extra_conv.then(|| {
            ConvLayerConfig::new(self.in_channels, 1)
                .with_kernel_size(self.kernel_size)
                .init(device)
        });

        let out_conv = ConvLayerConfig::new(summaries, 1)
            .with_kernel_size(self.kernel_size)
            .with_norm(None)
            .with_activation(Some(Activation::Sigmoid))
            .init(device);

        Ok(SpatialAttention {
            extra_conv,
            out_conv,
            max_pool: self.max_pool,
            mean_pool: self.mean_pool,
        })
    }
}

/// Single-input spatial attention: per-voxel gate from channel summaries
#[derive(Module, Debug)]
pub struct SpatialAttention<B: Backend> {
    /// Learned single-channel summary
    pub extra_conv: Option<ConvLayer<B>>,
    /// Summaries -> sigmoid gate
    pub out_conv: ConvLayer<B>,
    pub max_pool: bool,
    pub mean_pool: bool,
}

impl<B: Backend> SpatialAttention<B> {
    /// Per-voxel gate of shape `[batch, 1, depth, height, width]`
    pub fn gate(&self, x: Tensor<B, 5>) -> Tensor<B, 5> {
        let mut summaries = Vec::with_capacity(3);
        if self.max_pool {
            summaries.push(x.clone().max_dim(1));
        }
        if self.mean_pool {
            summaries.push(x.clone().mean_dim(1));
        }
        if let Some(conv) = &self.extra_conv {
            summaries.push(conv.forward(x));
        }
        self.out_conv.forward(Tensor::cat(summaries, 1))
    }

    /// Forward pass
    ///
    /// # Arguments
    ///
    /// * `x` - Input tensor of shape `[batch, channels, depth, height, width]`
    ///
    /// # Returns
    ///
    /// Gated input, same shape
    pub fn forward(&self, x: Tensor<B, 5>) -> Tensor<B, 5> {
        self.gate(x.clone()) * x
    }
}

impl<B: Backend> Layer<B> for SpatialAttention<B> {
    type Input = Tensor<B, 5>;
    type Output = Tensor<B, 5>;

    fn apply(&self, input: Tensor<B, 5>) -> Tensor<B, 5> {
        self.forward(input)
    }

    fn first_layer(&self) -> Option<&ConvLayer<B>> {
        self.extra_conv.as_ref()
    }

    fn components(&self) -> Vec<&'static str> {
        let mut names = Vec::with_capacity(4);
        if self.max_pool {
            names.push("max_pool");
        }
        if self.mean_pool {
            names.push("mean_pool");
        }
        if self.extra_conv.is_some() {
            names.push("extra_conv");
        }
        names.push("out_conv");
        names
    }
}

/// Configuration for [`SpatialAttentionDualInput`]
#[derive(Debug, Clone)]
pub struct SpatialAttentionDualInputConfig {
    /// Channels of the upsampling-path tensor
    pub in_channels: usize,
    /// Channels of the skip tensor (and the shared projection width)
    pub skip_channels: usize,
    /// Normalization in the gate convolution
    pub norm: Option<NormKind>,
}

impl SpatialAttentionDualInputConfig {
    pub fn new(in_channels: usize, skip_channels: usize) -> Self {
        Self {
            in_channels,
            skip_channels,
            norm: Some(NormKind::Batch),
        }
    }

    pub fn with_norm(mut self, norm: Option<NormKind>) -> Self {
        self.norm = norm;
        self
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> SpatialAttentionDualInput<B> {
        let s_c = self.skip_channels;
        SpatialAttentionDualInput {
            conv_u: ConvLayerConfig::new(self.in_channels, s_c)
                .with_kernel_size(1)
                .with_norm(None)
                .with_activation(None)
                .init(device),
            conv_s: ConvLayerConfig::new(s_c, s_c)
                .with_kernel_size(2)
                .with_stride(2)
                .with_norm(None)
                .with_activation(None)
                .with_bias(false)
                .init(device),
            conv_attn: ConvLayerConfig::new(s_c, 1)
                .with_kernel_size(1)
                .with_norm(self.norm)
                .with_activation(Some(Activation::Sigmoid))
                .init(device),
        }
    }
}

/// Decoder attention gate computed from the upsampling path and a skip connection
#[derive(Module, Debug)]
pub struct SpatialAttentionDualInput<B: Backend> {
    /// 1x1x1 projection of the upsampling-path tensor
    pub conv_u: ConvLayer<B>,
    /// Strided 2x2x2 projection of the skip tensor
    pub conv_s: ConvLayer<B>,
    /// ReLU'd sum -> single-channel sigmoid gate
    pub conv_attn: ConvLayer<B>,
}

impl<B: Backend> SpatialAttentionDualInput<B> {
    /// Gate of shape `[batch, 1, *up_in spatial]`
    pub fn gate(&self, up_in: Tensor<B, 5>, s: Tensor<B, 5>) -> Tensor<B, 5> {
        let target = spatial_dims(&up_in);

        let x = self.conv_u.forward(up_in);
        let s = self.conv_s.forward(s);
        let s = resize3d(s, spatial_dims(&x), Interpolation::Trilinear);

        let gate = self.conv_attn.forward(relu(x + s));
        resize3d(gate, target, Interpolation::Trilinear)
    }

    /// Forward pass
    ///
    /// # Arguments
    ///
    /// * `up_in` - Upsampling-path tensor of shape `[batch, in_channels, d, h, w]`
    /// * `s` - Skip tensor of shape `[batch, skip_channels, d', h', w']`
    ///
    /// # Returns
    ///
    /// `up_in` gated per voxel, same shape
    pub fn forward(&self, up_in: Tensor<B, 5>, s: Tensor<B, 5>) -> Tensor<B, 5> {
        up_in.clone() * self.gate(up_in, s)
    }
}

impl<B: Backend> Layer<B> for SpatialAttentionDualInput<B> {
    type Input = (Tensor<B, 5>, Tensor<B, 5>);
    type Output = Tensor<B, 5>;

    fn apply(&self, (up_in, s): (Tensor<B, 5>, Tensor<B, 5>)) -> Tensor<B, 5> {
        self.forward(up_in, s)
    }

    fn first_layer(&self) -> Option<&ConvLayer<B>> {
        Some(&self.conv_u)
    }

    fn components(&self) -> Vec<&'static str> {
        vec!["conv_u", "conv_s", "conv_attn"]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::tensor::Distribution;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    fn input(shape: [usize; 5]) -> Tensor<TestBackend, 5> {
        Tensor::random(shape, Distribution::Normal(0.0, 1.0), &Default::default())
    }

    #[test]
    fn test_requires_a_summary() {
        let device = Default::default();
        let err = SpatialAttentionConfig::new(4)
            .with_max_pool(false)
            .with_mean_pool(false)
            .init::<TestBackend>(&device)
            .unwrap_err();
        assert_eq!(err, BlockError::NoAttentionInputs);
    }

    #[test]
    fn test_single_input_shapes() {
        let device = Default::default();
        let sa = SpatialAttentionConfig::new(4)
            .with_kernel_size(3)
            .with_extra_conv(true)
            .init::<TestBackend>(&device)
            .unwrap();

        assert_eq!(sa.out_conv.in_channels(), 3);
        let x = input([2, 4, 5, 6, 7]);
        assert_eq!(sa.gate(x.clone()).dims(), [2, 1, 5, 6, 7]);
        assert_eq!(sa.forward(x).dims(), [2, 4, 5, 6, 7]);
    }

    #[test]
    fn test_single_summary_variants() {
        let device = Default::default();
        let mean_only = SpatialAttentionConfig::new(2)
            .with_max_pool(false)
            .init::<TestBackend>(&device)
            .unwrap();
        assert_eq!(mean_only.components(), vec!["mean_pool", "out_conv"]);
        assert!(mean_only.first_layer().is_none());

        let conv_only = SpatialAttentionConfig::new(2)
            .with_max_pool(false)
            .with_mean_pool(false)
            .with_extra_conv(true)
            .init::<TestBackend>(&device)
            .unwrap();
        assert_eq!(conv_only.forward(input([1, 2, 4, 4, 4])).dims(), [1, 2, 4, 4, 4]);
    }

    #[test]
    fn test_dual_input_gates_up_path() {
        let device = Default::default();
        let sa = SpatialAttentionDualInputConfig::new(16, 8).init::<TestBackend>(&device);

        // Skip connection at twice the resolution of the upsampling path
        let up_in = input([2, 16, 3, 4, 5]);
        let s = input([2, 8, 6, 8, 10]);
        let gate = sa.gate(up_in.clone(), s.clone());
        assert_eq!(gate.dims(), [2, 1, 3, 4, 5]);
        let values: Vec<f32> = gate.into_data().to_vec().unwrap();
        assert!(values.iter().all(|v| (0.0..=1.0).contains(v)));

        assert_eq!(sa.forward(up_in, s).dims(), [2, 16, 3, 4, 5]);
    }

    #[test]
    fn test_dual_input_odd_sizes() {
        let device = Default::default();
        let sa = SpatialAttentionDualInputConfig::new(4, 2).init::<TestBackend>(&device);
        let out = sa.apply((input([1, 4, 2, 3, 3]), input([1, 2, 5, 5, 7])));
        assert_eq!(out.dims(), [1, 4, 2, 3, 3]);
    }
}
