//! Convolution stage: pad -> conv -> norm -> activation

use attention_unet_core::{auto_padding, pad3d, Activation, AutoPadding, Norm3d, NormKind};
use burn::nn::conv::{Conv3d, Conv3dConfig, ConvTranspose3d, ConvTranspose3dConfig};
use burn::nn::PaddingConfig3d;
use burn::prelude::*;

use crate::layer::Layer;

/// Padding policy for a [`ConvLayer`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Padding {
    /// Derive padding from the kernel size, adding a pad stage when asymmetric
    Auto,
    /// Symmetric per-axis padding handed to the convolution as is
    Explicit([usize; 3]),
}

/// Explicit constant padding applied before an unpadded convolution
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConstantPad3d {
    /// `(before, after)` for depth, height and width
    pub padding: [(usize, usize); 3],
    /// Fill value
    pub value: f32,
}

impl std::fmt::Display for ConstantPad3d {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ConstantPad3d({:?}, value={})", self.padding, self.value)
    }
}

use burn::constant;
constant!(ConstantPad3d);

/// Configuration for [`ConvLayer`]
#[derive(Debug, Clone)]
pub struct ConvLayerConfig {
    pub in_channels: usize,
    pub out_channels: usize,
    pub kernel_size: [usize; 3],
    pub stride: [usize; 3],
    pub padding: Padding,
    /// Value used by the explicit pad stage
    pub pad_value: f32,
    pub norm: Option<NormKind>,
    pub activation: Option<Activation>,
    /// Build a transposed convolution instead of a regular one
    pub transpose: bool,
    pub groups: usize,
    pub dilation: [usize; 3],
    pub bias: bool,
}

impl ConvLayerConfig {
    /// 3x3x3 convolution with auto padding, batch norm and ReLU
    pub fn new(in_channels: usize, out_channels: usize) -> Self {
        Self {
            in_channels,
            out_channels,
            kernel_size: [3, 3, 3],
            stride: [1, 1, 1],
            padding: Padding::Auto,
            pad_value: 0.0,
            norm: Some(NormKind::Batch),
            activation: Some(Activation::Relu),
            transpose: false,
            groups: 1,
            dilation: [1, 1, 1],
            bias: true,
        }
    }

    /// Cubic kernel of size `k`
    pub fn with_kernel_size(mut self, k: usize) -> Self {
        self.kernel_size = [k; 3];
        self
    }

    pub fn with_kernel(mut self, kernel: [usize; 3]) -> Self {
        self.kernel_size = kernel;
        self
    }

    /// Same stride on every axis
    pub fn with_stride(mut self, stride: usize) -> Self {
        self.stride = [stride; 3];
        self
    }

    pub fn with_strides(mut self, stride: [usize; 3]) -> Self {
        self.stride = stride;
        self
    }

    pub fn with_padding(mut self, padding: Padding) -> Self {
        self.padding = padding;
        self
    }

    pub fn with_pad_value(mut self, value: f32) -> Self {
        self.pad_value = value;
        self
    }

    pub fn with_norm(mut self, norm: Option<NormKind>) -> Self {
        self.norm = norm;
        self
    }

    pub fn with_activation(mut self, activation: Option<Activation>) -> Self {
        self.activation = activation;
        self
    }

    pub fn with_transpose(mut self, transpose: bool) -> Self {
        self.transpose = transpose;
        self
    }

    pub fn with_groups(mut self, groups: usize) -> Self {
        self.groups = groups;
        self
    }

    pub fn with_dilation(mut self, dilation: [usize; 3]) -> Self {
        self.dilation = dilation;
        self
    }

    pub fn with_bias(mut self, bias: bool) -> Self {
        self.bias = bias;
        self
    }

    /// Builds the layer
    ///
    /// Kernel/stride/group combinations are not validated here; the
    /// convolution primitive rejects invalid ones.
    pub fn init<B: Backend>(&self, device: &B::Device) -> ConvLayer<B> {
        let (pad, conv_padding) = match self.padding {
            Padding::Explicit(padding) => (None, padding),
            Padding::Auto => match auto_padding(self.kernel_size) {
                AutoPadding::Symmetric(p) => (None, [p; 3]),
                AutoPadding::Asymmetric(padding) => {
                    tracing::debug!(
                        kernel = ?self.kernel_size,
                        ?padding,
                        "asymmetric padding, adding explicit pad stage"
                    );
                    let pad = ConstantPad3d {
                        padding,
                        value: self.pad_value,
                    };
                    (Some(pad), [0; 3])
                }
            },
        };

        let channels = [self.in_channels, self.out_channels];
        let conv = if self.transpose {
            Convolution::Transposed(
                ConvTranspose3dConfig::new(channels, self.kernel_size)
                    .with_stride(self.stride)
                    .with_padding(conv_padding)
                    .with_dilation(self.dilation)
                    .with_groups(self.groups)
                    .with_bias(self.bias)
                    .init(device),
            )
        } else {
            let [pd, ph, pw] = conv_padding;
            Convolution::Standard(
                Conv3dConfig::new(channels, self.kernel_size)
                    .with_stride(self.stride)
                    .with_padding(PaddingConfig3d::Explicit(pd, ph, pw))
                    .with_dilation(self.dilation)
                    .with_groups(self.groups)
                    .with_bias(self.bias)
                    .init(device),
            )
        };

        ConvLayer {
            pad,
            conv,
            norm: self.norm.map(|kind| Norm3d::new(kind, self.out_channels, device)),
            activation: self.activation,
            in_channels: self.in_channels,
            out_channels: self.out_channels,
            stride: self.stride,
        }
    }
}

/// Regular or transposed 3D convolution
#[derive(Module, Debug)]
pub enum Convolution<B: Backend> {
    Standard(Conv3d<B>),
    Transposed(ConvTranspose3d<B>),
}

impl<B: Backend> Convolution<B> {
    pub fn forward(&self, x: Tensor<B, 5>) -> Tensor<B, 5> {
        match self {
            Convolution::Standard(conv) => conv.forward(x),
            Convolution::Transposed(conv) => conv.forward(x),
        }
    }
}

/// Sequence of optional pad, convolution, optional norm and optional activation
#[derive(Module, Debug)]
pub struct ConvLayer<B: Backend> {
    /// Explicit pad stage, present only for asymmetric auto padding
    pub pad: Option<ConstantPad3d>,
    pub conv: Convolution<B>,
    pub norm: Option<Norm3d<B>>,
    pub activation: Option<Activation>,
    pub in_channels: usize,
    pub out_channels: usize,
    pub stride: [usize; 3],
}

impl<B: Backend> ConvLayer<B> {
    /// Forward pass
    ///
    /// # Arguments
    ///
    /// * `x` - Input tensor of shape `[batch, in_channels, depth, height, width]`
    ///
    /// # Returns
    ///
    /// Output tensor of shape `[batch, out_channels, depth', height', width']`
    pub fn forward(&self, x: Tensor<B, 5>) -> Tensor<B, 5> {
        let x = match &self.pad {
            Some(pad) => pad3d(x, pad.padding, pad.value),
            None => x,
        };
        let x = self.conv.forward(x);
        let x = match &self.norm {
            Some(norm) => norm.forward(x),
            None => x,
        };
        match &self.activation {
            Some(act) => act.forward(x),
            None => x,
        }
    }

    pub fn in_channels(&self) -> usize {
        self.in_channels
    }

    pub fn out_channels(&self) -> usize {
        self.out_channels
    }

    pub fn stride(&self) -> [usize; 3] {
        self.stride
    }

    pub fn is_transposed(&self) -> bool {
        matches!(self.conv, Convolution::Transposed(_))
    }
}

impl<B: Backend> Layer<B> for ConvLayer<B> {
    type Input = Tensor<B, 5>;
    type Output = Tensor<B, 5>;

    fn apply(&self, input: Tensor<B, 5>) -> Tensor<B, 5> {
        self.forward(input)
    }

    fn first_layer(&self) -> Option<&ConvLayer<B>> {
        Some(self)
    }

    fn components(&self) -> Vec<&'static str> {
        let mut names = Vec::with_capacity(4);
        if self.pad.is_some() {
            names.push("pad");
        }
        names.push(if self.is_transposed() { "transpose_conv" } else { "conv" });
        if self.norm.is_some() {
            names.push("norm");
        }
        if self.activation.is_some() {
            names.push("act");
        }
        names
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
    fn test_odd_kernel_collapses_to_conv_padding() {
        let device = Default::default();
        let layer = ConvLayerConfig::new(2, 4).init::<TestBackend>(&device);

        assert!(layer.pad.is_none());
        assert_eq!(layer.components(), vec!["conv", "norm", "act"]);
        assert_eq!(layer.forward(input([1, 2, 5, 6, 7])).dims(), [1, 4, 5, 6, 7]);
    }

    #[test]
    fn test_even_kernel_adds_pad_stage_and_keeps_size() {
        let device = Default::default();
        let layer = ConvLayerConfig::new(3, 2)
            .with_kernel_size(2)
            .with_pad_value(0.5)
            .init::<TestBackend>(&device);

        let pad = layer.pad.expect("even kernel needs a pad stage");
        assert_eq!(pad.padding, [(0, 1); 3]);
        assert_eq!(pad.value, 0.5);

        let layer = ConvLayerConfig::new(3, 2).with_kernel_size(4).init::<TestBackend>(&device);
        assert_eq!(layer.forward(input([2, 3, 6, 6, 6])).dims(), [2, 2, 6, 6, 6]);
    }

    #[test]
    fn test_stride_two_with_asymmetric_padding() {
        let device = Default::default();
        let layer = ConvLayerConfig::new(1, 1)
            .with_kernel_size(2)
            .with_stride(2)
            .with_norm(None)
            .with_activation(None)
            .init::<TestBackend>(&device);

        assert_eq!(layer.components(), vec!["pad", "conv"]);
        // (8 + 1 - 2) / 2 + 1
        assert_eq!(layer.forward(input([1, 1, 8, 8, 8])).dims(), [1, 1, 4, 4, 4]);
    }

    #[test]
    fn test_explicit_padding_skips_pad_stage() {
        let device = Default::default();
        let layer = ConvLayerConfig::new(1, 1)
            .with_kernel_size(3)
            .with_padding(Padding::Explicit([0, 0, 0]))
            .init::<TestBackend>(&device);

        assert!(layer.pad.is_none());
        assert_eq!(layer.forward(input([1, 1, 5, 5, 5])).dims(), [1, 1, 3, 3, 3]);
    }

    #[test]
    fn test_transposed_conv_upsamples() {
        let device = Default::default();
        let layer = ConvLayerConfig::new(8, 4)
            .with_transpose(true)
            .with_stride(2)
            .with_norm(None)
            .init::<TestBackend>(&device);

        assert!(layer.is_transposed());
        assert_eq!(layer.components(), vec!["transpose_conv", "act"]);
        // (4 - 1) * 2 - 2 + 3
        assert_eq!(layer.forward(input([1, 8, 4, 4, 4])).dims(), [1, 4, 7, 7, 7]);
    }

    #[test]
    fn test_depthwise_groups() {
        let device = Default::default();
        let layer = ConvLayerConfig::new(6, 6).with_groups(6).init::<TestBackend>(&device);
        assert_eq!(layer.forward(input([1, 6, 4, 4, 4])).dims(), [1, 6, 4, 4, 4]);
        assert_eq!(layer.in_channels(), 6);
        assert_eq!(layer.out_channels(), 6);
    }

    #[test]
    fn test_activation_is_applied_last() {
        let device = Default::default();
        let layer = ConvLayerConfig::new(2, 3)
            .with_activation(Some(Activation::Sigmoid))
            .init::<TestBackend>(&device);
        let values: Vec<f32> = layer.forward(input([1, 2, 3, 3, 3])).into_data().to_vec().unwrap();
        assert!(values.iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn test_layer_settings_survive_inference_view() {
        use burn::module::AutodiffModule;
        use burn_autodiff::Autodiff;

        let device = Default::default();
        let layer = ConvLayerConfig::new(2, 3)
            .with_kernel_size(2)
            .with_pad_value(1.0)
            .with_activation(Some(Activation::LeakyRelu(0.1)))
            .init::<Autodiff<TestBackend>>(&device);

        let valid: ConvLayer<TestBackend> = layer.valid();
        assert_eq!(valid.pad, layer.pad);
        assert_eq!(valid.activation, Some(Activation::LeakyRelu(0.1)));
        assert_eq!(valid.stride(), [1, 1, 1]);
        assert_eq!(valid.components(), vec!["pad", "conv", "norm", "act"]);
        assert_eq!(valid.forward(input([1, 2, 4, 4, 4])).dims(), [1, 3, 4, 4, 4]);
    }
}
