//! Residual blocks and chains of them

use attention_unet_core::{Activation, NormKind};
use burn::prelude::*;
use serde::{Deserialize, Serialize};

use crate::conv::{ConvLayer, ConvLayerConfig, Padding};
use crate::error::BlockError;
use crate::layer::Layer;

/// Projection shortcut used when stride or channel count changes
fn shortcut<B: Backend>(
    in_channels: usize,
    out_channels: usize,
    stride: usize,
    norm: NormKind,
    device: &B::Device,
) -> Option<ConvLayer<B>> {
    (stride != 1 || in_channels != out_channels).then(|| {
        ConvLayerConfig::new(in_channels, out_channels)
            .with_kernel_size(1)
            .with_stride(stride)
            .with_norm(Some(norm))
            .with_activation(None)
            .init(device)
    })
}

fn check_basic_grouping(groups: usize, base_width: usize) -> Result<(), BlockError> {
    if groups != 1 || base_width != 64 {
        return Err(BlockError::UnsupportedGrouping { groups, base_width });
    }
    Ok(())
}

/// Configuration for [`BasicResBlock`]
#[derive(Debug, Clone)]
pub struct BasicResBlockConfig {
    pub in_channels: usize,
    pub out_channels: usize,
    pub stride: usize,
    /// Must be 1 for the basic layout
    pub groups: usize,
    /// Must be 64 for the basic layout
    pub base_width: usize,
    pub norm: NormKind,
    pub activation: Activation,
}

impl BasicResBlockConfig {
    pub fn new(in_channels: usize, out_channels: usize) -> Self {
        Self {
            in_channels,
            out_channels,
            stride: 1,
            groups: 1,
            base_width: 64,
            norm: NormKind::Batch,
            activation: Activation::Relu,
        }
    }

    pub fn with_stride(mut self, stride: usize) -> Self {
        self.stride = stride;
        self
    }

    pub fn with_groups(mut self, groups: usize) -> Self {
        self.groups = groups;
        self
    }

    pub fn with_base_width(mut self, base_width: usize) -> Self {
        self.base_width = base_width;
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

    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<BasicResBlock<B>, BlockError> {
        check_basic_grouping(self.groups, self.base_width)?;

        Ok(BasicResBlock {
            conv1: ConvLayerConfig::new(self.in_channels, self.out_channels)
                .with_stride(self.stride)
                .with_norm(Some(self.norm))
                .with_activation(Some(self.activation))
                .init(device),
            conv2: ConvLayerConfig::new(self.out_channels, self.out_channels)
                .with_norm(Some(self.norm))
                .with_activation(None)
                .init(device),
            downsample: shortcut(
                self.in_channels,
                self.out_channels,
                self.stride,
                self.norm,
                device,
            ),
            activation: self.activation,
        })
    }
}

/// Two 3x3x3 convolutions with an identity or projection shortcut
#[derive(Module, Debug)]
pub struct BasicResBlock<B: Backend> {
    pub conv1: ConvLayer<B>,
    /// Second convolution, no activation
    pub conv2: ConvLayer<B>,
    /// 1x1x1 projection, absent when the shortcut is the identity
    pub downsample: Option<ConvLayer<B>>,
    pub activation: Activation,
}

impl<B: Backend> BasicResBlock<B> {
    pub fn forward(&self, x: Tensor<B, 5>) -> Tensor<B, 5> {
        let residual = match &self.downsample {
            Some(conv) => conv.forward(x.clone()),
            None => x.clone(),
        };
        let hidden = self.conv2.forward(self.conv1.forward(x));
        self.activation.forward(hidden + residual)
    }
}

impl<B: Backend> Layer<B> for BasicResBlock<B> {
    type Input = Tensor<B, 5>;
    type Output = Tensor<B, 5>;

    fn apply(&self, input: Tensor<B, 5>) -> Tensor<B, 5> {
        self.forward(input)
    }

    fn first_layer(&self) -> Option<&ConvLayer<B>> {
        Some(&self.conv1)
    }

    fn components(&self) -> Vec<&'static str> {
        let mut names = vec!["conv_layer_1", "conv_layer_2"];
        if self.downsample.is_some() {
            names.push("downsample");
        }
        names
    }
}

/// Configuration for [`ResBlock`]
#[derive(Debug, Clone)]
pub struct ResBlockConfig {
    pub in_channels: usize,
    pub out_channels: usize,
    pub kernel_size: usize,
    pub stride: usize,
    pub padding: Padding,
    /// 1x1 reduce -> kxk -> 1x1 expand instead of two kxk convolutions
    pub bottleneck: bool,
    pub base_width: usize,
    pub groups: usize,
    pub norm: NormKind,
    pub activation: Activation,
}

impl ResBlockConfig {
    pub fn new(in_channels: usize, out_channels: usize) -> Self {
        Self {
            in_channels,
            out_channels,
            kernel_size: 3,
            stride: 1,
            padding: Padding::Auto,
            bottleneck: true,
            base_width: 64,
            groups: 1,
            norm: NormKind::Batch,
            activation: Activation::Relu,
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

    pub fn with_padding(mut self, padding: Padding) -> Self {
        self.padding = padding;
        self
    }

    pub fn with_bottleneck(mut self, bottleneck: bool) -> Self {
        self.bottleneck = bottleneck;
        self
    }

    pub fn with_base_width(mut self, base_width: usize) -> Self {
        self.base_width = base_width;
        self
    }

    pub fn with_groups(mut self, groups: usize) -> Self {
        self.groups = groups;
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

    /// Inner width of the block: `floor(out * base_width / 64) * groups`
    pub fn width(&self) -> usize {
        (self.out_channels as f64 * (self.base_width as f64 / 64.0)) as usize * self.groups
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<ResBlock<B>, BlockError> {
        if !self.bottleneck {
            check_basic_grouping(self.groups, self.base_width)?;
        }
        let width = self.width();
        let conv = |in_c: usize, out_c: usize| {
            ConvLayerConfig::new(in_c, out_c)
                .with_padding(self.padding)
                .with_norm(Some(self.norm))
        };

        // Both the strided convolution and the shortcut downsample when stride != 1
        let (conv1, conv2, conv3) = if self.bottleneck {
            (
                conv(self.in_channels, width)
                    .with_kernel_size(1)
                    .with_activation(Some(self.activation))
                    .init(device),
                conv(width, width)
                    .with_kernel_size(self.kernel_size)
                    .with_stride(self.stride)
                    .with_groups(self.groups)
                    .with_activation(None)
                    .init(device),
                Some(
                    conv(width, self.out_channels)
                        .with_kernel_size(1)
                        .with_activation(None)
                        .init(device),
                ),
            )
        } else {
            (
                conv(self.in_channels, width)
                    .with_kernel_size(self.kernel_size)
                    .with_stride(self.stride)
                    .with_activation(Some(self.activation))
                    .init(device),
                conv(width, width)
                    .with_kernel_size(self.kernel_size)
                    .with_activation(None)
                    .init(device),
                None,
            )
        };

        Ok(ResBlock {
            conv1,
            conv2,
            conv3,
            downsample: shortcut(
                self.in_channels,
                self.out_channels,
                self.stride,
                self.norm,
                device,
            ),
            activation: self.activation,
        })
    }
}

/// Residual block, bottleneck or basic layout
#[derive(Module, Debug)]
pub struct ResBlock<B: Backend> {
    pub conv1: ConvLayer<B>,
    pub conv2: ConvLayer<B>,
    /// 1x1x1 expansion, present in the bottleneck layout
    pub conv3: Option<ConvLayer<B>>,
    pub downsample: Option<ConvLayer<B>>,
    pub activation: Activation,
}

impl<B: Backend> ResBlock<B> {
    pub fn forward(&self, x: Tensor<B, 5>) -> Tensor<B, 5> {
        let residual = match &self.downsample {
            Some(conv) => conv.forward(x.clone()),
            None => x.clone(),
        };
        let hidden = self.conv2.forward(self.conv1.forward(x));
        let hidden = match &self.conv3 {
            Some(conv) => conv.forward(hidden),
            None => hidden,
        };
        self.activation.forward(hidden + residual)
    }

    pub fn is_bottleneck(&self) -> bool {
        self.conv3.is_some()
    }
}

impl<B: Backend> Layer<B> for ResBlock<B> {
    type Input = Tensor<B, 5>;
    type Output = Tensor<B, 5>;

    fn apply(&self, input: Tensor<B, 5>) -> Tensor<B, 5> {
        self.forward(input)
    }

    fn first_layer(&self) -> Option<&ConvLayer<B>> {
        Some(&self.conv1)
    }

    fn components(&self) -> Vec<&'static str> {
        let mut names = vec!["conv_layer_1", "conv_layer_2"];
        if self.conv3.is_some() {
            names.push("conv_layer_3");
        }
        if self.downsample.is_some() {
            names.push("downsample");
        }
        names
    }
}

/// Configuration for [`DoubleConv`]
#[derive(Debug, Clone)]
pub struct DoubleConvConfig {
    pub in_channels: usize,
    pub norm: Option<NormKind>,
    pub activation: Option<Activation>,
}

impl DoubleConvConfig {
    pub fn new(in_channels: usize) -> Self {
        Self {
            in_channels,
            norm: Some(NormKind::Batch),
            activation: Some(Activation::Relu),
        }
    }

    pub fn with_norm(mut self, norm: Option<NormKind>) -> Self {
        self.norm = norm;
        self
    }

    pub fn with_activation(mut self, activation: Option<Activation>) -> Self {
        self.activation = activation;
        self
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> DoubleConv<B> {
        let wide = self.in_channels * 2;
        DoubleConv {
            conv1: ConvLayerConfig::new(self.in_channels, wide)
                .with_norm(self.norm)
                .with_activation(self.activation)
                .init(device),
            conv2: ConvLayerConfig::new(wide, self.in_channels)
                .with_norm(self.norm)
                .with_activation(self.activation)
                .init(device),
        }
    }
}

/// Widen to twice the channels and back, no shortcut
#[derive(Module, Debug)]
pub struct DoubleConv<B: Backend> {
    pub conv1: ConvLayer<B>,
    pub conv2: ConvLayer<B>,
}

impl<B: Backend> DoubleConv<B> {
    pub fn forward(&self, x: Tensor<B, 5>) -> Tensor<B, 5> {
        self.conv2.forward(self.conv1.forward(x))
    }
}

impl<B: Backend> Layer<B> for DoubleConv<B> {
    type Input = Tensor<B, 5>;
    type Output = Tensor<B, 5>;

    fn apply(&self, input: Tensor<B, 5>) -> Tensor<B, 5> {
        self.forward(input)
    }

    fn first_layer(&self) -> Option<&ConvLayer<B>> {
        Some(&self.conv1)
    }

    fn components(&self) -> Vec<&'static str> {
        vec!["conv1", "conv2"]
    }
}

/// Block layout used by [`res_blocks`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ResBlockKind {
    /// [`BasicResBlock`]
    #[default]
    Basic,
    /// [`ResBlock`] in its bottleneck layout
    Bottleneck,
}

/// One block of a [`ResBlocks`] chain
#[derive(Module, Debug)]
pub enum ResidualBlock<B: Backend> {
    Basic(BasicResBlock<B>),
    Bottleneck(ResBlock<B>),
}

impl<B: Backend> ResidualBlock<B> {
    pub fn forward(&self, x: Tensor<B, 5>) -> Tensor<B, 5> {
        match self {
            ResidualBlock::Basic(block) => block.forward(x),
            ResidualBlock::Bottleneck(block) => block.forward(x),
        }
    }

    fn first_conv(&self) -> &ConvLayer<B> {
        match self {
            ResidualBlock::Basic(block) => &block.conv1,
            ResidualBlock::Bottleneck(block) => &block.conv1,
        }
    }

    fn downsample(&self) -> Option<&ConvLayer<B>> {
        match self {
            ResidualBlock::Basic(block) => block.downsample.as_ref(),
            ResidualBlock::Bottleneck(block) => block.downsample.as_ref(),
        }
    }

    pub fn in_channels(&self) -> usize {
        self.first_conv().in_channels()
    }

    pub fn out_channels(&self) -> usize {
        match self {
            ResidualBlock::Basic(block) => block.conv2.out_channels(),
            ResidualBlock::Bottleneck(block) => block
                .conv3
                .as_ref()
                .unwrap_or(&block.conv2)
                .out_channels(),
        }
    }

    /// Stride of the block, read from its first strided convolution
    pub fn stride(&self) -> usize {
        self.downsample().map(|conv| conv.stride()[0]).unwrap_or(1)
    }
}

/// Chain of residual blocks built by [`res_blocks`]
#[derive(Module, Debug)]
pub struct ResBlocks<B: Backend> {
    pub blocks: Vec<ResidualBlock<B>>,
}

impl<B: Backend> ResBlocks<B> {
    pub fn forward(&self, x: Tensor<B, 5>) -> Tensor<B, 5> {
        self.blocks.iter().fold(x, |x, block| block.forward(x))
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn out_channels(&self) -> usize {
        self.blocks.last().map(|block| block.out_channels()).unwrap_or(0)
    }
}

impl<B: Backend> Layer<B> for ResBlocks<B> {
    type Input = Tensor<B, 5>;
    type Output = Tensor<B, 5>;

    fn apply(&self, input: Tensor<B, 5>) -> Tensor<B, 5> {
        self.forward(input)
    }

    fn first_layer(&self) -> Option<&ConvLayer<B>> {
        self.blocks.first().map(|block| block.first_conv())
    }
}

/// Chains `n_blocks` residual blocks of the given kind
///
/// The first block maps `in_channels -> out_channels` at `stride`; the rest
/// map `out_channels -> out_channels` at stride 1.
pub fn res_blocks<B: Backend>(
    kind: ResBlockKind,
    in_channels: usize,
    out_channels: usize,
    stride: usize,
    n_blocks: usize,
    device: &B::Device,
) -> Result<ResBlocks<B>, BlockError> {
    if n_blocks == 0 {
        return Err(BlockError::EmptyChain);
    }

    let block = |in_c: usize, stride: usize| -> Result<ResidualBlock<B>, BlockError> {
        Ok(match kind {
            ResBlockKind::Basic => ResidualBlock::Basic(
                BasicResBlockConfig::new(in_c, out_channels)
                    .with_stride(stride)
                    .init(device)?,
            ),
            ResBlockKind::Bottleneck => ResidualBlock::Bottleneck(
                ResBlockConfig::new(in_c, out_channels)
                    .with_stride(stride)
                    .init(device)?,
            ),
        })
    };

    let mut blocks = Vec::with_capacity(n_blocks);
    blocks.push(block(in_channels, stride)?);
    for _ in 1..n_blocks {
        blocks.push(block(out_channels, 1)?);
    }

    Ok(ResBlocks { blocks })
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
    fn test_basic_identity_block_keeps_shape() {
        let device = Default::default();
        let block = BasicResBlockConfig::new(4, 4).init::<TestBackend>(&device).unwrap();

        assert!(block.downsample.is_none());
        assert_eq!(block.forward(input([2, 4, 5, 5, 5])).dims(), [2, 4, 5, 5, 5]);
    }

    #[test]
    fn test_basic_rejects_grouping() {
        let device = Default::default();
        let err = BasicResBlockConfig::new(4, 4)
            .with_groups(2)
            .init::<TestBackend>(&device)
            .unwrap_err();
        assert_eq!(err, BlockError::UnsupportedGrouping { groups: 2, base_width: 64 });

        let err = ResBlockConfig::new(4, 4)
            .with_bottleneck(false)
            .with_base_width(32)
            .init::<TestBackend>(&device)
            .unwrap_err();
        assert_eq!(err, BlockError::UnsupportedGrouping { groups: 1, base_width: 32 });
    }

    #[test]
    fn test_bottleneck_block() {
        let device = Default::default();
        let block = ResBlockConfig::new(8, 16)
            .with_stride(2)
            .init::<TestBackend>(&device)
            .unwrap();

        assert!(block.is_bottleneck());
        assert_eq!(
            block.components(),
            vec!["conv_layer_1", "conv_layer_2", "conv_layer_3", "downsample"]
        );
        assert_eq!(block.forward(input([1, 8, 8, 8, 8])).dims(), [1, 16, 4, 4, 4]);
    }

    #[test]
    fn test_bottleneck_width_formula() {
        assert_eq!(ResBlockConfig::new(4, 16).width(), 16);
        assert_eq!(ResBlockConfig::new(4, 16).with_base_width(32).width(), 8);
        assert_eq!(
            ResBlockConfig::new(4, 16).with_base_width(4).with_groups(8).width(),
            8
        );
    }

    #[test]
    fn test_grouped_bottleneck_keeps_shape() {
        let device = Default::default();
        let block = ResBlockConfig::new(16, 16)
            .with_groups(4)
            .with_base_width(16)
            .init::<TestBackend>(&device)
            .unwrap();
        assert!(block.downsample.is_none());
        assert_eq!(block.forward(input([1, 16, 4, 4, 4])).dims(), [1, 16, 4, 4, 4]);
    }

    #[test]
    fn test_double_conv() {
        let device = Default::default();
        let block = DoubleConvConfig::new(3).init::<TestBackend>(&device);
        assert_eq!(block.conv1.out_channels(), 6);
        assert_eq!(block.forward(input([1, 3, 4, 4, 4])).dims(), [1, 3, 4, 4, 4]);
    }

    #[test]
    fn test_res_blocks_chain() {
        let device = Default::default();
        let chain = res_blocks::<TestBackend>(ResBlockKind::Basic, 8, 16, 2, 3, &device).unwrap();

        assert_eq!(chain.len(), 3);
        assert_eq!(chain.blocks[0].in_channels(), 8);
        assert_eq!(chain.blocks[0].out_channels(), 16);
        assert_eq!(chain.blocks[0].stride(), 2);
        for block in &chain.blocks[1..] {
            assert_eq!(block.in_channels(), 16);
            assert_eq!(block.out_channels(), 16);
            assert_eq!(block.stride(), 1);
        }
        assert_eq!(chain.forward(input([1, 8, 8, 8, 8])).dims(), [1, 16, 4, 4, 4]);
    }

    #[test]
    fn test_res_blocks_bottleneck_kind() {
        let device = Default::default();
        let chain = res_blocks::<TestBackend>(ResBlockKind::Bottleneck, 4, 8, 1, 2, &device).unwrap();
        assert!(matches!(chain.blocks[0], ResidualBlock::Bottleneck(_)));
        assert_eq!(chain.out_channels(), 8);
        assert_eq!(chain.first_layer().unwrap().in_channels(), 4);
    }

    #[test]
    fn test_res_blocks_rejects_empty_chain() {
        let device = Default::default();
        let err = res_blocks::<TestBackend>(ResBlockKind::Basic, 4, 4, 1, 0, &device).unwrap_err();
        assert_eq!(err, BlockError::EmptyChain);
    }
}
