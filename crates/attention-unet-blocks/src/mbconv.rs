//! Mobile inverted residual bottleneck block (EfficientNet MBConv)

use attention_unet_core::{Activation, NormKind};
use burn::prelude::*;

use crate::conv::{ConvLayer, ConvLayerConfig};
use crate::drop_connect::{DropConnect, DropConnectConfig};
use crate::error::BlockError;
use crate::layer::Layer;
use crate::squeeze_expand::{SqueezeExpand, SqueezeExpandConfig};

/// Configuration for [`MBConvBlock`]
#[derive(Debug, Clone)]
pub struct MBConvConfig {
    pub in_channels: usize,
    pub out_channels: usize,
    pub kernel_size: usize,
    pub stride: usize,
    /// Squeeze-excitation ratio; the SE stage exists iff `0 < se_ratio <= 1`
    pub se_ratio: Option<f64>,
    /// Add the input back onto the output when shapes allow it
    pub id_skip: bool,
    /// Channel expansion factor of the inverted bottleneck
    pub expand_ratio: usize,
    pub drop_connect_rate: f64,
    pub activation: Activation,
    pub norm: NormKind,
}

impl MBConvConfig {
    /// Block with SE ratio 0.25, skip connection, expansion 6 and SiLU
    pub fn new(in_channels: usize, out_channels: usize) -> Self {
        Self {
            in_channels,
            out_channels,
            kernel_size: 3,
            stride: 1,
            se_ratio: Some(0.25),
            id_skip: true,
            expand_ratio: 6,
            drop_connect_rate: 0.2,
            activation: Activation::Silu,
            norm: NormKind::Batch,
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

    pub fn with_se_ratio(mut self, se_ratio: Option<f64>) -> Self {
        self.se_ratio = se_ratio;
        self
    }

    pub fn with_id_skip(mut self, id_skip: bool) -> Self {
        self.id_skip = id_skip;
        self
    }

    pub fn with_expand_ratio(mut self, expand_ratio: usize) -> Self {
        self.expand_ratio = expand_ratio;
        self
    }

    pub fn with_drop_connect_rate(mut self, rate: f64) -> Self {
        self.drop_connect_rate = rate;
        self
    }

    pub fn with_activation(mut self, activation: Activation) -> Self {
        self.activation = activation;
        self
    }

    pub fn with_norm(mut self, norm: NormKind) -> Self {
        self.norm = norm;
        self
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<MBConvBlock<B>, BlockError> {
        let expanded = self.in_channels * self.expand_ratio;

        let expand_conv = (self.expand_ratio != 1).then(|| {
            ConvLayerConfig::new(self.in_channels, expanded)
                .with_kernel_size(1)
                .with_norm(Some(self.norm))
                .with_activation(Some(self.activation))
                .init(device)
        });

        // groups == channels makes the convolution depthwise
        let depthwise_conv = ConvLayerConfig::new(expanded, expanded)
            .with_kernel_size(self.kernel_size)
            .with_stride(self.stride)
            .with_groups(expanded)
            .with_norm(Some(self.norm))
            .with_activation(Some(self.activation))
            .init(device);

        let squeeze_expand = match self.se_ratio {
            Some(ratio) if ratio > 0.0 && ratio <= 1.0 => Some(
                SqueezeExpandConfig::new(expanded, ratio)
                    .with_activation(self.activation)
                    .init(device)?,
            ),
            _ => None,
        };

        let project_conv = ConvLayerConfig::new(expanded, self.out_channels)
            .with_kernel_size(1)
            .with_norm(Some(self.norm))
            .with_activation(None)
            .init(device);

        let residual = self.id_skip && self.stride == 1 && self.in_channels == self.out_channels;

        Ok(MBConvBlock {
            expand_conv,
            depthwise_conv,
            squeeze_expand,
            project_conv,
            drop_connect: DropConnectConfig::new(self.drop_connect_rate).init()?,
            residual,
        })
    }
}

/// Inverted bottleneck: expand -> depthwise -> SE -> project -> skip
#[derive(Module, Debug)]
pub struct MBConvBlock<B: Backend> {
    /// 1x1x1 expansion, absent when the expansion ratio is 1
    pub expand_conv: Option<ConvLayer<B>>,
    pub depthwise_conv: ConvLayer<B>,
    pub squeeze_expand: Option<SqueezeExpand<B>>,
    /// 1x1x1 projection without activation
    pub project_conv: ConvLayer<B>,
    pub drop_connect: DropConnect,
    /// Whether the input is added back (id_skip, stride 1, equal channels)
    pub residual: bool,
}

impl<B: Backend> MBConvBlock<B> {
    /// Forward pass
    ///
    /// # Arguments
    ///
    /// * `x` - Input tensor of shape `[batch, in_channels, depth, height, width]`
    ///
    /// # Returns
    ///
    /// Output tensor of shape `[batch, out_channels, depth/stride, height/stride, width/stride]`
    pub fn forward(&self, x: Tensor<B, 5>) -> Tensor<B, 5> {
        let inputs = self.residual.then(|| x.clone());

        let x = match &self.expand_conv {
            Some(conv) => conv.forward(x),
            None => x,
        };
        let x = self.depthwise_conv.forward(x);
        let x = match &self.squeeze_expand {
            Some(se) => se.forward(x),
            None => x,
        };
        let x = self.project_conv.forward(x);

        match inputs {
            Some(inputs) => self.drop_connect.forward(x) + inputs,
            None => x,
        }
    }

    /// Whether the residual shortcut is taken
    pub fn has_residual(&self) -> bool {
        self.residual
    }
}

impl<B: Backend> Layer<B> for MBConvBlock<B> {
    type Input = Tensor<B, 5>;
    type Output = Tensor<B, 5>;

    fn apply(&self, input: Tensor<B, 5>) -> Tensor<B, 5> {
        self.forward(input)
    }

    fn first_layer(&self) -> Option<&ConvLayer<B>> {
        Some(self.expand_conv.as_ref().unwrap_or(&self.depthwise_conv))
    }

    fn components(&self) -> Vec<&'static str> {
        let mut names = Vec::with_capacity(5);
        if self.expand_conv.is_some() {
            names.push("expand_conv");
        }
        names.push("depthwise_conv");
        if self.squeeze_expand.is_some() {
            names.push("squeeze_expand");
        }
        names.push("project_conv");
        if self.residual {
            names.push("drop_connect");
        }
        names
    }
}
