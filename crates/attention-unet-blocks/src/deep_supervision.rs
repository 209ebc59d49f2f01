//! Softmax classification head for auxiliary decoder outputs

use attention_unet_core::{Activation, NormKind};
use burn::prelude::*;
use burn::tensor::activation::softmax;

use crate::conv::{ConvLayer, ConvLayerConfig};
use crate::error::BlockError;
use crate::layer::Layer;

/// Configuration for [`DeepSupervision`]
#[derive(Debug, Clone)]
pub struct DeepSupervisionConfig {
    pub in_channels: usize,
    /// Number of classes, at least 2
    pub out_channels: usize,
    pub kernel_size: usize,
    pub norm: Option<NormKind>,
    pub activation: Option<Activation>,
}

impl DeepSupervisionConfig {
    pub fn new(in_channels: usize, out_channels: usize) -> Self {
        Self {
            in_channels,
            out_channels,
            kernel_size: 1,
            norm: None,
            activation: None,
        }
    }

    pub fn with_kernel_size(mut self, kernel_size: usize) -> Self {
        self.kernel_size = kernel_size;
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

    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<DeepSupervision<B>, BlockError> {
        if self.out_channels <= 1 {
            return Err(BlockError::TooFewClasses(self.out_channels));
        }

        Ok(DeepSupervision {
            conv: ConvLayerConfig::new(self.in_channels, self.out_channels)
                .with_kernel_size(self.kernel_size)
                .with_norm(self.norm)
                .with_activation(self.activation)
                .init(device),
        })
    }
}

/// Convolution followed by a softmax over channels
///
/// The output keeps the input's spatial size; no upsampling is done here.
#[derive(Module, Debug)]
pub struct DeepSupervision<B: Backend> {
    pub conv: ConvLayer<B>,
}

impl<B: Backend> DeepSupervision<B> {
    pub fn forward(&self, x: Tensor<B, 5>) -> Tensor<B, 5> {
        softmax(self.conv.forward(x), 1)
    }

    pub fn num_classes(&self) -> usize {
        self.conv.out_channels()
    }
}

impl<B: Backend> Layer<B> for DeepSupervision<B> {
    type Input = Tensor<B, 5>;
    type Output = Tensor<B, 5>;

    fn apply(&self, input: Tensor<B, 5>) -> Tensor<B, 5> {
        self.forward(input)
    }

    fn first_layer(&self) -> Option<&ConvLayer<B>> {
        Some(&self.conv)
    }

    fn components(&self) -> Vec<&'static str> {
        vec!["conv", "softmax"]
    }
}
