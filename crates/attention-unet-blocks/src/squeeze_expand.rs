//! Squeeze-and-excitation channel attention

use attention_unet_core::Activation;
use burn::prelude::*;
use burn::tensor::activation::sigmoid;

use crate::conv::{ConvLayer, ConvLayerConfig};
use crate::error::BlockError;
use crate::layer::Layer;

/// Configuration for [`SqueezeExpand`]
#[derive(Debug, Clone)]
pub struct SqueezeExpandConfig {
    pub in_channels: usize,
    /// Fraction of channels kept in the squeezed representation
    pub se_ratio: f64,
    /// Activation after the squeeze projection
    pub activation: Activation,
}

impl SqueezeExpandConfig {
    pub fn new(in_channels: usize, se_ratio: f64) -> Self {
        Self {
            in_channels,
            se_ratio,
            activation: Activation::Relu,
        }
    }

    pub fn with_activation(mut self, activation: Activation) -> Self {
        self.activation = activation;
        self
    }

    /// Number of channels after squeezing, at least one
    pub fn squeezed_channels(&self) -> usize {
        ((self.in_channels as f64 * self.se_ratio) as usize).max(1)
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<SqueezeExpand<B>, BlockError> {
        if !self.se_ratio.is_finite() || self.se_ratio <= 0.0 {
            return Err(BlockError::InvalidSqueezeRatio(self.se_ratio));
        }
        let squeezed = self.squeezed_channels();

        Ok(SqueezeExpand {
            squeeze: ConvLayerConfig::new(self.in_channels, squeezed)
                .with_kernel_size(1)
                .with_norm(None)
                .with_activation(Some(self.activation))
                .init(device),
            expand: ConvLayerConfig::new(squeezed, self.in_channels)
                .with_kernel_size(1)
                .with_norm(None)
                .with_activation(None)
                .init(device),
        })
    }
}

/// Channel attention: pool -> squeeze -> expand -> sigmoid, multiplied onto the input
#[derive(Module, Debug)]
pub struct SqueezeExpand<B: Backend> {
    /// 1x1x1 projection to the squeezed width
    pub squeeze: ConvLayer<B>,
    /// 1x1x1 projection back to the input width
    pub expand: ConvLayer<B>,
}

impl<B: Backend> SqueezeExpand<B> {
    /// Per-channel gate in [0, 1] of shape `[batch, channels, 1, 1, 1]`
    pub fn gate(&self, x: Tensor<B, 5>) -> Tensor<B, 5> {
        // Global average pool to 1x1x1
        let pooled = x.mean_dim(2).mean_dim(3).mean_dim(4);
        let squeezed = self.squeeze.forward(pooled);
        sigmoid(self.expand.forward(squeezed))
    }

    /// Forward pass
    ///
    /// # Arguments
    ///
    /// * `x` - Input tensor of shape `[batch, channels, depth, height, width]`
    ///
    /// # Returns
    ///
    /// Input rescaled per channel, same shape
    pub fn forward(&self, x: Tensor<B, 5>) -> Tensor<B, 5> {
        x.clone() * self.gate(x)
    }
}

impl<B: Backend> Layer<B> for SqueezeExpand<B> {
    type Input = Tensor<B, 5>;
    type Output = Tensor<B, 5>;

    fn apply(&self, input: Tensor<B, 5>) -> Tensor<B, 5> {
        self.forward(input)
    }

    fn first_layer(&self) -> Option<&ConvLayer<B>> {
        Some(&self.squeeze)
    }

    fn components(&self) -> Vec<&'static str> {
        vec!["pool", "squeeze", "expand", "sigmoid"]
    }
}
