//! Drop connect (stochastic depth) for residual branches

use burn::prelude::*;
use burn::tensor::Distribution;

use crate::error::BlockError;
use crate::layer::Layer;

/// Configuration for [`DropConnect`]
#[derive(Debug, Clone)]
pub struct DropConnectConfig {
    /// Probability of dropping a sample's branch
    pub prob: f64,
}

impl DropConnectConfig {
    pub fn new(prob: f64) -> Self {
        Self { prob }
    }

    /// Builds the layer, rejecting probabilities outside `[0, 1]`
    pub fn init(&self) -> Result<DropConnect, BlockError> {
        if !(0.0..=1.0).contains(&self.prob) {
            return Err(BlockError::InvalidDropProbability(self.prob));
        }
        Ok(DropConnect {
            keep_prob: 1.0 - self.prob,
        })
    }
}

/// Zeroes whole samples of a residual branch with probability `p`
///
/// Like burn's `Dropout`, the layer is only active while the backend
/// records gradients; on an inference backend it is the identity.
/// Surviving samples are scaled by `1 / (1 - p)` to keep the expected
/// magnitude.
#[derive(Module, Clone, Debug)]
pub struct DropConnect {
    /// Probability of keeping a sample
    pub keep_prob: f64,
}

impl DropConnect {
    /// Forward pass
    ///
    /// # Arguments
    ///
    /// * `x` - Input tensor of shape `[batch, channels, depth, height, width]`
    ///
    /// # Returns
    ///
    /// Tensor of the same shape with some samples zeroed during training
    pub fn forward<B: Backend>(&self, x: Tensor<B, 5>) -> Tensor<B, 5> {
        if !B::ad_enabled() || self.keep_prob >= 1.0 {
            return x;
        }
        if self.keep_prob <= 0.0 {
            return x.zeros_like();
        }

        let batch = x.dims()[0];
        let device = x.device();

        // floor(keep + U[0, 1)) is 1 with probability keep, 0 otherwise
        let mask = Tensor::<B, 5>::random([batch, 1, 1, 1, 1], Distribution::Default, &device)
            .add_scalar(self.keep_prob)
            .floor();

        x.div_scalar(self.keep_prob) * mask
    }

    /// Probability of dropping a sample
    pub fn drop_prob(&self) -> f64 {
        1.0 - self.keep_prob
    }
}

impl<B: Backend> Layer<B> for DropConnect {
    type Input = Tensor<B, 5>;
    type Output = Tensor<B, 5>;

    fn apply(&self, input: Tensor<B, 5>) -> Tensor<B, 5> {
        self.forward(input)
    }
}
