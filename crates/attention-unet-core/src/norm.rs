//! Normalization for volumetric feature maps
//!
//! One module covers the three normalizations the blocks can be configured
//! with. Batch normalization keeps running statistics in the burn
//! [`RunningState`] slots, updated only while the backend records gradients
//! (the training backend) and read otherwise. Group and instance
//! normalization always use per-sample statistics.

use burn::module::{Param, RunningState};
use burn::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Invalid channel grouping for a [`Norm3d`]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NormError {
    #[error("Group normalization needs at least one group")]
    ZeroGroups,

    #[error("{channels} channels are not divisible into {groups} groups")]
    IndivisibleGroups { channels: usize, groups: usize },
}

/// Which statistics a [`Norm3d`] normalizes with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NormKind {
    /// Per-channel statistics over batch and all spatial positions
    Batch,
    /// Per-sample statistics over groups of channels
    Group(usize),
    /// Per-sample, per-channel statistics
    Instance,
}

impl std::fmt::Display for NormKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NormKind::Batch => write!(f, "Batch"),
            NormKind::Group(groups) => write!(f, "Group({groups})"),
            NormKind::Instance => write!(f, "Instance"),
        }
    }
}

use burn::constant;
constant!(NormKind);

impl NormKind {
    /// Checks that `num_channels` can be normalized with this kind
    pub fn validate(&self, num_channels: usize) -> Result<(), NormError> {
        match *self {
            NormKind::Group(0) => Err(NormError::ZeroGroups),
            NormKind::Group(groups) if num_channels % groups != 0 => {
                Err(NormError::IndivisibleGroups {
                    channels: num_channels,
                    groups,
                })
            }
            _ => Ok(()),
        }
    }
}

/// Normalization module for `[batch, channels, depth, height, width]` tensors
///
/// # Formula
///
/// ```text
/// y = (x - mean) / sqrt(var + eps) * weight + bias
/// ```
///
/// where mean/var are taken over the axes selected by [`NormKind`].
#[derive(Module, Debug)]
pub struct Norm3d<B: Backend> {
    /// Scale parameter (gamma), shape [num_channels]
    pub weight: Param<Tensor<B, 1>>,
    /// Shift parameter (beta), shape [num_channels]
    pub bias: Param<Tensor<B, 1>>,
    /// Running mean, only used by batch normalization
    pub running_mean: RunningState<Tensor<B, 1>>,
    /// Running variance, only used by batch normalization
    pub running_var: RunningState<Tensor<B, 1>>,
    /// Statistics selection
    pub kind: NormKind,
    /// Running statistics momentum
    pub momentum: f64,
    /// Epsilon for numerical stability
    pub eps: f64,
}

impl<B: Backend> Norm3d<B> {
    /// Creates a new normalization module
    ///
    /// # Arguments
    ///
    /// * `kind` - Statistics to normalize with
    /// * `num_channels` - Number of input channels (divisible by the group count for [`NormKind::Group`])
    /// * `device` - Device to create tensors on
    ///
    /// # Panics
    ///
    /// If [`NormKind::validate`] rejects the grouping, like burn's `GroupNorm`.
    pub fn new(kind: NormKind, num_channels: usize, device: &B::Device) -> Self {
        if let Err(err) = kind.validate(num_channels) {
            panic!("{err}");
        }
        Self {
            weight: Param::from_tensor(Tensor::ones([num_channels], device)),
            bias: Param::from_tensor(Tensor::zeros([num_channels], device)),
            running_mean: RunningState::new(Tensor::zeros([num_channels], device)),
            running_var: RunningState::new(Tensor::ones([num_channels], device)),
            kind,
            momentum: 0.1,
            eps: 1e-5,
        }
    }

    /// Number of channels this module normalizes
    pub fn num_channels(&self) -> usize {
        self.weight.val().dims()[0]
    }

    /// Applies normalization to a 5D tensor
    ///
    /// # Arguments
    ///
    /// * `x` - Input tensor of shape `[batch, channels, depth, height, width]`
    ///
    /// # Returns
    ///
    /// Normalized tensor with same shape as input
    pub fn forward(&self, x: Tensor<B, 5>) -> Tensor<B, 5> {
        match self.kind {
            NormKind::Batch => self.forward_batch(x),
            NormKind::Group(groups) => self.forward_grouped(x, groups),
            NormKind::Instance => {
                let channels = x.dims()[1];
                self.forward_grouped(x, channels)
            }
        }
    }

    fn forward_batch(&self, x: Tensor<B, 5>) -> Tensor<B, 5> {
        if !B::ad_enabled() {
            let mean = self.running_mean.value();
            let var = self.running_var.value();
            return self.affine(x, mean, var);
        }

        let [batch, channels, depth, height, width] = x.dims();

        // [c, b * d * h * w]
        let flat = x
            .clone()
            .swap_dims(0, 1)
            .reshape([channels, batch * depth * height * width]);
        let mean = flat.clone().mean_dim(1);
        let var = (flat - mean.clone()).powf_scalar(2.0).mean_dim(1);
        let mean = mean.reshape([channels]);
        let var = var.reshape([channels]);

        let running_mean = self.running_mean.value_sync();
        let running_var = self.running_var.value_sync();
        self.running_mean.update(
            running_mean.mul_scalar(1.0 - self.momentum)
                + mean.clone().detach().mul_scalar(self.momentum),
        );
        self.running_var.update(
            running_var.mul_scalar(1.0 - self.momentum)
                + var.clone().detach().mul_scalar(self.momentum),
        );

        self.affine(x, mean, var)
    }

    fn forward_grouped(&self, x: Tensor<B, 5>, num_groups: usize) -> Tensor<B, 5> {
        let [batch, channels, depth, height, width] = x.dims();
        let group_size = channels / num_groups;

        // [batch, num_groups, group_size * d * h * w]
        let grouped = x.reshape([batch, num_groups, group_size * depth * height * width]);
        let mean = grouped.clone().mean_dim(2);
        let var = (grouped.clone() - mean.clone()).powf_scalar(2.0).mean_dim(2);
        let normed = (grouped - mean) / (var + self.eps).sqrt();
        let normed = normed.reshape([batch, channels, depth, height, width]);

        let weight = self.weight.val().reshape([1, channels, 1, 1, 1]);
        let bias = self.bias.val().reshape([1, channels, 1, 1, 1]);
        normed * weight + bias
    }

    fn affine(&self, x: Tensor<B, 5>, mean: Tensor<B, 1>, var: Tensor<B, 1>) -> Tensor<B, 5> {
        let channels = x.dims()[1];
        let shape = [1, channels, 1, 1, 1];
        let x = (x - mean.reshape(shape)) / (var.reshape(shape) + self.eps).sqrt();
        x * self.weight.val().reshape(shape) + self.bias.val().reshape(shape)
    }
}
