//! Automatic padding for 3D convolutions
//!
//! Kernels with an even size cannot be padded symmetrically; those get an
//! explicit constant pad stage in front of an unpadded convolution.

use burn::prelude::*;

use crate::utils::all_equal;

/// Padding needed on each side of one axis for kernel size `kernel_size`
///
/// Returns `(k/2, (k-1)/2)` for even kernels and `(k/2, k/2)` for odd
/// kernels, so the two halves always sum to `k - 1`.
pub fn calculate_padding(kernel_size: usize) -> (usize, usize) {
    if kernel_size % 2 == 0 {
        (kernel_size / 2, kernel_size.saturating_sub(1) / 2)
    } else {
        (kernel_size / 2, kernel_size / 2)
    }
}

/// Result of automatic padding for a `[depth, height, width]` kernel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutoPadding {
    /// Same padding on both sides of every axis, handled by the convolution
    Symmetric(usize),
    /// Per-axis `(before, after)` padding applied by an explicit pad stage
    Asymmetric([(usize, usize); 3]),
}

/// Computes automatic padding for a 3D kernel
///
/// The leading side of each axis receives the smaller half, which is the
/// order the reversed `(low, high)` list ends up in on the tensor engine.
pub fn auto_padding(kernel_size: [usize; 3]) -> AutoPadding {
    let pads = kernel_size.map(calculate_padding);
    let flat = pads.iter().flat_map(|&(low, high)| [low, high]);
    if all_equal(flat) {
        AutoPadding::Symmetric(pads[0].0)
    } else {
        AutoPadding::Asymmetric(pads.map(|(low, high)| (high, low)))
    }
}

/// Pads the three spatial axes of a 5D tensor with a constant value
///
/// # Arguments
///
/// * `x` - Input tensor of shape `[batch, channels, depth, height, width]`
/// * `padding` - `(before, after)` for depth, height and width
/// * `value` - Fill value
pub fn pad3d<B: Backend>(x: Tensor<B, 5>, padding: [(usize, usize); 3], value: f32) -> Tensor<B, 5> {
    let [batch, channels, depth, height, width] = x.dims();
    let [(d0, d1), (h0, h1), (w0, w1)] = padding;
    if d0 + d1 + h0 + h1 + w0 + w1 == 0 {
        return x;
    }
    let device = x.device();

    let padded = Tensor::full(
        [batch, channels, depth + d0 + d1, height + h0 + h1, width + w0 + w1],
        value,
        &device,
    );

    padded.slice_assign(
        [
            0..batch,
            0..channels,
            d0..d0 + depth,
            h0..h0 + height,
            w0..w0 + width,
        ],
        x,
    )
}
