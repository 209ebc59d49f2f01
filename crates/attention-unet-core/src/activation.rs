//! Activation functions selectable by configuration
//!
//! Blocks store an [`Activation`] tag instead of a boxed layer so the
//! choice stays a plain, cloneable part of the module.

use burn::prelude::*;
use burn::tensor::activation::{gelu, leaky_relu, relu, sigmoid, tanh};
use serde::{Deserialize, Serialize};

/// SiLU (Sigmoid Linear Unit) activation: x * sigmoid(x)
pub fn silu<B: Backend, const D: usize>(x: Tensor<B, D>) -> Tensor<B, D> {
    x.clone() * sigmoid(x)
}

/// Elementwise activation applied after a convolution stage
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Activation {
    /// max(0, x)
    Relu,
    /// x * sigmoid(x)
    Silu,
    /// 1 / (1 + e^-x), used for attention gates
    Sigmoid,
    /// Gaussian error linear unit
    Gelu,
    /// Hyperbolic tangent
    Tanh,
    /// Leaky ReLU with the given negative slope
    LeakyRelu(f64),
}

impl std::fmt::Display for Activation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Activation::Relu => write!(f, "ReLU"),
            Activation::Silu => write!(f, "SiLU"),
            Activation::Sigmoid => write!(f, "Sigmoid"),
            Activation::Gelu => write!(f, "GELU"),
            Activation::Tanh => write!(f, "Tanh"),
            Activation::LeakyRelu(slope) => write!(f, "LeakyReLU({slope})"),
        }
    }
}

use burn::constant;
constant!(Activation);

impl Activation {
    /// Applies the activation to a tensor of any rank
    pub fn forward<B: Backend, const D: usize>(&self, x: Tensor<B, D>) -> Tensor<B, D> {
        match self {
            Activation::Relu => relu(x),
            Activation::Silu => silu(x),
            Activation::Sigmoid => sigmoid(x),
            Activation::Gelu => gelu(x),
            Activation::Tanh => tanh(x),
            Activation::LeakyRelu(slope) => leaky_relu(x, *slope),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    fn values(act: Activation, input: [f32; 4]) -> Vec<f32> {
        let device = Default::default();
        let x = Tensor::<TestBackend, 1>::from_floats(input, &device);
        act.forward(x).into_data().to_vec().unwrap()
    }

    #[test]
    fn test_relu_clamps_negatives() {
        assert_eq!(values(Activation::Relu, [-2.0, -0.5, 0.0, 3.0]), vec![0.0, 0.0, 0.0, 3.0]);
    }

    #[test]
    fn test_sigmoid_range() {
        for v in values(Activation::Sigmoid, [-20.0, -1.0, 1.0, 20.0]) {
            assert!((0.0..=1.0).contains(&v));
        }
    }

    #[test]
    fn test_silu_matches_definition() {
        let out = values(Activation::Silu, [-1.0, 0.0, 1.0, 2.0]);
        let expected: Vec<f32> = [-1.0f32, 0.0, 1.0, 2.0]
            .iter()
            .map(|x| x / (1.0 + (-x).exp()))
            .collect();
        for (a, b) in out.iter().zip(expected.iter()) {
            assert!((a - b).abs() < 1e-5);
        }
    }

    #[test]
    fn test_leaky_relu_slope() {
        let out = values(Activation::LeakyRelu(0.1), [-10.0, 0.0, 1.0, 2.0]);
        assert!((out[0] + 1.0).abs() < 1e-5);
        assert_eq!(out[3], 2.0);
    }
}
