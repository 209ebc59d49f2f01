//! Uniform calling convention and introspection helpers for blocks

use attention_unet_core::spatial_dims;
use burn::prelude::*;
use burn::tensor::Distribution;

use crate::conv::ConvLayer;
use crate::error::BlockError;

/// A block that can be called, wrapped by hooks and introspected
///
/// Every block also has an inherent `forward`; `apply` is the same call
/// with the inputs packed into [`Layer::Input`].
pub trait Layer<B: Backend> {
    /// Forward-pass inputs (a tensor, or a tuple for multi-input blocks)
    type Input;
    /// Forward-pass output
    type Output;

    fn apply(&self, input: Self::Input) -> Self::Output;

    /// The first convolution stage of this block, descending into nested blocks
    fn first_layer(&self) -> Option<&ConvLayer<B>> {
        None
    }

    /// Names of the sub-stages present in this block
    fn components(&self) -> Vec<&'static str> {
        Vec::new()
    }
}

/// Extracts the first convolution stage of a (nested) block
pub fn first_layer<B: Backend, M: Layer<B>>(module: &M) -> Option<&ConvLayer<B>> {
    module.first_layer()
}

/// Checks that `module` has all named components
///
/// With `do_raise`, missing components are reported as
/// [`BlockError::MissingComponents`] instead of `Ok(false)`.
pub fn hasattrs<B: Backend, M: Layer<B>>(
    module: &M,
    names: &[&str],
    do_raise: bool,
) -> Result<bool, BlockError> {
    let present = module.components();
    let missing: Vec<String> = names
        .iter()
        .filter(|&&name| !present.iter().any(|&p| p == name))
        .map(|&name| name.to_string())
        .collect();

    if missing.is_empty() {
        return Ok(true);
    }
    if do_raise {
        return Err(BlockError::MissingComponents {
            module: short_type_name::<M>().to_string(),
            missing,
        });
    }
    Ok(false)
}

/// Runs one forward pass on a random batch as a smoke test
///
/// The input has shape `[2, in_channels, depth, height, width]`, where the
/// channel count comes from the model's first convolution (3 if the model
/// has none). With `check_size`, the output's spatial size must equal the
/// input's.
pub fn test_forward<B, M>(
    model: &M,
    input_size: [usize; 3],
    check_size: bool,
    device: &B::Device,
) -> Result<Tensor<B, 5>, BlockError>
where
    B: Backend,
    M: Layer<B, Input = Tensor<B, 5>, Output = Tensor<B, 5>>,
{
    let in_channels = match first_layer(model) {
        Some(layer) => layer.in_channels(),
        None => {
            tracing::warn!(
                model = short_type_name::<M>(),
                "no convolution found, guessing 3 input channels"
            );
            3
        }
    };

    let [depth, height, width] = input_size;
    let x = Tensor::<B, 5>::random(
        [2, in_channels, depth, height, width],
        Distribution::Normal(0.0, 1.0),
        device,
    );
    let out = model.apply(x);

    if check_size {
        let output = spatial_dims(&out);
        if output != input_size {
            return Err(BlockError::SizeMismatch {
                input: input_size,
                output,
            });
        }
    }
    Ok(out)
}

fn short_type_name<T>() -> &'static str {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}
