//! Wrapper that exposes a block's forward and backward events

use std::marker::PhantomData;

use attention_unet_blocks::Layer;
use burn::prelude::*;

use crate::hook::HookPoint;

/// Forward point of a [`Hooked`] module: fired with input and output
pub type ForwardPoint<B, M> = HookPoint<M, <M as Layer<B>>::Input, <M as Layer<B>>::Output>;

/// Backward point of a [`Hooked`] module: fired with the gradients of
/// input and output
pub type BackwardPoint<B, M> = ForwardPoint<B, M>;

/// A [`Layer`] together with its hook points
///
/// burn has no module-level backward hooks; gradients are dispatched by the
/// caller through [`Hooked::backward`] once they are computed.
pub struct Hooked<B: Backend, M: Layer<B>> {
    module: M,
    forward_point: ForwardPoint<B, M>,
    backward_point: BackwardPoint<B, M>,
    _backend: PhantomData<B>,
}

impl<B: Backend, M: Layer<B>> Hooked<B, M>
where
    M::Input: Clone,
{
    pub fn new(module: M) -> Self {
        Self {
            module,
            forward_point: HookPoint::new(),
            backward_point: HookPoint::new(),
            _backend: PhantomData,
        }
    }

    /// Runs the module, then every forward hook in registration order
    pub fn forward(&self, input: M::Input) -> M::Output {
        if self.forward_point.is_empty() {
            return self.module.apply(input);
        }
        let output = self.module.apply(input.clone());
        self.forward_point.fire(&self.module, &input, &output);
        output
    }

    /// Runs every backward hook with the given gradients
    pub fn backward(&self, grad_input: &M::Input, grad_output: &M::Output) {
        self.backward_point.fire(&self.module, grad_input, grad_output);
    }

    pub fn forward_hooks(&self) -> &ForwardPoint<B, M> {
        &self.forward_point
    }

    pub fn backward_hooks(&self) -> &BackwardPoint<B, M> {
        &self.backward_point
    }

    pub fn module(&self) -> &M {
        &self.module
    }

    pub fn into_inner(self) -> M {
        self.module
    }
}

impl<B: Backend, M: Layer<B>> Layer<B> for Hooked<B, M>
where
    M::Input: Clone,
{
    type Input = M::Input;
    type Output = M::Output;

    fn apply(&self, input: M::Input) -> M::Output {
        self.forward(input)
    }

    fn first_layer(&self) -> Option<&attention_unet_blocks::ConvLayer<B>> {
        self.module.first_layer()
    }

    fn components(&self) -> Vec<&'static str> {
        self.module.components()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::CaptureOptions;
    use crate::hook::{hook_output, Hook};
    use attention_unet_blocks::{test_forward, ConvLayer, ConvLayerConfig};
    use burn::tensor::Distribution;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    fn conv() -> Hooked<TestBackend, ConvLayer<TestBackend>> {
        Hooked::new(ConvLayerConfig::new(2, 3).init(&Default::default()))
    }

    #[test]
    fn test_forward_hook_captures_output() {
        let hooked = conv();
        let hook = hook_output::<TestBackend, _, _, _>(hooked.forward_hooks());

        let x = Tensor::random([1, 2, 4, 4, 4], Distribution::Default, &Default::default());
        let y = hooked.forward(x);

        let stored = hook.stored().expect("forward hook fired");
        assert_eq!(stored.dims(), [1, 3, 4, 4, 4]);
        assert_eq!(
            stored.into_data().to_vec::<f32>().unwrap(),
            y.into_data().to_vec::<f32>().unwrap()
        );
    }

    #[test]
    fn test_hook_sees_module() {
        let hooked = conv();
        let hook = Hook::new(
            hooked.forward_hooks(),
            |module: &ConvLayer<TestBackend>, _: &_, _: &_| module.out_channels(),
            CaptureOptions::<TestBackend>::new(),
        );

        let out = test_forward::<TestBackend, _>(&hooked, [3, 3, 3], true, &Default::default())
            .unwrap();
        assert_eq!(out.dims(), [2, 3, 3, 3, 3]);
        assert_eq!(hook.stored(), Some(3));
    }

    #[test]
    fn test_backward_point_is_separate() {
        let hooked = conv();
        let forward = hook_output::<TestBackend, _, _, _>(hooked.forward_hooks());
        let backward = hook_output::<TestBackend, _, _, _>(hooked.backward_hooks());

        let device = Default::default();
        hooked.backward(
            &Tensor::zeros([1, 2, 2, 2, 2], &device),
            &Tensor::ones([1, 3, 2, 2, 2], &device),
        );
        assert!(forward.stored().is_none());
        assert_eq!(backward.stored().map(|grad| grad.dims()), Some([1, 3, 2, 2, 2]));
    }
}
