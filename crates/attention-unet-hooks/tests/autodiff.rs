//! Hooks on a training-mode model with real gradients
//!
//! Run with: `cargo test -p attention-unet-hooks --test autodiff`

use attention_unet_blocks::{res_blocks, ResBlockKind, ResBlocks};
use attention_unet_hooks::{hook_output, hook_outputs, CaptureOptions, Hook, Hooked};
use burn::prelude::*;
use burn::tensor::Distribution;
use burn_autodiff::Autodiff;
use burn_ndarray::NdArray;

type TestBackend = Autodiff<NdArray<f32>>;

fn chain(device: &<TestBackend as Backend>::Device) -> ResBlocks<TestBackend> {
    res_blocks(ResBlockKind::Basic, 2, 4, 2, 2, device).unwrap()
}

#[test]
fn captured_outputs_are_detached_by_default() {
    let device = Default::default();
    let hooked = Hooked::new(chain(&device));
    let hook = hook_output::<TestBackend, _, _, _>(hooked.forward_hooks());

    let x = Tensor::<TestBackend, 5>::random([2, 2, 4, 4, 4], Distribution::Default, &device)
        .require_grad();
    let y = hooked.forward(x);

    assert!(y.is_require_grad());
    let stored = hook.stored().unwrap();
    assert_eq!(stored.dims(), [2, 4, 2, 2, 2]);
    assert!(!stored.is_require_grad());
}

#[test]
fn attached_capture_keeps_graph() {
    let device = Default::default();
    let hooked = Hooked::new(chain(&device));
    let hook = Hook::new(
        hooked.forward_hooks(),
        |_: &ResBlocks<TestBackend>, _: &_, output: &Tensor<TestBackend, 5>| output.clone(),
        CaptureOptions::<TestBackend>::new().with_detach(false),
    );

    let x = Tensor::<TestBackend, 5>::random([1, 2, 4, 4, 4], Distribution::Default, &device)
        .require_grad();
    hooked.forward(x.clone());

    // Gradients flow through the captured activation back to the input
    let grads = hook.stored().unwrap().sum().backward();
    let grad = x.grad(&grads).expect("input gradient");
    assert_eq!(grad.dims(), [1, 2, 4, 4, 4]);
}

#[test]
fn backward_hooks_receive_gradients() {
    let device = Default::default();
    let hooked = Hooked::new(chain(&device));
    let grads_seen = hook_output::<TestBackend, _, _, _>(hooked.backward_hooks());

    let x = Tensor::<TestBackend, 5>::random([1, 2, 4, 4, 4], Distribution::Default, &device)
        .require_grad();
    let y = hooked.forward(x.clone());
    let grad_output = y.ones_like();
    let grads = y.sum().backward();
    let grad_input = Tensor::from_inner(x.grad(&grads).unwrap());

    hooked.backward(&grad_input, &grad_output);
    assert_eq!(grads_seen.stored().map(|g| g.dims()), Some([1, 4, 2, 2, 2]));
}

#[test]
fn hooks_on_several_blocks() {
    let device = Default::default();
    let first = Hooked::new(chain(&device));
    let second = Hooked::new(chain(&device));
    let mut hooks =
        hook_outputs::<TestBackend, _, _, _>(&[first.forward_hooks(), second.forward_hooks()]);

    let x = Tensor::<TestBackend, 5>::random([1, 2, 4, 4, 4], Distribution::Default, &device);
    first.forward(x.clone());
    assert!(hooks[0].stored().is_some());
    assert!(hooks[1].stored().is_none());

    hooks.remove();
    assert!(first.forward_hooks().is_empty());
    assert!(second.forward_hooks().is_empty());
}
