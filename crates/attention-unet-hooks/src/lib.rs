//! Hooks for Inspecting Attention U-Net Blocks
//!
//! Wrap a block in [`Hooked`] to expose its forward and backward events,
//! then register [`Hook`]s on them. A hook keeps the latest result of its
//! function and is unregistered when removed or dropped.
//!
//! # Example
//!
//! ```ignore
//! use attention_unet_hooks::{hook_output, Hooked};
//!
//! let hooked = Hooked::new(block);
//! let hook = hook_output::<Backend, _, _, _>(hooked.forward_hooks());
//! hooked.forward(x);
//! let activations = hook.stored();
//! ```
//!
//! Hook state is single-threaded; a [`Hooked`] module is not `Send`.

pub mod capture;
pub mod gather;
pub mod hook;
pub mod hooked;

pub use capture::{Capture, CaptureOptions};
pub use gather::{maybe_gather, ReplicaGather, SingleProcess};
pub use hook::{hook_output, hook_outputs, Hook, HookPoint, Hooks};
pub use hooked::{BackwardPoint, ForwardPoint, Hooked};
