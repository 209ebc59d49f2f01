//! Preparing captured values before a hook function sees them

use std::fmt;
use std::rc::Rc;

use burn::prelude::*;

use crate::gather::{maybe_gather, ReplicaGather};

/// How captured inputs and outputs are prepared
pub struct CaptureOptions<B: Backend> {
    /// Cut captured tensors from the autodiff graph
    pub detach: bool,
    /// Move detached captures to this device
    pub device: Option<B::Device>,
    /// Gather detached captures across replicas
    pub gather: Option<Rc<dyn ReplicaGather<B>>>,
}

impl<B: Backend> CaptureOptions<B> {
    /// Detached, left on their device, not gathered
    pub fn new() -> Self {
        Self {
            detach: true,
            device: None,
            gather: None,
        }
    }

    pub fn with_detach(mut self, detach: bool) -> Self {
        self.detach = detach;
        self
    }

    pub fn with_device(mut self, device: B::Device) -> Self {
        self.device = Some(device);
        self
    }

    pub fn with_gather(mut self, gather: Rc<dyn ReplicaGather<B>>) -> Self {
        self.gather = Some(gather);
        self
    }

    /// Detaches, then gathers, then moves to the target device
    ///
    /// Gather and device move only happen on detached captures; with
    /// `detach` off the value is passed through untouched.
    pub fn prepare<T: Capture<B>>(&self, value: &T) -> T {
        let value = value.clone();
        if !self.detach {
            return value;
        }
        let mut value = value.detach();
        if let Some(gather) = &self.gather {
            value = value.gather(gather.as_ref());
        }
        if let Some(device) = &self.device {
            value = value.to_device(device);
        }
        value
    }
}

impl<B: Backend> Default for CaptureOptions<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: Backend> Clone for CaptureOptions<B> {
    fn clone(&self) -> Self {
        Self {
            detach: self.detach,
            device: self.device.clone(),
            gather: self.gather.clone(),
        }
    }
}

impl<B: Backend> fmt::Debug for CaptureOptions<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaptureOptions")
            .field("detach", &self.detach)
            .field("device", &self.device)
            .field("gather", &self.gather.is_some())
            .finish()
    }
}

/// A value made of tensors that a hook can capture
pub trait Capture<B: Backend>: Clone {
    fn detach(self) -> Self;
    fn to_device(self, device: &B::Device) -> Self;
    fn gather(self, gather: &dyn ReplicaGather<B>) -> Self;
}

impl<B: Backend, const D: usize> Capture<B> for Tensor<B, D> {
    fn detach(self) -> Self {
        Tensor::detach(self)
    }

    fn to_device(self, device: &B::Device) -> Self {
        Tensor::to_device(self, device)
    }

    fn gather(self, gather: &dyn ReplicaGather<B>) -> Self {
        maybe_gather(self, gather)
    }
}

impl<B: Backend, T: Capture<B>> Capture<B> for Option<T> {
    fn detach(self) -> Self {
        self.map(T::detach)
    }

    fn to_device(self, device: &B::Device) -> Self {
        self.map(|value| value.to_device(device))
    }

    fn gather(self, gather: &dyn ReplicaGather<B>) -> Self {
        self.map(|value| value.gather(gather))
    }
}

impl<B: Backend, T: Capture<B>> Capture<B> for Vec<T> {
    fn detach(self) -> Self {
        self.into_iter().map(T::detach).collect()
    }

    fn to_device(self, device: &B::Device) -> Self {
        self.into_iter().map(|value| value.to_device(device)).collect()
    }

    fn gather(self, gather: &dyn ReplicaGather<B>) -> Self {
        self.into_iter().map(|value| value.gather(gather)).collect()
    }
}

impl<B: Backend, T1: Capture<B>, T2: Capture<B>> Capture<B> for (T1, T2) {
    fn detach(self) -> Self {
        (self.0.detach(), self.1.detach())
    }

    fn to_device(self, device: &B::Device) -> Self {
        (self.0.to_device(device), self.1.to_device(device))
    }

    fn gather(self, gather: &dyn ReplicaGather<B>) -> Self {
        (self.0.gather(gather), self.1.gather(gather))
    }
}
