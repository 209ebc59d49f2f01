//! Collecting captured tensors from every replica of a data-parallel run

use burn::prelude::*;

/// Collective used to gather captured tensors across replicas
///
/// Tensors are exchanged flattened so the trait stays object safe; the
/// caller restores the shape.
pub trait ReplicaGather<B: Backend> {
    /// Number of participating replicas
    fn world_size(&self) -> usize;

    /// Returns the flattened tensor of every replica, in rank order
    fn all_gather(&self, tensor: Tensor<B, 1>) -> Vec<Tensor<B, 1>>;
}

/// Single-process run: the only replica is the caller
#[derive(Debug, Clone, Copy, Default)]
pub struct SingleProcess;

impl<B: Backend> ReplicaGather<B> for SingleProcess {
    fn world_size(&self) -> usize {
        1
    }

    fn all_gather(&self, tensor: Tensor<B, 1>) -> Vec<Tensor<B, 1>> {
        vec![tensor]
    }
}

/// Gathers `tensor` from every replica
///
/// Scalars (rank 1, shape `[1]`, what burn's full reductions return) are
/// averaged across replicas; anything else, batch-of-one tensors included,
/// is concatenated along the batch axis. With one replica the tensor is
/// returned unchanged.
pub fn maybe_gather<B: Backend, const D: usize>(
    tensor: Tensor<B, D>,
    gather: &dyn ReplicaGather<B>,
) -> Tensor<B, D> {
    if gather.world_size() <= 1 {
        return tensor;
    }

    let dims = tensor.dims();
    let numel = tensor.shape().num_elements();
    let parts = gather.all_gather(tensor.reshape([numel]));

    if D == 1 && numel == 1 {
        return Tensor::cat(parts, 0).mean().reshape(dims);
    }

    let per_sample: usize = dims.iter().skip(1).product();
    let parts = parts
        .into_iter()
        .map(|part| {
            let mut shape = dims;
            shape[0] = part.shape().num_elements() / per_sample.max(1);
            part.reshape(shape)
        })
        .collect();
    Tensor::cat(parts, 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    /// Two replicas, the second one holding twice the first one's values
    struct Doubled;

    impl ReplicaGather<TestBackend> for Doubled {
        fn world_size(&self) -> usize {
            2
        }

        fn all_gather(&self, tensor: Tensor<TestBackend, 1>) -> Vec<Tensor<TestBackend, 1>> {
            vec![tensor.clone(), tensor * 2.0]
        }
    }

    #[test]
    fn test_single_process_is_identity() {
        let device = Default::default();
        let x = Tensor::<TestBackend, 2>::from_floats([[1.0, 2.0], [3.0, 4.0]], &device);
        let y = maybe_gather(x.clone(), &SingleProcess);
        assert_eq!(
            y.into_data().to_vec::<f32>().unwrap(),
            x.into_data().to_vec::<f32>().unwrap()
        );
    }

    #[test]
    fn test_concatenates_on_batch_axis() {
        let device = Default::default();
        let x = Tensor::<TestBackend, 2>::from_floats([[1.0, 2.0], [3.0, 4.0]], &device);
        let y = maybe_gather(x, &Doubled);

        assert_eq!(y.dims(), [4, 2]);
        assert_eq!(
            y.into_data().to_vec::<f32>().unwrap(),
            vec![1.0, 2.0, 3.0, 4.0, 2.0, 4.0, 6.0, 8.0]
        );
    }

    #[test]
    fn test_scalar_is_averaged() {
        let device = Default::default();
        let loss = Tensor::<TestBackend, 1>::from_floats([2.0], &device);
        let y = maybe_gather(loss, &Doubled);

        assert_eq!(y.dims(), [1]);
        assert_eq!(y.into_scalar(), 3.0);
    }

    #[test]
    fn test_single_sample_batch_is_concatenated() {
        let device = Default::default();
        let x = Tensor::<TestBackend, 5>::full([1, 1, 1, 1, 1], 2.0, &device);
        let y = maybe_gather(x, &Doubled);

        assert_eq!(y.dims(), [2, 1, 1, 1, 1]);
        assert_eq!(y.into_data().to_vec::<f32>().unwrap(), vec![2.0, 4.0]);
    }
}
