//! Resizing of volumetric tensors
//!
//! burn's `interpolate` only covers 4D inputs, so 3D resizing is done
//! axis by axis with index selection. Trilinear interpolation is separable,
//! which makes three 1D linear passes exact.

use burn::prelude::*;

/// Resampling mode for [`resize3d`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interpolation {
    /// Nearest neighbour, source index `floor(dst * in / out)`
    Nearest,
    /// Trilinear with `align_corners = false`
    Trilinear,
}

/// Resizes the spatial axes of a `[batch, channels, depth, height, width]` tensor
///
/// # Arguments
///
/// * `x` - Input tensor
/// * `size` - Target `[depth, height, width]`
/// * `mode` - Resampling mode
pub fn resize3d<B: Backend>(x: Tensor<B, 5>, size: [usize; 3], mode: Interpolation) -> Tensor<B, 5> {
    let dims = x.dims();
    let mut x = x;

    for (axis, &output) in size.iter().enumerate() {
        let dim = axis + 2;
        let input = dims[dim];
        if input == output {
            continue;
        }
        x = match mode {
            Interpolation::Nearest => resize_nearest(x, dim, input, output),
            Interpolation::Trilinear => resize_linear(x, dim, input, output),
        };
    }

    x
}

/// Spatial `[depth, height, width]` of a 5D tensor
pub fn spatial_dims<B: Backend>(x: &Tensor<B, 5>) -> [usize; 3] {
    let [_, _, depth, height, width] = x.dims();
    [depth, height, width]
}

fn resize_nearest<B: Backend>(x: Tensor<B, 5>, dim: usize, input: usize, output: usize) -> Tensor<B, 5> {
    let scale = input as f64 / output as f64;
    let indices: Vec<i64> = (0..output)
        .map(|i| ((i as f64 * scale).floor() as usize).min(input - 1) as i64)
        .collect();

    let device = x.device();
    x.select(dim, index_tensor(indices, &device))
}

fn resize_linear<B: Backend>(x: Tensor<B, 5>, dim: usize, input: usize, output: usize) -> Tensor<B, 5> {
    let scale = input as f64 / output as f64;

    let mut lower = Vec::with_capacity(output);
    let mut upper = Vec::with_capacity(output);
    let mut weights = Vec::with_capacity(output);
    for i in 0..output {
        let src = ((i as f64 + 0.5) * scale - 0.5).max(0.0);
        let i0 = (src.floor() as usize).min(input - 1);
        let i1 = (i0 + 1).min(input - 1);
        lower.push(i0 as i64);
        upper.push(i1 as i64);
        weights.push((src - i0 as f64) as f32);
    }

    let device = x.device();
    let low = x.clone().select(dim, index_tensor(lower, &device));
    let high = x.select(dim, index_tensor(upper, &device));

    let mut shape = [1usize; 5];
    shape[dim] = output;
    let weights = Tensor::<B, 1>::from_data(TensorData::new(weights, [output]), &device).reshape(shape);

    low.clone() + (high - low) * weights
}

fn index_tensor<B: Backend>(indices: Vec<i64>, device: &B::Device) -> Tensor<B, 1, Int> {
    let len = indices.len();
    Tensor::from_data(TensorData::new(indices, [len]), device)
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    fn ramp(width: usize) -> Tensor<TestBackend, 5> {
        let device = Default::default();
        let values: Vec<f32> = (0..width).map(|v| v as f32).collect();
        Tensor::<TestBackend, 1>::from_data(TensorData::new(values, [width]), &device)
            .reshape([1, 1, 1, 1, width])
    }

    #[test]
    fn test_nearest_upsample_repeats() {
        let y = resize3d(ramp(2), [1, 1, 4], Interpolation::Nearest);
        let values: Vec<f32> = y.into_data().to_vec().unwrap();
        assert_eq!(values, vec![0.0, 0.0, 1.0, 1.0]);
    }

    #[test]
    fn test_nearest_downsample_picks_floor() {
        let y = resize3d(ramp(5), [1, 1, 2], Interpolation::Nearest);
        let values: Vec<f32> = y.into_data().to_vec().unwrap();
        // scale 2.5: indices 0 and 2
        assert_eq!(values, vec![0.0, 2.0]);
    }

    #[test]
    fn test_trilinear_upsample_half_pixel() {
        let y = resize3d(ramp(2), [1, 1, 4], Interpolation::Trilinear);
        let values: Vec<f32> = y.into_data().to_vec().unwrap();
        let expected = [0.0, 0.25, 0.75, 1.0];
        for (a, b) in values.iter().zip(expected.iter()) {
            assert!((a - b).abs() < 1e-6, "{values:?}");
        }
    }

    #[test]
    fn test_trilinear_keeps_constant_field() {
        let device = Default::default();
        let x = Tensor::<TestBackend, 5>::ones([2, 3, 3, 5, 4], &device).mul_scalar(2.5);
        let y = resize3d(x, [6, 2, 7], Interpolation::Trilinear);
        assert_eq!(y.dims(), [2, 3, 6, 2, 7]);
        for v in y.into_data().to_vec::<f32>().unwrap() {
            assert!((v - 2.5).abs() < 1e-5);
        }
    }

    #[test]
    fn test_same_size_is_identity() {
        let y = resize3d(ramp(3), [1, 1, 3], Interpolation::Trilinear);
        assert_eq!(y.into_data().to_vec::<f32>().unwrap(), vec![0.0, 1.0, 2.0]);
        assert_eq!(spatial_dims(&ramp(3)), [1, 1, 3]);
    }
}
