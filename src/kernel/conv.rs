//! Pointwise (1x1, stride 1, no padding) convolution over NHWC tensors.
//!
//! This is the fully-connected kernel applied at every pixel: per-channel
//! requantization, symmetric weights, 32-bit accumulation.

use log::debug;

use super::reference::dot_i8_offset;
use super::MAX_ACCUM_DEPTH_I32;
use crate::error::{check_len, KernelError, Result};
use crate::params::{FullyConnectedParams, PerChannelQuant};
use crate::quant::requantize_and_clamp;
use crate::shape::{matching_dim, RuntimeShape};

/// Per-channel 1x1 convolution.
///
/// Shapes are `input [N, H, W, Cin]`, `filter [Cout, 1, 1, Cin]`,
/// `output [N, H, W, Cout]`. Only the offsets and activation range of
/// `params` are used; scaling comes from `per_channel`.
#[allow(clippy::too_many_arguments)]
pub fn conv_per_channel_1x1(
    params: &FullyConnectedParams,
    per_channel: &PerChannelQuant,
    input_shape: &RuntimeShape,
    input: &[i8],
    filter_shape: &RuntimeShape,
    filter: &[i8],
    bias: Option<&[i32]>,
    output_shape: &RuntimeShape,
    output: &mut [i8],
) -> Result<()> {
    params.check_activation_range()?;
    for (name, s) in [("input", input_shape), ("filter", filter_shape), ("output", output_shape)] {
        if s.dimensions_count() != 4 {
            return Err(KernelError::Shape(format!("{} rank {} != 4", name, s.dimensions_count())));
        }
    }
    if filter_shape.dims(1) != 1 || filter_shape.dims(2) != 1 {
        return Err(KernelError::Shape(format!("filter {:?} is not 1x1", filter_shape.as_slice())));
    }
    let batches = matching_dim(input_shape, 0, output_shape, 0)?;
    let height = matching_dim(input_shape, 1, output_shape, 1)?;
    let width = matching_dim(input_shape, 2, output_shape, 2)?;
    let input_depth = matching_dim(input_shape, 3, filter_shape, 3)?;
    let output_depth = matching_dim(filter_shape, 0, output_shape, 3)?;
    if let Some(b) = bias {
        if b.len() != output_depth {
            return Err(KernelError::Shape(format!("bias length {} != output depth {}", b.len(), output_depth)));
        }
    }
    if per_channel.len() < output_depth {
        return Err(KernelError::BufferSize { name: "per-channel quant", needed: output_depth, actual: per_channel.len() });
    }
    check_len("input", input_shape.flat_size(), input.len())?;
    check_len("filter", filter_shape.flat_size(), filter.len())?;
    check_len("output", output_shape.flat_size(), output.len())?;
    debug_assert!(input_depth <= MAX_ACCUM_DEPTH_I32);
    debug!("conv 1x1 per-channel: {}x{}x{} in={} out={}", batches, height, width, input_depth, output_depth);

    let pixels = batches * height * width;
    for p in 0..pixels {
        let input_px = &input[p * input_depth..(p + 1) * input_depth];
        let output_px = &mut output[p * output_depth..(p + 1) * output_depth];
        for (oc, out) in output_px.iter_mut().enumerate() {
            let filter_row = &filter[oc * input_depth..(oc + 1) * input_depth];
            let mut acc = dot_i8_offset(filter_row, input_px, params.input_offset);
            if let Some(bias) = bias { acc = acc.saturating_add(bias[oc]); }
            let q = per_channel.get(oc);
            *out = requantize_and_clamp(acc, q.multiplier, q.shift, params.output_offset, params.quantized_activation_min, params.quantized_activation_max) as i8;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_spatial_filter() {
        let mut out = [0i8; 4];
        let err = conv_per_channel_1x1(
            &FullyConnectedParams::default(),
            &PerChannelQuant::uniform(1 << 30, 1, 1),
            &RuntimeShape::new(&[1, 2, 2, 1]), &[0; 4],
            &RuntimeShape::new(&[1, 3, 3, 1]), &[0; 9],
            None,
            &RuntimeShape::new(&[1, 2, 2, 1]), &mut out,
        ).unwrap_err();
        assert!(matches!(err, KernelError::Shape(_)));
    }

    #[test]
    fn bias_length_must_match() {
        let mut out = [0i8; 2];
        let err = conv_per_channel_1x1(
            &FullyConnectedParams::default(),
            &PerChannelQuant::uniform(1 << 30, 1, 2),
            &RuntimeShape::new(&[1, 1, 1, 1]), &[1],
            &RuntimeShape::new(&[2, 1, 1, 1]), &[1, 1],
            Some(&[0]),
            &RuntimeShape::new(&[1, 1, 1, 2]), &mut out,
        ).unwrap_err();
        assert!(matches!(err, KernelError::Shape(_)));
    }
}
