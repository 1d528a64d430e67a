//! Scalar reference kernels, one output element at a time.
//!
//! Per-channel kernels assume symmetric weights (no weight offset). The
//! per-tensor 16-bit kernel still folds `weights_offset` in for older
//! asymmetric models; the per-tensor 8-bit kernel does not.

use log::debug;

use super::{FcDims, MAX_ACCUM_DEPTH_I32};
use crate::error::{KernelError, Result};
use crate::params::{FullyConnectedParams, PerChannelQuant};
use crate::quant::{requantize_and_clamp, Accumulator};
use crate::shape::RuntimeShape;

fn check_per_channel(per_channel: &PerChannelQuant, output_depth: usize) -> Result<()> {
    if per_channel.len() < output_depth {
        return Err(KernelError::BufferSize { name: "per-channel quant", needed: output_depth, actual: per_channel.len() });
    }
    Ok(())
}

/// Raw i32 dot product of one filter row with one input row, `input_offset`
/// added to every activation.
#[inline]
pub fn dot_i8_offset(filter_row: &[i8], input_row: &[i8], input_offset: i32) -> i32 {
    let mut acc: i32 = 0;
    for (w, x) in filter_row.iter().zip(input_row) {
        acc += (*w as i32) * (*x as i32 + input_offset);
    }
    acc
}

/// Per-channel 8x8 kernel. Output rank must be exactly 2.
#[allow(clippy::too_many_arguments)]
pub fn fully_connected_per_channel_i8(
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
    let d = FcDims::from_shapes(filter_shape, output_shape, true)?;
    d.check_buffers(input_shape, input.len(), filter.len(), bias.map(|b| b.len()), output.len())?;
    check_per_channel(per_channel, d.output_depth)?;
    debug_assert!(d.accum_depth <= MAX_ACCUM_DEPTH_I32);
    debug!("fc per-channel i8: batches={} out={} depth={}", d.batches, d.output_depth, d.accum_depth);

    for b in 0..d.batches {
        let input_row = &input[b * d.accum_depth..(b + 1) * d.accum_depth];
        for c in 0..d.output_depth {
            let filter_row = &filter[c * d.accum_depth..(c + 1) * d.accum_depth];
            let mut acc = dot_i8_offset(filter_row, input_row, params.input_offset);
            if let Some(bias) = bias { acc = acc.saturating_add(bias[c]); }
            let q = per_channel.get(c);
            let v = requantize_and_clamp(acc, q.multiplier, q.shift, params.output_offset, params.quantized_activation_min, params.quantized_activation_max);
            output[c + d.output_depth * b] = v as i8;
        }
    }
    Ok(())
}

/// Per-channel 16-bit activation kernel over accumulator `A`.
///
/// Activations are symmetric: neither input nor output offset is applied.
#[allow(clippy::too_many_arguments)]
pub fn fully_connected_per_channel_i16<A: Accumulator>(
    params: &FullyConnectedParams,
    per_channel: &PerChannelQuant,
    input_shape: &RuntimeShape,
    input: &[i16],
    filter_shape: &RuntimeShape,
    filter: &[i8],
    bias: Option<&[A]>,
    output_shape: &RuntimeShape,
    output: &mut [i16],
) -> Result<()> {
    params.check_activation_range()?;
    let d = FcDims::from_shapes(filter_shape, output_shape, false)?;
    d.check_buffers(input_shape, input.len(), filter.len(), bias.map(|b| b.len()), output.len())?;
    check_per_channel(per_channel, d.output_depth)?;
    debug_assert!(d.accum_depth <= A::MAX_DEPTH, "depth {} too deep for {}", d.accum_depth, std::any::type_name::<A>());
    debug!("fc per-channel i16 ({}): batches={} out={} depth={}", std::any::type_name::<A>(), d.batches, d.output_depth, d.accum_depth);

    for b in 0..d.batches {
        let input_row = &input[b * d.accum_depth..(b + 1) * d.accum_depth];
        for c in 0..d.output_depth {
            let filter_row = &filter[c * d.accum_depth..(c + 1) * d.accum_depth];
            let mut acc = A::default();
            for (w, x) in filter_row.iter().zip(input_row) {
                acc += A::from(*w as i32 * *x as i32);
            }
            if let Some(bias) = bias { acc = acc.add_bias(bias[c]); }
            let q = per_channel.get(c);
            let v = acc.requantize(q.multiplier, q.shift).clamp(params.quantized_activation_min, params.quantized_activation_max);
            output[c + d.output_depth * b] = v as i16;
        }
    }
    Ok(())
}

/// Per-tensor 8x8 kernel. `weights_offset` is ignored.
#[allow(clippy::too_many_arguments)]
pub fn fully_connected_i8(
    params: &FullyConnectedParams,
    input_shape: &RuntimeShape,
    input: &[i8],
    filter_shape: &RuntimeShape,
    filter: &[i8],
    bias: Option<&[i32]>,
    output_shape: &RuntimeShape,
    output: &mut [i8],
) -> Result<()> {
    params.check_activation_range()?;
    let d = FcDims::from_shapes(filter_shape, output_shape, false)?;
    d.check_buffers(input_shape, input.len(), filter.len(), bias.map(|b| b.len()), output.len())?;
    debug_assert!(d.accum_depth <= MAX_ACCUM_DEPTH_I32);
    debug!("fc per-tensor i8: batches={} out={} depth={}", d.batches, d.output_depth, d.accum_depth);

    for b in 0..d.batches {
        let input_row = &input[b * d.accum_depth..(b + 1) * d.accum_depth];
        for c in 0..d.output_depth {
            let filter_row = &filter[c * d.accum_depth..(c + 1) * d.accum_depth];
            let mut acc = dot_i8_offset(filter_row, input_row, params.input_offset);
            if let Some(bias) = bias { acc = acc.saturating_add(bias[c]); }
            let v = requantize_and_clamp(acc, params.output_multiplier, params.output_shift, params.output_offset, params.quantized_activation_min, params.quantized_activation_max);
            output[c + d.output_depth * b] = v as i8;
        }
    }
    Ok(())
}

/// Per-tensor 16-bit activation kernel over accumulator `A`.
///
/// Computes `(filter + weights_offset) * input`; no input or output offset.
#[allow(clippy::too_many_arguments)]
pub fn fully_connected_i16<A: Accumulator>(
    params: &FullyConnectedParams,
    input_shape: &RuntimeShape,
    input: &[i16],
    filter_shape: &RuntimeShape,
    filter: &[i8],
    bias: Option<&[A]>,
    output_shape: &RuntimeShape,
    output: &mut [i16],
) -> Result<()> {
    params.check_activation_range()?;
    let d = FcDims::from_shapes(filter_shape, output_shape, false)?;
    d.check_buffers(input_shape, input.len(), filter.len(), bias.map(|b| b.len()), output.len())?;
    debug_assert!(d.accum_depth <= A::MAX_DEPTH, "depth {} too deep for {}", d.accum_depth, std::any::type_name::<A>());
    debug!("fc per-tensor i16 ({}): batches={} out={} depth={}", std::any::type_name::<A>(), d.batches, d.output_depth, d.accum_depth);

    for b in 0..d.batches {
        let input_row = &input[b * d.accum_depth..(b + 1) * d.accum_depth];
        for c in 0..d.output_depth {
            let filter_row = &filter[c * d.accum_depth..(c + 1) * d.accum_depth];
            let mut acc = A::default();
            for (w, x) in filter_row.iter().zip(input_row) {
                acc += A::from((*w as i32 + params.weights_offset) * *x as i32);
            }
            if let Some(bias) = bias { acc = acc.add_bias(bias[c]); }
            let v = acc.requantize(params.output_multiplier, params.output_shift).clamp(params.quantized_activation_min, params.quantized_activation_max);
            output[c + d.output_depth * b] = v as i16;
        }
    }
    Ok(())
}
