//! Fully-connected layer offloaded to the matmul accelerator.
//!
//! The device only produces raw accumulators; bias, requantization and
//! clamping run here with the same epilogue as the reference kernel, so the
//! two paths agree byte for byte.

use log::{debug, trace};

use super::FcDims;
use crate::accel::block::{InputBlock, ResultBlock, WeightBlock};
use crate::accel::channel::{ChannelState, CommandChannel, DeviceConfig, Opcode};
use crate::error::Result;
use crate::params::FullyConnectedParams;
use crate::quant::requantize_and_clamp;
use crate::shape::RuntimeShape;

/// Per-tensor 8x8 kernel executed through `channel`.
///
/// The whole problem must fit one block: output depth and accumulation depth
/// within `channel.limits()`, otherwise `TileTooLarge`. The weight offset is
/// ignored, as in the reference per-tensor kernel.
#[allow(clippy::too_many_arguments)]
pub fn fully_connected_offloaded<C: CommandChannel + ?Sized>(
    params: &FullyConnectedParams,
    channel: &mut C,
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
    let limits = channel.limits();
    limits.check(d.output_depth, d.accum_depth)?;
    debug!("fc offloaded: batches={} out={} depth={} limits={:?}", d.batches, d.output_depth, d.accum_depth, limits);

    let mut weights = WeightBlock::new(limits);
    weights.load(filter, d.output_depth, d.accum_depth)?;
    let mut column = InputBlock::new(limits);
    let mut results = ResultBlock::new(limits);
    let config = DeviceConfig { depth: d.accum_depth, channels: d.output_depth, batch: 1 };

    for b in 0..d.batches {
        column.load(&input[b * d.accum_depth..(b + 1) * d.accum_depth])?;
        if d.accum_depth == 0 || d.output_depth == 0 {
            // nothing to multiply; accumulators are zero
            results.reset(d.output_depth);
        } else {
            run_block(channel, &weights, &column, config, params.input_offset, &mut results)?;
        }
        for (c, raw) in results.as_slice().iter().enumerate() {
            let mut acc = *raw;
            if let Some(bias) = bias { acc = acc.saturating_add(bias[c]); }
            let v = requantize_and_clamp(acc, params.output_multiplier, params.output_shift, params.output_offset, params.quantized_activation_min, params.quantized_activation_max);
            output[c + d.output_depth * b] = v as i8;
        }
    }
    Ok(())
}

/// Stream one weight block and one input column through the device and
/// drain its accumulators into `results`.
pub fn run_block<C: CommandChannel + ?Sized>(
    channel: &mut C,
    weights: &WeightBlock,
    column: &InputBlock,
    config: DeviceConfig,
    input_offset: i32,
    results: &mut ResultBlock,
) -> Result<()> {
    let mut state = ChannelState::Idle;
    for (i, word) in weights.words().enumerate() {
        state = state.next(Opcode::LoadWeight)?;
        channel.load_weight(word, i as u32)?;
    }
    for (i, word) in column.words().enumerate() {
        state = state.next(Opcode::LoadInput)?;
        channel.load_input(word, i as u32)?;
    }
    state = state.next(Opcode::Configure)?;
    channel.configure(config, input_offset)?;
    state = state.next(Opcode::Trigger)?;
    channel.trigger()?;
    results.reset(config.channels);
    for c in 0..config.channels {
        state = state.next(Opcode::ReadResult)?;
        results.store(c, channel.read_result(c as u32)?);
    }
    state.finish()?;
    trace!("block done: {} weight words, {} input words, {} results", weights.word_count(), column.depth(), config.channels);
    Ok(())
}
