//! Quantized fully-connected kernels.
//!
//! `reference` holds the scalar loops, `offload` streams the same problem
//! through an accelerator command channel, `conv` is the pointwise
//! convolution special case.

pub mod conv;
pub mod offload;
pub mod reference;

use crate::accel::channel::CommandChannel;
use crate::error::{check_len, KernelError, Result};
use crate::params::FullyConnectedParams;
use crate::shape::RuntimeShape;
use crate::unpack::unpack_int4_weights;

/// Deepest accumulation a 32-bit accumulator is guaranteed to hold:
/// each term is at most 127 * 256 < 2^15.
pub const MAX_ACCUM_DEPTH_I32: usize = 1 << 16;

/// Problem extents derived from the filter and output shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FcDims {
    pub batches: usize,
    pub output_depth: usize,
    pub accum_depth: usize,
}

impl FcDims {
    /// Validate ranks and the output/filter channel relation.
    ///
    /// `exact_rank2` selects the per-channel 8-bit rule (output rank must be 2)
    /// over the general one (output rank at least 1).
    pub fn from_shapes(filter_shape: &RuntimeShape, output_shape: &RuntimeShape, exact_rank2: bool) -> Result<Self> {
        let filter_rank = filter_shape.dimensions_count();
        let output_rank = output_shape.dimensions_count();
        if filter_rank < 2 {
            return Err(KernelError::Shape(format!("filter rank {} < 2", filter_rank)));
        }
        if exact_rank2 && output_rank != 2 {
            return Err(KernelError::Shape(format!("output rank {} != 2", output_rank)));
        }
        if output_rank < 1 {
            return Err(KernelError::Shape("output rank 0".to_string()));
        }
        let batches = output_shape.flat_size_skip_dim(output_rank - 1);
        let output_depth = output_shape.dims(output_rank - 1);
        let filter_channels = filter_shape.dims(filter_rank - 2);
        if output_depth > filter_channels {
            return Err(KernelError::Shape(format!("output depth {} > filter channels {}", output_depth, filter_channels)));
        }
        let accum_depth = filter_shape.dims(filter_rank - 1);
        Ok(Self { batches, output_depth, accum_depth })
    }

    /// Check every buffer against the extents it is indexed with.
    pub fn check_buffers(&self, input_shape: &RuntimeShape, input: usize, filter: usize, bias: Option<usize>, output: usize) -> Result<()> {
        let needed_input = self.batches * self.accum_depth;
        if input_shape.flat_size() < needed_input {
            return Err(KernelError::Shape(format!("input shape {:?} holds fewer than {} elements", input_shape.as_slice(), needed_input)));
        }
        check_len("input", needed_input, input)?;
        check_len("filter", self.output_depth * self.accum_depth, filter)?;
        if let Some(b) = bias { check_len("bias", self.output_depth, b)?; }
        check_len("output", self.batches * self.output_depth, output)
    }
}

/// Where the 8-bit per-tensor kernel runs.
pub enum ExecutionPath<'a> {
    Reference,
    Offloaded(&'a mut dyn CommandChannel),
}

/// Fully-connected layer whose weights arrive packed two per byte.
///
/// The weights are expanded into `unpacked_filter` (at least the filter's
/// flat size) and the 8-bit per-tensor kernel runs on `path`.
#[allow(clippy::too_many_arguments)]
pub fn fully_connected_packed_int4(
    params: &FullyConnectedParams,
    input_shape: &RuntimeShape,
    input: &[i8],
    filter_shape: &RuntimeShape,
    packed_filter: &[i8],
    unpacked_filter: &mut [i8],
    bias: Option<&[i32]>,
    output_shape: &RuntimeShape,
    output: &mut [i8],
    path: ExecutionPath<'_>,
) -> Result<()> {
    let count = filter_shape.flat_size();
    unpack_int4_weights(packed_filter, count, unpacked_filter)?;
    let filter = &unpacked_filter[..count];
    match path {
        ExecutionPath::Reference => reference::fully_connected_i8(params, input_shape, input, filter_shape, filter, bias, output_shape, output),
        ExecutionPath::Offloaded(channel) => offload::fully_connected_offloaded(params, channel, input_shape, input, filter_shape, filter, bias, output_shape, output),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dims_from_rank3_output() {
        let d = FcDims::from_shapes(&RuntimeShape::new(&[8, 16]), &RuntimeShape::new(&[2, 3, 8]), false).unwrap();
        assert_eq!(d, FcDims { batches: 6, output_depth: 8, accum_depth: 16 });
    }

    #[test]
    fn dims_reject_bad_ranks() {
        assert!(FcDims::from_shapes(&RuntimeShape::new(&[16]), &RuntimeShape::new(&[1, 4]), false).is_err());
        assert!(FcDims::from_shapes(&RuntimeShape::new(&[4, 16]), &RuntimeShape::new(&[1, 1, 4]), true).is_err());
        assert!(FcDims::from_shapes(&RuntimeShape::new(&[4, 16]), &RuntimeShape::new(&[1, 5]), false).is_err());
    }

    #[test]
    fn short_buffers_are_reported() {
        let d = FcDims { batches: 2, output_depth: 4, accum_depth: 8 };
        let in_shape = RuntimeShape::new(&[2, 8]);
        assert!(d.check_buffers(&in_shape, 16, 32, Some(4), 8).is_ok());
        assert!(matches!(d.check_buffers(&in_shape, 15, 32, None, 8), Err(KernelError::BufferSize { name: "input", .. })));
        assert!(matches!(d.check_buffers(&in_shape, 16, 32, Some(3), 8), Err(KernelError::BufferSize { name: "bias", .. })));
    }
}
