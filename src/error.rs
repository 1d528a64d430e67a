use thiserror::Error;

use crate::accel::channel::{ChannelState, Opcode};

/// Errors raised by an accelerator command channel.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelError {
    /// Command issued in a state that does not accept it
    #[error("protocol violation: {opcode:?} issued while {state:?}")]
    ProtocolViolation { opcode: Opcode, state: ChannelState },

    /// Block index outside the device buffer or out of sequence
    #[error("{opcode:?} index {index} out of sequence (expected {expected})")]
    BadIndex { opcode: Opcode, index: u32, expected: u32 },

    /// CONFIGURE payload asks for more than the device holds
    #[error("configure exceeds device limits: depth {depth}, channels {channels}")]
    BadConfig { depth: usize, channels: usize },

    /// Unknown opcode value on the wire
    #[error("unknown opcode {0}")]
    UnknownOpcode(u8),
}

/// Hard failures of the fully-connected kernels. None of these are retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KernelError {
    #[error("shape contract violated: {0}")]
    Shape(String),

    #[error("activation range inverted: min {min} > max {max}")]
    ActivationRange { min: i32, max: i32 },

    #[error("{name} buffer too small: need {needed}, have {actual}")]
    BufferSize { name: &'static str, needed: usize, actual: usize },

    #[error("tile too large: {channels} channels x {depth} depth exceeds block limit {max_channels} x {max_depth}")]
    TileTooLarge { channels: usize, depth: usize, max_channels: usize, max_depth: usize },

    #[error(transparent)]
    Channel(#[from] ChannelError),
}

pub type Result<T> = std::result::Result<T, KernelError>;

/// Fail with `BufferSize` when `actual < needed`.
pub(crate) fn check_len(name: &'static str, needed: usize, actual: usize) -> Result<()> {
    if actual < needed {
        return Err(KernelError::BufferSize { name, needed, actual });
    }
    Ok(())
}
