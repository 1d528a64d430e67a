//! Command channel to the matmul accelerator.
//!
//! Every command is one synchronous request `(opcode, payload, aux)` that
//! returns a 32-bit response word. One transaction runs
//!
//! ```text
//! IDLE -> LOADING_WEIGHTS -> LOADING_INPUTS -> CONFIGURED -> COMPUTING -> DRAINING -> IDLE
//! ```
//!
//! and issuing a command outside that order is a protocol violation.

use log::trace;

use super::block::{pack_word, unpack_word, BlockLimits};
use crate::error::ChannelError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    /// payload = packed (0, depth, channels, batch), aux = input offset
    Configure = 0,
    LoadWeight = 1,
    LoadInput = 2,
    ReadResult = 3,
    Trigger = 4,
}

impl TryFrom<u8> for Opcode {
    type Error = ChannelError;

    fn try_from(v: u8) -> Result<Self, ChannelError> {
        match v {
            0 => Ok(Opcode::Configure),
            1 => Ok(Opcode::LoadWeight),
            2 => Ok(Opcode::LoadInput),
            3 => Ok(Opcode::ReadResult),
            4 => Ok(Opcode::Trigger),
            other => Err(ChannelError::UnknownOpcode(other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelState {
    Idle,
    LoadingWeights,
    LoadingInputs,
    Configured,
    Computing,
    Draining,
}

impl ChannelState {
    /// State after issuing `opcode`, or the violation it would cause.
    pub fn next(self, opcode: Opcode) -> Result<ChannelState, ChannelError> {
        use ChannelState::*;
        match (self, opcode) {
            (Idle | LoadingWeights, Opcode::LoadWeight) => Ok(LoadingWeights),
            (LoadingWeights | LoadingInputs, Opcode::LoadInput) => Ok(LoadingInputs),
            (LoadingInputs, Opcode::Configure) => Ok(Configured),
            (Configured, Opcode::Trigger) => Ok(Computing),
            (Computing | Draining, Opcode::ReadResult) => Ok(Draining),
            (state, opcode) => Err(ChannelError::ProtocolViolation { opcode, state }),
        }
    }

    /// Close a transaction once every result has been read.
    pub fn finish(self) -> Result<ChannelState, ChannelError> {
        match self {
            ChannelState::Draining => Ok(ChannelState::Idle),
            state => Err(ChannelError::ProtocolViolation { opcode: Opcode::ReadResult, state }),
        }
    }
}

/// CONFIGURE payload. Each field travels in one byte lane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceConfig {
    pub depth: usize,
    pub channels: usize,
    /// Always 1: the device multiplies one activation column per transaction.
    pub batch: usize,
}

impl DeviceConfig {
    pub fn encode(&self) -> Result<u32, ChannelError> {
        let lane = |v: usize| u8::try_from(v).map(|b| b as i8).map_err(|_| ChannelError::BadConfig { depth: self.depth, channels: self.channels });
        Ok(pack_word(0, lane(self.depth)?, lane(self.channels)?, lane(self.batch)?))
    }

    pub fn decode(word: u32) -> Self {
        let [_, depth, channels, batch] = unpack_word(word);
        Self { depth: depth as u8 as usize, channels: channels as u8 as usize, batch: batch as u8 as usize }
    }
}

/// Synchronous request/response link to an accelerator.
///
/// Implementations own the device for the duration of a `&mut` borrow; one
/// request is outstanding at a time and each call blocks until the response
/// word is available.
pub trait CommandChannel {
    /// Largest block the device accepts per transaction.
    fn limits(&self) -> BlockLimits;

    fn request(&mut self, opcode: Opcode, payload: u32, aux: u32) -> Result<u32, ChannelError>;

    fn load_weight(&mut self, word: u32, index: u32) -> Result<(), ChannelError> {
        self.request(Opcode::LoadWeight, word, index).map(|_| ())
    }

    fn load_input(&mut self, word: u32, index: u32) -> Result<(), ChannelError> {
        self.request(Opcode::LoadInput, word, index).map(|_| ())
    }

    /// The input offset travels as its two's-complement bit pattern.
    fn configure(&mut self, config: DeviceConfig, input_offset: i32) -> Result<(), ChannelError> {
        let word = config.encode()?;
        self.request(Opcode::Configure, word, input_offset as u32).map(|_| ())
    }

    fn trigger(&mut self) -> Result<(), ChannelError> {
        self.request(Opcode::Trigger, 0, 0).map(|_| ())
    }

    fn read_result(&mut self, index: u32) -> Result<i32, ChannelError> {
        self.request(Opcode::ReadResult, 0, index).map(|w| w as i32)
    }
}

impl<C: CommandChannel + ?Sized> CommandChannel for &mut C {
    fn limits(&self) -> BlockLimits { (**self).limits() }

    fn request(&mut self, opcode: Opcode, payload: u32, aux: u32) -> Result<u32, ChannelError> {
        (**self).request(opcode, payload, aux)
    }
}

/// One recorded request and its response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Command {
    pub opcode: Opcode,
    pub payload: u32,
    pub aux: u32,
    pub response: u32,
}

/// Forwards to an inner channel and records every command that succeeded.
pub struct CommandLog<C> {
    inner: C,
    entries: Vec<Command>,
}

impl<C: CommandChannel> CommandLog<C> {
    pub fn new(inner: C) -> Self { Self { inner, entries: Vec::new() } }

    pub fn entries(&self) -> &[Command] { &self.entries }

    pub fn count(&self, opcode: Opcode) -> usize { self.entries.iter().filter(|c| c.opcode == opcode).count() }

    pub fn clear(&mut self) { self.entries.clear(); }

    pub fn inner(&self) -> &C { &self.inner }

    pub fn into_inner(self) -> C { self.inner }
}

impl<C: CommandChannel> CommandChannel for CommandLog<C> {
    fn limits(&self) -> BlockLimits { self.inner.limits() }

    fn request(&mut self, opcode: Opcode, payload: u32, aux: u32) -> Result<u32, ChannelError> {
        let response = self.inner.request(opcode, payload, aux)?;
        trace!("cmd {:?} payload={:#010x} aux={} -> {:#010x}", opcode, payload, aux, response);
        self.entries.push(Command { opcode, payload, aux, response });
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opcode_wire_values() {
        for (v, op) in [(0u8, Opcode::Configure), (1, Opcode::LoadWeight), (2, Opcode::LoadInput), (3, Opcode::ReadResult), (4, Opcode::Trigger)] {
            assert_eq!(op as u8, v);
            assert_eq!(Opcode::try_from(v).unwrap(), op);
        }
        assert_eq!(Opcode::try_from(5), Err(ChannelError::UnknownOpcode(5)));
    }

    #[test]
    fn state_machine_happy_path() {
        let mut s = ChannelState::Idle;
        for op in [Opcode::LoadWeight, Opcode::LoadWeight, Opcode::LoadInput, Opcode::Configure, Opcode::Trigger, Opcode::ReadResult, Opcode::ReadResult] {
            s = s.next(op).unwrap();
        }
        assert_eq!(s, ChannelState::Draining);
        assert_eq!(s.finish().unwrap(), ChannelState::Idle);
    }

    #[test]
    fn out_of_order_commands_are_violations() {
        assert!(ChannelState::Idle.next(Opcode::Trigger).is_err());
        assert!(ChannelState::LoadingInputs.next(Opcode::LoadWeight).is_err());
        assert!(ChannelState::Computing.next(Opcode::LoadWeight).is_err());
        assert!(ChannelState::Configured.next(Opcode::ReadResult).is_err());
        assert!(ChannelState::Computing.finish().is_err());
    }

    #[test]
    fn config_word_layout() {
        let cfg = DeviceConfig { depth: 64, channels: 12, batch: 1 };
        let w = cfg.encode().unwrap();
        assert_eq!(w, pack_word(0, 64, 12, 1));
        assert_eq!(DeviceConfig::decode(w), cfg);
        // a full 255 lane survives the signed round trip
        let wide = DeviceConfig { depth: 255, channels: 200, batch: 1 };
        assert_eq!(DeviceConfig::decode(wide.encode().unwrap()), wide);
        assert!(DeviceConfig { depth: 256, channels: 1, batch: 1 }.encode().is_err());
    }
}
