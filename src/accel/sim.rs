use log::{debug, trace};

use super::block::{unpack_word, BlockLimits, LANES};
use super::channel::{ChannelState, CommandChannel, DeviceConfig, Opcode};
use crate::error::ChannelError;

/// In-process model of the matmul accelerator.
///
/// Buffers words exactly as the device does, multiplies on TRIGGER and
/// hands accumulators back on READ_RESULT. Unlike the real device it checks
/// the command order and every index, reporting mistakes as errors.
#[derive(Debug, Clone)]
pub struct SimulatedAccelerator {
    limits: BlockLimits,
    state: ChannelState,
    weights: Vec<u32>,
    inputs: Vec<u32>,
    results: Vec<i32>,
    config: DeviceConfig,
    input_offset: i32,
    next_weight: u32,
    next_input: u32,
    next_result: u32,
    transactions: u64,
}

impl SimulatedAccelerator {
    pub fn new(limits: BlockLimits) -> Self {
        let groups = limits.max_channels.div_ceil(LANES);
        Self {
            limits,
            state: ChannelState::Idle,
            weights: vec![0; groups * limits.max_depth],
            inputs: vec![0; limits.max_depth],
            results: vec![0; limits.max_channels],
            config: DeviceConfig { depth: 0, channels: 0, batch: 1 },
            input_offset: 0,
            next_weight: 0,
            next_input: 0,
            next_result: 0,
            transactions: 0,
        }
    }

    pub fn state(&self) -> ChannelState { self.state }

    /// Completed TRIGGERs since construction.
    pub fn transactions(&self) -> u64 { self.transactions }

    fn begin(&mut self) {
        self.next_weight = 0;
        self.next_input = 0;
        self.next_result = 0;
    }

    fn take_index(counter: &mut u32, opcode: Opcode, index: u32, capacity: usize) -> Result<usize, ChannelError> {
        if index != *counter || index as usize >= capacity {
            return Err(ChannelError::BadIndex { opcode, index, expected: *counter });
        }
        *counter += 1;
        Ok(index as usize)
    }

    fn apply_config(&mut self, word: u32, aux: u32) -> Result<(), ChannelError> {
        let cfg = DeviceConfig::decode(word);
        let groups = cfg.channels.div_ceil(LANES);
        let complete = self.next_input as usize == cfg.depth && self.next_weight as usize == groups * cfg.depth;
        if cfg.depth > self.limits.max_depth || cfg.channels > self.limits.max_channels || cfg.batch != 1 || !complete {
            return Err(ChannelError::BadConfig { depth: cfg.depth, channels: cfg.channels });
        }
        self.config = cfg;
        self.input_offset = aux as i32;
        Ok(())
    }

    fn compute(&mut self) {
        let DeviceConfig { depth, channels, .. } = self.config;
        self.results[..channels].fill(0);
        for g in 0..channels.div_ceil(LANES) {
            for k in 0..depth {
                let lanes = unpack_word(self.weights[g * depth + k]);
                let x = unpack_word(self.inputs[k])[0] as i32 + self.input_offset;
                for (l, w) in lanes.iter().enumerate() {
                    let c = g * LANES + l;
                    if c < channels { self.results[c] += *w as i32 * x; }
                }
            }
        }
        self.transactions += 1;
        trace!("sim: computed {} channels over depth {}", channels, depth);
    }
}

impl Default for SimulatedAccelerator {
    fn default() -> Self { Self::new(BlockLimits::default()) }
}

impl CommandChannel for SimulatedAccelerator {
    fn limits(&self) -> BlockLimits { self.limits }

    fn request(&mut self, opcode: Opcode, payload: u32, aux: u32) -> Result<u32, ChannelError> {
        let next = self.state.next(opcode)?;
        if self.state == ChannelState::Idle { self.begin(); }
        let mut response = 0;
        match opcode {
            Opcode::LoadWeight => {
                let i = Self::take_index(&mut self.next_weight, opcode, aux, self.weights.len())?;
                self.weights[i] = payload;
            }
            Opcode::LoadInput => {
                let i = Self::take_index(&mut self.next_input, opcode, aux, self.inputs.len())?;
                self.inputs[i] = payload;
            }
            Opcode::Configure => self.apply_config(payload, aux)?,
            Opcode::Trigger => self.compute(),
            Opcode::ReadResult => {
                let i = Self::take_index(&mut self.next_result, opcode, aux, self.config.channels)?;
                response = self.results[i] as u32;
            }
        }
        self.state = next;
        if opcode == Opcode::ReadResult && self.next_result as usize == self.config.channels {
            self.state = self.state.finish()?;
            debug!("sim: transaction {} drained", self.transactions);
        }
        Ok(response)
    }
}
