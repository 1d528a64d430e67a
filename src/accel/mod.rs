//! Accelerator side: wire packing, the command channel and a software model
//! of the device.

pub mod block;
pub mod channel;
pub mod sim;

pub use block::{pack_word, unpack_word, BlockLimits};
pub use channel::{ChannelState, Command, CommandChannel, CommandLog, DeviceConfig, Opcode};
pub use sim::SimulatedAccelerator;
