// Quantized fully-connected kernels: scalar reference path and accelerator offload
pub mod accel;
pub mod config;
pub mod error;
pub mod kernel;
pub mod params;
pub mod quant;
pub mod shape;
pub mod unpack;
pub mod verify;

pub use error::{ChannelError, KernelError};
pub use kernel::{fully_connected_packed_int4, ExecutionPath};
pub use params::{ChannelQuant, FullyConnectedParams, PerChannelQuant};
pub use shape::RuntimeShape;
