use serde::{Deserialize, Serialize};

use crate::error::{KernelError, Result};

/// Per-tensor quantization parameters shared by every fully-connected kernel.
///
/// Offsets are the negated zero points, so a real value is recovered as
/// `scale * (q + offset)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FullyConnectedParams {
    #[serde(default)]
    pub input_offset: i32,
    /// Applied only by the per-tensor 16-bit kernel.
    #[serde(default)]
    pub weights_offset: i32,
    #[serde(default)]
    pub output_offset: i32,
    pub output_multiplier: i32,
    pub output_shift: i32,
    #[serde(default = "default_min")]
    pub quantized_activation_min: i32,
    #[serde(default = "default_max")]
    pub quantized_activation_max: i32,
}

fn default_min() -> i32 { i8::MIN as i32 }
fn default_max() -> i32 { i8::MAX as i32 }

impl Default for FullyConnectedParams {
    fn default() -> Self {
        // 1<<30 with a left shift of one is an exact unit scale
        Self {
            input_offset: 0,
            weights_offset: 0,
            output_offset: 0,
            output_multiplier: 1 << 30,
            output_shift: 1,
            quantized_activation_min: default_min(),
            quantized_activation_max: default_max(),
        }
    }
}

impl FullyConnectedParams {
    pub fn check_activation_range(&self) -> Result<()> {
        let (min, max) = (self.quantized_activation_min, self.quantized_activation_max);
        if min > max {
            return Err(KernelError::ActivationRange { min, max });
        }
        Ok(())
    }
}

/// One output channel's multiplier/shift pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelQuant {
    pub multiplier: i32,
    pub shift: i32,
}

/// Per-channel requantization; weights are symmetric so there is no weight offset.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PerChannelQuant {
    pub channels: Vec<ChannelQuant>,
}

impl PerChannelQuant {
    pub fn new(channels: Vec<ChannelQuant>) -> Self { Self { channels } }

    /// Every channel gets the same pair.
    pub fn uniform(multiplier: i32, shift: i32, n: usize) -> Self {
        Self { channels: vec![ChannelQuant { multiplier, shift }; n] }
    }

    pub fn len(&self) -> usize { self.channels.len() }

    pub fn is_empty(&self) -> bool { self.channels.is_empty() }

    #[inline]
    pub fn get(&self, c: usize) -> ChannelQuant { self.channels[c] }
}
