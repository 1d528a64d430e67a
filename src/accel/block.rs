//! Block packing for the accelerator.
//!
//! The wire unit is a 32-bit word carrying four int8 lanes. The first lane
//! occupies bits 31..24 and the last bits 7..0; each byte keeps its two's
//! complement bit pattern, so the device must read lanes back as signed.

use serde::{Deserialize, Serialize};

use crate::error::{check_len, KernelError, Result};

pub const MAX_BLOCK_CHANNELS: usize = 64;
pub const MAX_BLOCK_DEPTH: usize = 64;
/// int8 lanes per word
pub const LANES: usize = 4;

/// Largest tile one accelerator transaction can service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockLimits {
    pub max_channels: usize,
    pub max_depth: usize,
}

impl Default for BlockLimits {
    fn default() -> Self { Self { max_channels: MAX_BLOCK_CHANNELS, max_depth: MAX_BLOCK_DEPTH } }
}

impl BlockLimits {
    /// Reject problems that do not fit a single block.
    pub fn check(&self, channels: usize, depth: usize) -> Result<()> {
        if channels > self.max_channels || depth > self.max_depth {
            return Err(KernelError::TileTooLarge { channels, depth, max_channels: self.max_channels, max_depth: self.max_depth });
        }
        Ok(())
    }

    /// Tile rows, rounded up so every channel group has four lanes.
    #[inline]
    pub fn padded_channels(&self) -> usize { self.max_channels.div_ceil(LANES) * LANES }
}

#[inline]
pub fn pack_word(a: i8, b: i8, c: i8, d: i8) -> u32 {
    u32::from_be_bytes([a as u8, b as u8, c as u8, d as u8])
}

/// Inverse of [`pack_word`], first lane first.
#[inline]
pub fn unpack_word(word: u32) -> [i8; LANES] {
    word.to_be_bytes().map(|b| b as i8)
}

/// Zero-initialized channels x depth weight tile.
#[derive(Debug, Clone)]
pub struct WeightBlock {
    tile: Vec<i8>,
    stride: usize,
    channels: usize,
    depth: usize,
}

impl WeightBlock {
    pub fn new(limits: BlockLimits) -> Self {
        Self { tile: vec![0; limits.padded_channels() * limits.max_depth], stride: limits.max_depth, channels: 0, depth: 0 }
    }

    /// Copy the first `channels` rows of a row-major `[_, depth]` filter into
    /// the tile. Rows past `channels` stay zero, which pads the last group.
    pub fn load(&mut self, filter: &[i8], channels: usize, depth: usize) -> Result<()> {
        let rows = self.tile.len() / self.stride.max(1);
        if channels > rows || depth > self.stride {
            return Err(KernelError::TileTooLarge { channels, depth, max_channels: rows, max_depth: self.stride });
        }
        check_len("filter", channels * depth, filter.len())?;
        self.tile.fill(0);
        if depth > 0 {
            for (c, row) in filter.chunks_exact(depth).take(channels).enumerate() {
                let start = c * self.stride;
                self.tile[start..start + depth].copy_from_slice(row);
            }
        }
        self.channels = channels;
        self.depth = depth;
        Ok(())
    }

    #[inline]
    pub fn get(&self, channel: usize, k: usize) -> i8 { self.tile[channel * self.stride + k] }

    pub fn channels(&self) -> usize { self.channels }

    pub fn depth(&self) -> usize { self.depth }

    pub fn channel_groups(&self) -> usize { self.channels.div_ceil(LANES) }

    pub fn word_count(&self) -> usize { self.channel_groups() * self.depth }

    /// Packed words, channel-group major: for each group of four channels,
    /// one word per depth position.
    pub fn words(&self) -> impl Iterator<Item = u32> + '_ {
        (0..self.channel_groups()).flat_map(move |g| {
            let m = g * LANES;
            (0..self.depth).map(move |k| pack_word(self.get(m, k), self.get(m + 1, k), self.get(m + 2, k), self.get(m + 3, k)))
        })
    }
}

/// One activation column; only the first lane of each word is used.
#[derive(Debug, Clone)]
pub struct InputBlock {
    column: Vec<i8>,
    depth: usize,
}

impl InputBlock {
    pub fn new(limits: BlockLimits) -> Self { Self { column: vec![0; limits.max_depth], depth: 0 } }

    pub fn load(&mut self, row: &[i8]) -> Result<()> {
        if row.len() > self.column.len() {
            return Err(KernelError::TileTooLarge { channels: 1, depth: row.len(), max_channels: 1, max_depth: self.column.len() });
        }
        self.column.fill(0);
        self.column[..row.len()].copy_from_slice(row);
        self.depth = row.len();
        Ok(())
    }

    pub fn depth(&self) -> usize { self.depth }

    pub fn words(&self) -> impl Iterator<Item = u32> + '_ {
        self.column[..self.depth].iter().map(|&x| pack_word(x, 0, 0, 0))
    }
}

/// Raw accumulators read back from the device, one per output channel.
#[derive(Debug, Clone)]
pub struct ResultBlock {
    acc: Vec<i32>,
    channels: usize,
}

impl ResultBlock {
    pub fn new(limits: BlockLimits) -> Self { Self { acc: vec![0; limits.max_channels], channels: 0 } }

    /// Zero the first `channels` slots and expect that many results.
    pub fn reset(&mut self, channels: usize) {
        self.acc[..channels].fill(0);
        self.channels = channels;
    }

    #[inline]
    pub fn store(&mut self, channel: usize, acc: i32) { self.acc[channel] = acc; }

    pub fn as_slice(&self) -> &[i32] { &self.acc[..self.channels] }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_word_places_first_lane_high() {
        assert_eq!(pack_word(1, 2, 3, 4), 0x0102_0304);
        assert_eq!(pack_word(-1, 0, 0, 0), 0xFF00_0000);
        assert_eq!(pack_word(0, 0, 0, -128), 0x0000_0080);
        assert_eq!(unpack_word(0xFF80_7F01), [-1, -128, 127, 1]);
    }

    #[test]
    fn every_byte_survives_every_lane() {
        for v in i8::MIN..=i8::MAX {
            let lanes = [v, v.wrapping_add(1), v.wrapping_neg(), !v];
            assert_eq!(unpack_word(pack_word(lanes[0], lanes[1], lanes[2], lanes[3])), lanes);
            assert_eq!(unpack_word(pack_word(0, 0, 0, v)), [0, 0, 0, v]);
            assert_eq!(unpack_word(pack_word(v, 0, 0, 0)), [v, 0, 0, 0]);
        }
    }

    #[test]
    fn weight_words_are_group_major() {
        let limits = BlockLimits { max_channels: 8, max_depth: 2 };
        let filter: Vec<i8> = (1..=12).collect(); // 6 channels x 2
        let mut blk = WeightBlock::new(limits);
        blk.load(&filter, 6, 2).unwrap();
        let words: Vec<u32> = blk.words().collect();
        assert_eq!(words.len(), 4);
        assert_eq!(words[0], pack_word(1, 3, 5, 7));
        assert_eq!(words[1], pack_word(2, 4, 6, 8));
        // second group has two real channels and two zero rows
        assert_eq!(words[2], pack_word(9, 11, 0, 0));
        assert_eq!(words[3], pack_word(10, 12, 0, 0));
    }

    #[test]
    fn reload_clears_previous_tile() {
        let limits = BlockLimits { max_channels: 4, max_depth: 4 };
        let mut blk = WeightBlock::new(limits);
        blk.load(&[9; 16], 4, 4).unwrap();
        blk.load(&[1, 1], 1, 2).unwrap();
        assert_eq!(blk.get(0, 0), 1);
        assert_eq!(blk.get(1, 0), 0);
        assert_eq!(blk.get(0, 3), 0);
    }

    #[test]
    fn oversized_tiles_are_rejected() {
        let limits = BlockLimits::default();
        assert!(limits.check(64, 64).is_ok());
        assert!(matches!(limits.check(65, 1), Err(KernelError::TileTooLarge { .. })));
        assert!(matches!(limits.check(1, 65), Err(KernelError::TileTooLarge { .. })));
        let mut col = InputBlock::new(limits);
        assert!(col.load(&[0; 65]).is_err());
    }

    #[test]
    fn input_words_use_top_lane_only() {
        let mut col = InputBlock::new(BlockLimits::default());
        col.load(&[-3, 7]).unwrap();
        let words: Vec<u32> = col.words().collect();
        assert_eq!(words, vec![0xFD00_0000, 0x0700_0000]);
    }
}
