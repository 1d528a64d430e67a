//! Dense int4 weight expansion.
//!
//! Two weights per byte, element `2i` in the low nibble and `2i + 1` in the
//! high nibble of byte `i`. Each nibble is a two's-complement value in
//! `[-8, 7]`.

use crate::error::{check_len, Result};

/// Expand `count` packed int4 weights into one signed byte each.
///
/// `out` must hold at least `count` elements; only the first `count` are
/// written. An odd `count` reads only the low nibble of the last byte.
pub fn unpack_int4_weights(packed: &[i8], count: usize, out: &mut [i8]) -> Result<()> {
    check_len("packed int4", count.div_ceil(2), packed.len())?;
    check_len("unpacked", count, out.len())?;
    for (i, dst) in out[..count].iter_mut().enumerate() {
        let byte = packed[i / 2];
        // shifts on i8 are arithmetic, which sign-extends the nibble
        *dst = if i % 2 == 0 { (byte << 4) >> 4 } else { byte >> 4 };
    }
    Ok(())
}

/// Pack values in `[-8, 7]` two per byte in the layout above.
pub fn pack_int4_weights(values: &[i8]) -> Vec<i8> {
    values
        .chunks(2)
        .map(|pair| {
            debug_assert!(pair.iter().all(|v| (-8..=7).contains(v)));
            let lo = (pair[0] as u8) & 0x0F;
            let hi = pair.get(1).map_or(0, |v| (*v as u8) & 0x0F);
            ((hi << 4) | lo) as i8
        })
        .collect()
}
