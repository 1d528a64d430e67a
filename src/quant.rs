//! Fixed-point requantization primitives.
//!
//! Everything here is integer-only and shared by the reference and offloaded
//! kernels, so both produce bit-identical outputs from identical accumulators.

use std::fmt::Debug;
use std::ops::AddAssign;

/// High 32 bits of `2 * a * b`, rounded to nearest, saturating the single
/// overflow case `MIN * MIN`.
#[inline]
pub fn saturating_rounding_doubling_high_mul(a: i32, b: i32) -> i32 {
    if a == i32::MIN && b == i32::MIN { return i32::MAX; }
    let ab = a as i64 * b as i64;
    let nudge: i64 = if ab >= 0 { 1 << 30 } else { 1 - (1 << 30) };
    // truncating division, not an arithmetic shift
    ((ab + nudge) / (1i64 << 31)) as i32
}

/// `x / 2^exponent` rounded half away from zero.
#[inline]
pub fn rounding_divide_by_pot(x: i32, exponent: i32) -> i32 {
    debug_assert!((0..=31).contains(&exponent), "exponent {} out of range", exponent);
    let mask = ((1i64 << exponent) - 1) as i32;
    let remainder = x & mask;
    let threshold = (mask >> 1) + (x < 0) as i32;
    (x >> exponent) + (remainder > threshold) as i32
}

/// `round(value * multiplier * 2^(shift - 31))` for a 32-bit accumulator.
///
/// `multiplier` is a Q31 fixed-point value; positive `shift` scales up before
/// the multiply, negative `shift` is a rounding right shift after it.
#[inline]
pub fn multiply_by_quantized_multiplier(value: i32, multiplier: i32, shift: i32) -> i32 {
    let left_shift = shift.max(0);
    let right_shift = (-shift).max(0);
    let scaled = saturating_rounding_doubling_high_mul(value.wrapping_shl(left_shift as u32), multiplier);
    rounding_divide_by_pot(scaled, right_shift)
}

/// 64-bit accumulator variant used by the 16-bit activation kernels.
///
/// The multiplier is reduced to 16 significant bits so the product fits in
/// 64 bits for accumulators up to 2^47.
#[inline]
pub fn multiply_by_quantized_multiplier_i64(value: i64, multiplier: i32, shift: i32) -> i32 {
    debug_assert!(multiplier >= 0);
    debug_assert!((-31..8).contains(&shift), "shift {} out of range", shift);
    debug_assert!((-(1i64 << 47)..(1i64 << 47)).contains(&value));
    let reduced: i64 = if multiplier < 0x7FFF_0000 { ((multiplier + (1 << 15)) >> 16) as i64 } else { 0x7FFF };
    let total_shift = 15 - shift as i64;
    let round = 1i64 << (total_shift - 1);
    let result = (value * reduced + round) >> total_shift;
    debug_assert!(result >= i32::MIN as i64 && result <= i32::MAX as i64);
    result as i32
}

/// Accumulator width for the 16-bit activation kernels.
pub trait Accumulator: Copy + Default + Debug + AddAssign + From<i32> + Send + Sync {
    /// Deepest accumulation guaranteed not to overflow. Each i16 x i8 term
    /// is at most 2^22 in magnitude.
    const MAX_DEPTH: usize;

    fn requantize(self, multiplier: i32, shift: i32) -> i32;

    /// Saturating bias addition.
    fn add_bias(self, bias: Self) -> Self;
}

impl Accumulator for i32 {
    const MAX_DEPTH: usize = 1 << 9;

    #[inline]
    fn requantize(self, multiplier: i32, shift: i32) -> i32 { multiply_by_quantized_multiplier(self, multiplier, shift) }

    #[inline]
    fn add_bias(self, bias: Self) -> Self { self.saturating_add(bias) }
}

impl Accumulator for i64 {
    // bounded by the 2^47 input range of the 64-bit multiply
    const MAX_DEPTH: usize = 1 << 25;

    #[inline]
    fn requantize(self, multiplier: i32, shift: i32) -> i32 { multiply_by_quantized_multiplier_i64(self, multiplier, shift) }

    #[inline]
    fn add_bias(self, bias: Self) -> Self { self.saturating_add(bias) }
}

/// Shared epilogue of the 8-bit kernels: requantize, add the output offset,
/// clamp. Callers narrow the result; it always lies in `[min, max]`.
#[inline]
pub fn requantize_and_clamp(acc: i32, multiplier: i32, shift: i32, output_offset: i32, min: i32, max: i32) -> i32 {
    multiply_by_quantized_multiplier(acc, multiplier, shift)
        .saturating_add(output_offset)
        .clamp(min, max)
}

/// Convert a non-negative real scale into a Q31 multiplier and shift.
///
/// Setup-time helper for building params; kernels never touch floats.
pub fn quantize_multiplier(real: f64) -> (i32, i32) {
    debug_assert!(real >= 0.0 && real.is_finite());
    if real == 0.0 { return (0, 0); }
    let mut shift = real.log2().floor() as i32 + 1;
    let mut q = real / 2f64.powi(shift);
    if q >= 1.0 { q /= 2.0; shift += 1; }
    if q < 0.5 { q *= 2.0; shift -= 1; }
    let mut q_fixed = (q * (1i64 << 31) as f64).round() as i64;
    if q_fixed == 1i64 << 31 {
        q_fixed /= 2;
        shift += 1;
    }
    if shift < -31 {
        return (0, 0);
    }
    if shift > 30 {
        return (i32::MAX, 30);
    }
    (q_fixed as i32, shift)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn srdhm_known_values() {
        assert_eq!(saturating_rounding_doubling_high_mul(i32::MIN, i32::MIN), i32::MAX);
        // 10 * 0.5 = 5
        assert_eq!(saturating_rounding_doubling_high_mul(10, 1 << 30), 5);
        // ties round up: 5.5 -> 6, -5.5 -> -5
        assert_eq!(saturating_rounding_doubling_high_mul(11, 1 << 30), 6);
        assert_eq!(saturating_rounding_doubling_high_mul(-11, 1 << 30), -5);
    }

    #[test]
    fn rounding_divide_rounds_half_away() {
        assert_eq!(rounding_divide_by_pot(5, 1), 3);
        assert_eq!(rounding_divide_by_pot(-5, 1), -3);
        assert_eq!(rounding_divide_by_pot(4, 1), 2);
        assert_eq!(rounding_divide_by_pot(7, 0), 7);
        assert_eq!(rounding_divide_by_pot(-7, 2), -2);
    }

    #[test]
    fn unit_multiplier_is_identity() {
        for v in [-1000, -1, 0, 1, 10, 30, 200, 123_456] {
            assert_eq!(multiply_by_quantized_multiplier(v, 1 << 30, 1), v);
            assert_eq!(multiply_by_quantized_multiplier_i64(v as i64, 1 << 30, 1), v);
        }
    }

    #[test]
    fn negative_shift_divides() {
        // 100 * 0.5 * 2^-2 = 12.5 -> 13
        assert_eq!(multiply_by_quantized_multiplier(100, 1 << 30, -2), 13);
    }

    #[test]
    fn epilogue_stays_in_range_for_extremes() {
        for acc in [i32::MIN, i32::MIN + 1, -1, 0, 1, i32::MAX - 1, i32::MAX] {
            for offset in [i32::MIN, -128, 0, 127, i32::MAX] {
                let v = requantize_and_clamp(acc, i32::MAX, 30, offset, -128, 127);
                assert!((-128..=127).contains(&v), "acc {} offset {} -> {}", acc, offset, v);
            }
        }
    }

    #[test]
    fn quantize_multiplier_roundtrips_common_scales() {
        assert_eq!(quantize_multiplier(1.0), (1 << 30, 1));
        assert_eq!(quantize_multiplier(0.5), (1 << 30, 0));
        assert_eq!(quantize_multiplier(0.0), (0, 0));
        let (m, s) = quantize_multiplier(0.25);
        assert_eq!(multiply_by_quantized_multiplier(400, m, s), 100);
    }
}
